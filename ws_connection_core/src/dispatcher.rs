// ws_connection_core/src/dispatcher.rs

//! 入站消息分发器：按消息类型把 `Envelope` 路由到注册的处理器。
//!
//! 每种类型最多一个处理器，重复注册时后注册者生效。
//! 处理器在分发器的锁之外调用，因此处理器内部可以再次注册或注销处理器。

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;

use crate::error::HandlerError;
use crate::message::Envelope;

/// 入站消息处理器。
pub trait MessageHandler: Send + Sync {
    fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Envelope) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        self(envelope)
    }
}

/// 单次分发的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// 没有为该类型注册处理器。
    Unhandled(String),
    Failed(HandlerError),
}

#[derive(Default)]
pub struct MessageDispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，返回被替换掉的旧处理器 (如果有)。
    pub fn register(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Option<Arc<dyn MessageHandler>> {
        let message_type = message_type.into();
        let previous = self.handlers.write().insert(message_type.clone(), handler);
        if previous.is_some() {
            debug!("[消息分发器] 类型 '{}' 的处理器已被替换", message_type);
        } else {
            debug!("[消息分发器] 已注册类型 '{}' 的处理器", message_type);
        }
        previous
    }

    pub fn unregister(&self, message_type: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.write().remove(message_type)
    }

    pub fn has_handler(&self, message_type: &str) -> bool {
        self.handlers.read().contains_key(message_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// 把信封交给对应类型的处理器。
    pub fn dispatch(&self, envelope: &Envelope) -> DispatchOutcome {
        // 先克隆出处理器再释放读锁
        let handler = self.handlers.read().get(envelope.message_type()).cloned();
        let Some(handler) = handler else {
            debug!("[消息分发器] 类型 '{}' 没有注册处理器", envelope.message_type());
            return DispatchOutcome::Unhandled(envelope.message_type().to_string());
        };
        match handler.handle(envelope) {
            Ok(()) => DispatchOutcome::Handled,
            Err(e) => {
                warn!(
                    "[消息分发器] 类型 '{}' 的处理器执行失败: {}",
                    envelope.message_type(),
                    e
                );
                DispatchOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: Arc<AtomicUsize>) -> Arc<dyn MessageHandler> {
        Arc::new(move |_: &Envelope| -> Result<(), HandlerError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_dispatch_routes_by_type() {
        let dispatcher = MessageDispatcher::new();
        let chats = Arc::new(AtomicUsize::new(0));
        dispatcher.register("chat", counting_handler(chats.clone()));

        let outcome = dispatcher.dispatch(&Envelope::new("chat", Map::new()));
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(chats.load(Ordering::SeqCst), 1);

        let outcome = dispatcher.dispatch(&Envelope::new("poll", Map::new()));
        assert_eq!(outcome, DispatchOutcome::Unhandled("poll".to_string()));
    }

    #[test]
    /// 重复注册时后注册者生效，旧处理器被返回且不再被调用。
    fn test_last_registration_wins() {
        let dispatcher = MessageDispatcher::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        assert!(dispatcher.register("typing", counting_handler(first.clone())).is_none());
        assert!(dispatcher.register("typing", counting_handler(second.clone())).is_some());

        dispatcher.dispatch(&Envelope::typing("c-1", true));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.registered_types(), vec!["typing".to_string()]);

        assert!(dispatcher.unregister("typing").is_some());
        assert!(!dispatcher.has_handler("typing"));
    }

    #[test]
    fn test_handler_failure_is_reported() {
        let dispatcher = MessageDispatcher::new();
        dispatcher.register(
            "chat",
            Arc::new(|_: &Envelope| -> Result<(), HandlerError> { Err(HandlerError::new("磁盘已满")) }),
        );
        let outcome = dispatcher.dispatch(&Envelope::new("chat", Map::new()));
        assert_eq!(outcome, DispatchOutcome::Failed(HandlerError::new("磁盘已满")));
    }

    #[test]
    /// 处理器内部可以重新进入分发器 (注册新的处理器) 而不会死锁。
    fn test_handler_can_reenter_dispatcher() {
        let dispatcher = Arc::new(MessageDispatcher::new());
        let inner = Arc::downgrade(&dispatcher);
        dispatcher.register(
            "status",
            Arc::new(move |_: &Envelope| -> Result<(), HandlerError> {
                if let Some(d) = inner.upgrade() {
                    d.register("late", Arc::new(|_: &Envelope| -> Result<(), HandlerError> { Ok(()) }));
                }
                Ok(())
            }),
        );
        assert_eq!(
            dispatcher.dispatch(&Envelope::new("status", Map::new())),
            DispatchOutcome::Handled
        );
        assert!(dispatcher.has_handler("late"));
    }
}
