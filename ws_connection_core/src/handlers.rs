// ws_connection_core/src/handlers.rs

//! 默认的入站消息处理器，把已知的业务消息转交给持久化与通知协作者。

use std::sync::Arc;

use common_models::enums::DeliveryStatus;
use common_models::ws_payloads::{
    CHAT_MESSAGE_TYPE, MESSAGE_DELIVERED_MESSAGE_TYPE, MESSAGE_READ_MESSAGE_TYPE, ReceiptPayload,
    STATUS_MESSAGE_TYPE, StatusPayload, TYPING_MESSAGE_TYPE, TypingPayload,
};
use log::debug;

use crate::collaborators::{ChatRecord, NotificationCollaborator, PersistenceCollaborator};
use crate::dispatcher::{MessageDispatcher, MessageHandler};
use crate::error::HandlerError;
use crate::message::Envelope;

/// `chat`：先存储，再通知界面。
pub struct ChatHandler {
    persistence: Arc<dyn PersistenceCollaborator>,
    notifications: Arc<dyn NotificationCollaborator>,
}

impl ChatHandler {
    pub fn new(
        persistence: Arc<dyn PersistenceCollaborator>,
        notifications: Arc<dyn NotificationCollaborator>,
    ) -> Self {
        Self {
            persistence,
            notifications,
        }
    }
}

impl MessageHandler for ChatHandler {
    fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let record = ChatRecord::from_envelope(envelope)?;
        self.persistence.store_message(&record)?;
        self.notifications.notify_message(&record);
        debug!("[消息处理器] 已处理聊天消息 {:?}", record.message_id);
        Ok(())
    }
}

/// `message_read` / `message_delivered`：更新本地消息的投递状态。
pub struct ReceiptHandler {
    persistence: Arc<dyn PersistenceCollaborator>,
    status: DeliveryStatus,
}

impl ReceiptHandler {
    pub fn new(persistence: Arc<dyn PersistenceCollaborator>, status: DeliveryStatus) -> Self {
        Self {
            persistence,
            status,
        }
    }
}

impl MessageHandler for ReceiptHandler {
    fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let receipt: ReceiptPayload = envelope.payload()?;
        self.persistence
            .update_message_status(&receipt.message_id, self.status)
    }
}

/// `typing`：只通知，不落库。
pub struct TypingHandler {
    notifications: Arc<dyn NotificationCollaborator>,
}

impl TypingHandler {
    pub fn new(notifications: Arc<dyn NotificationCollaborator>) -> Self {
        Self { notifications }
    }
}

impl MessageHandler for TypingHandler {
    fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let typing: TypingPayload = envelope.payload()?;
        self.notifications
            .notify_typing(envelope.from(), &typing.conversation_id, typing.is_typing);
        Ok(())
    }
}

/// `status`：更新发送方的在线状态，需要 `from` 字段。
pub struct PresenceHandler {
    persistence: Arc<dyn PersistenceCollaborator>,
}

impl PresenceHandler {
    pub fn new(persistence: Arc<dyn PersistenceCollaborator>) -> Self {
        Self { persistence }
    }
}

impl MessageHandler for PresenceHandler {
    fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let Some(user_id) = envelope.from() else {
            return Err(HandlerError::new("status 消息缺少 from 字段"));
        };
        let payload: StatusPayload = envelope.payload()?;
        self.persistence.update_presence(user_id, payload.status)
    }
}

/// 为所有已知业务类型注册默认处理器。已有的同类型处理器会被替换。
pub fn install_default_handlers(
    dispatcher: &MessageDispatcher,
    persistence: Arc<dyn PersistenceCollaborator>,
    notifications: Arc<dyn NotificationCollaborator>,
) {
    dispatcher.register(
        CHAT_MESSAGE_TYPE,
        Arc::new(ChatHandler::new(persistence.clone(), notifications.clone())),
    );
    dispatcher.register(
        MESSAGE_READ_MESSAGE_TYPE,
        Arc::new(ReceiptHandler::new(persistence.clone(), DeliveryStatus::Read)),
    );
    dispatcher.register(
        MESSAGE_DELIVERED_MESSAGE_TYPE,
        Arc::new(ReceiptHandler::new(persistence.clone(), DeliveryStatus::Delivered)),
    );
    dispatcher.register(TYPING_MESSAGE_TYPE, Arc::new(TypingHandler::new(notifications)));
    dispatcher.register(STATUS_MESSAGE_TYPE, Arc::new(PresenceHandler::new(persistence)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatchOutcome;
    use common_models::enums::{ChatContentType, PresenceStatus};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        messages: Mutex<Vec<ChatRecord>>,
        statuses: Mutex<Vec<(String, DeliveryStatus)>>,
        presence: Mutex<Vec<(String, PresenceStatus)>>,
        fail_store: bool,
    }

    impl PersistenceCollaborator for RecordingStore {
        fn store_message(&self, record: &ChatRecord) -> Result<(), HandlerError> {
            if self.fail_store {
                return Err(HandlerError::new("存储不可用"));
            }
            self.messages.lock().push(record.clone());
            Ok(())
        }

        fn update_message_status(
            &self,
            message_id: &str,
            status: DeliveryStatus,
        ) -> Result<(), HandlerError> {
            self.statuses.lock().push((message_id.to_string(), status));
            Ok(())
        }

        fn update_presence(&self, user_id: &str, status: PresenceStatus) -> Result<(), HandlerError> {
            self.presence.lock().push((user_id.to_string(), status));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
        typing: Mutex<Vec<(Option<String>, String, bool)>>,
    }

    impl NotificationCollaborator for RecordingNotifier {
        fn notify_message(&self, record: &ChatRecord) {
            self.messages.lock().push(record.content.clone());
        }

        fn notify_typing(&self, user_id: Option<&str>, conversation_id: &str, is_typing: bool) {
            self.typing
                .lock()
                .push((user_id.map(str::to_string), conversation_id.to_string(), is_typing));
        }
    }

    fn setup(fail_store: bool) -> (MessageDispatcher, Arc<RecordingStore>, Arc<RecordingNotifier>) {
        let dispatcher = MessageDispatcher::new();
        let store = Arc::new(RecordingStore {
            fail_store,
            ..Default::default()
        });
        let notifier = Arc::new(RecordingNotifier::default());
        install_default_handlers(&dispatcher, store.clone(), notifier.clone());
        (dispatcher, store, notifier)
    }

    #[test]
    fn test_chat_is_stored_then_notified() {
        let (dispatcher, store, notifier) = setup(false);
        let chat = Envelope::chat("你好", ChatContentType::Text, Some("c-1")).with_from("alice");
        assert_eq!(dispatcher.dispatch(&chat), DispatchOutcome::Handled);
        assert_eq!(store.messages.lock().len(), 1);
        assert_eq!(store.messages.lock()[0].sender_id.as_deref(), Some("alice"));
        assert_eq!(notifier.messages.lock().as_slice(), ["你好".to_string()]);
    }

    #[test]
    /// 存储失败时不应再通知界面，失败原因原样返回。
    fn test_chat_store_failure_skips_notification() {
        let (dispatcher, _store, notifier) = setup(true);
        let chat = Envelope::chat("hi", ChatContentType::Text, None);
        assert_eq!(
            dispatcher.dispatch(&chat),
            DispatchOutcome::Failed(HandlerError::new("存储不可用"))
        );
        assert!(notifier.messages.lock().is_empty());
    }

    #[test]
    fn test_receipts_typing_and_presence() {
        let (dispatcher, store, notifier) = setup(false);
        dispatcher.dispatch(&Envelope::message_read("m-1", None));
        dispatcher.dispatch(&Envelope::message_delivered("m-2", Some("c-1")));
        assert_eq!(
            store.statuses.lock().as_slice(),
            [
                ("m-1".to_string(), DeliveryStatus::Read),
                ("m-2".to_string(), DeliveryStatus::Delivered)
            ]
        );

        dispatcher.dispatch(&Envelope::typing("c-9", true).with_from("bob"));
        assert_eq!(
            notifier.typing.lock().as_slice(),
            [(Some("bob".to_string()), "c-9".to_string(), true)]
        );

        dispatcher.dispatch(&Envelope::status(PresenceStatus::Busy).with_from("carol"));
        assert_eq!(
            store.presence.lock().as_slice(),
            [("carol".to_string(), PresenceStatus::Busy)]
        );
    }

    #[test]
    fn test_presence_without_sender_fails() {
        let (dispatcher, store, _) = setup(false);
        let outcome = dispatcher.dispatch(&Envelope::status(PresenceStatus::Online));
        assert!(matches!(outcome, DispatchOutcome::Failed(_)));
        assert!(store.presence.lock().is_empty());
    }
}
