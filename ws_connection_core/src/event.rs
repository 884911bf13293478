// ws_connection_core/src/event.rs

//! 连接核心向宿主应用广播的诊断事件。
//!
//! 事件只用于观察，丢失 (订阅者落后于广播容量) 不影响连接本身。

use serde::Serialize;

use crate::state_machine::{ConnectionState, StateEvent};

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// 状态发生了一次被接受的转换。
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// 当前状态下不合法的事件，状态未改变。
    TransitionRejected {
        state: ConnectionState,
        event: StateEvent,
    },
    ReconnectScheduled {
        attempt: u32,
        delay_ms: u64,
    },
    ReconnectExhausted {
        attempts: u32,
    },
    HeartbeatTimedOut {
        silent_for_ms: u64,
    },
    AuthRejected {
        reason: String,
    },
    /// 入站帧无法解码，已丢弃。
    DecodeFailed {
        detail: String,
    },
    UnhandledMessageType {
        message_type: String,
    },
    HandlerFailed {
        message_type: String,
        reason: String,
    },
    /// 待发送队列被丢弃 (断开或进入 Failed)。
    PendingDiscarded {
        count: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_with_kind_tag() {
        let event = ConnectionEvent::StateChanged {
            from: ConnectionState::Connecting,
            to: ConnectionState::Connected,
        };
        assert_eq!(
            serde_json::to_value(&event).expect("序列化事件失败"),
            json!({"kind": "state_changed", "from": "Connecting", "to": "Connected"})
        );
        let event = ConnectionEvent::ReconnectScheduled { attempt: 2, delay_ms: 4000 };
        assert_eq!(
            serde_json::to_value(&event).expect("序列化事件失败"),
            json!({"kind": "reconnect_scheduled", "attempt": 2, "delay_ms": 4000})
        );
    }
}
