// ws_connection_core/src/state_machine.rs

//! 连接生命周期状态机。
//!
//! 状态只能通过 `transition` 改变；不在转换表中的 (状态, 事件) 组合会被拒绝，
//! 状态保持不变，由调用方记录为时序异常。

use serde::Serialize;
use std::fmt;

/// 连接状态。
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closing,
    /// 终止状态 (认证被拒或重连耗尽)，只有显式 connect 才能离开。
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 驱动状态转换的事件。
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateEvent {
    ConnectRequested,
    /// 传输层已打开 (且认证已完成)。
    Established,
    TransportLost,
    HeartbeatTimedOut,
    CloseRequested,
    CloseCompleted,
    RetryFired,
    AttemptsExhausted,
    AuthRejected,
    /// 显式 connect 将 Failed 复位。
    Reset,
}

impl StateEvent {
    pub const ALL: [StateEvent; 10] = [
        StateEvent::ConnectRequested,
        StateEvent::Established,
        StateEvent::TransportLost,
        StateEvent::HeartbeatTimedOut,
        StateEvent::CloseRequested,
        StateEvent::CloseCompleted,
        StateEvent::RetryFired,
        StateEvent::AttemptsExhausted,
        StateEvent::AuthRejected,
        StateEvent::Reset,
    ];
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 转换表。返回 `None` 表示该组合不合法。
pub fn next_state(from: ConnectionState, event: StateEvent) -> Option<ConnectionState> {
    use ConnectionState::*;
    use StateEvent::*;
    match (from, event) {
        (Disconnected, ConnectRequested) => Some(Connecting),
        (Connecting, Established) => Some(Connected),
        (Connecting, TransportLost) => Some(Reconnecting),
        (Connected, TransportLost) | (Connected, HeartbeatTimedOut) => Some(Reconnecting),
        (Connecting, CloseRequested)
        | (Connected, CloseRequested)
        | (Reconnecting, CloseRequested) => Some(Closing),
        (Closing, CloseCompleted) => Some(Disconnected),
        (Reconnecting, RetryFired) | (Reconnecting, ConnectRequested) => Some(Connecting),
        (Reconnecting, AttemptsExhausted) => Some(Failed),
        (Connecting, AuthRejected) | (Connected, AuthRejected) => Some(Failed),
        (Failed, Reset) => Some(Disconnected),
        _ => None,
    }
}

/// 持有当前状态的状态机。本身不加锁，由 `ConnectionManager` 的核心锁串行化。
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 当前状态是否接受该事件。
    pub fn accepts(&self, event: StateEvent) -> bool {
        next_state(self.state, event).is_some()
    }

    /// 尝试应用事件，返回 `(转换后的状态, 是否被接受)`。
    /// 被拒绝时状态不变。
    pub fn transition(&mut self, event: StateEvent) -> (ConnectionState, bool) {
        match next_state(self.state, event) {
            Some(to) => {
                self.state = to;
                (to, true)
            }
            None => (self.state, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    const ALL_STATES: [ConnectionState; 6] =
        [Disconnected, Connecting, Connected, Reconnecting, Closing, Failed];

    #[test]
    fn test_happy_path_and_close() {
        let mut machine = ConnectionStateMachine::new();
        assert_eq!(machine.transition(StateEvent::ConnectRequested), (Connecting, true));
        assert_eq!(machine.transition(StateEvent::Established), (Connected, true));
        assert_eq!(machine.transition(StateEvent::CloseRequested), (Closing, true));
        assert_eq!(machine.transition(StateEvent::CloseCompleted), (Disconnected, true));
    }

    #[test]
    fn test_reconnect_cycle_and_exhaustion() {
        let mut machine = ConnectionStateMachine::new();
        machine.transition(StateEvent::ConnectRequested);
        machine.transition(StateEvent::Established);
        assert_eq!(machine.transition(StateEvent::HeartbeatTimedOut), (Reconnecting, true));
        assert_eq!(machine.transition(StateEvent::RetryFired), (Connecting, true));
        assert_eq!(machine.transition(StateEvent::TransportLost), (Reconnecting, true));
        assert_eq!(machine.transition(StateEvent::AttemptsExhausted), (Failed, true));
        // Failed 只接受 Reset
        assert_eq!(machine.transition(StateEvent::ConnectRequested), (Failed, false));
        assert_eq!(machine.transition(StateEvent::Reset), (Disconnected, true));
    }

    #[test]
    fn test_rejected_transition_leaves_state_unchanged() {
        let mut machine = ConnectionStateMachine::new();
        assert_eq!(machine.transition(StateEvent::Established), (Disconnected, false));
        assert_eq!(machine.transition(StateEvent::RetryFired), (Disconnected, false));
        assert_eq!(machine.state(), Disconnected);
        assert!(!machine.accepts(StateEvent::CloseCompleted));
    }

    #[test]
    /// 任意事件序列下，状态的每一次变化都必须对应转换表中的一条边，
    /// 且被拒绝的事件从不改变状态。
    fn test_every_event_sequence_only_follows_table_edges() {
        // 长度为 4 的全部事件序列 (10^4 条)，从每个可达起点出发
        let n = StateEvent::ALL.len();
        for start in ALL_STATES {
            for code in 0..n.pow(4) {
                let mut machine = ConnectionStateMachine { state: start };
                let mut rest = code;
                for _ in 0..4 {
                    let event = StateEvent::ALL[rest % n];
                    rest /= n;
                    let before = machine.state();
                    let (after, accepted) = machine.transition(event);
                    match next_state(before, event) {
                        Some(expected) => {
                            assert!(accepted);
                            assert_eq!(after, expected);
                        }
                        None => {
                            assert!(!accepted);
                            assert_eq!(after, before, "被拒绝的事件不应改变状态");
                        }
                    }
                    assert_eq!(machine.state(), after);
                }
            }
        }
    }

    #[test]
    /// Failed 是终止状态：除 Reset 外没有出边；Closing 只能走向 Disconnected。
    fn test_terminal_and_closing_out_edges() {
        for event in StateEvent::ALL {
            let from_failed = next_state(Failed, event);
            if event == StateEvent::Reset {
                assert_eq!(from_failed, Some(Disconnected));
            } else {
                assert_eq!(from_failed, None, "Failed 不应接受 {}", event);
            }
            if let Some(to) = next_state(Closing, event) {
                assert_eq!(to, Disconnected);
            }
        }
    }
}
