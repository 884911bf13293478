//! `ws_connection_core` 是移动端持久连接的客户端核心。
//!
//! 它负责在不可靠的网络上维持一条双向 WebSocket 连接：发送认证消息、
//! 以心跳保活、在断线后按指数退避重连，并把入站消息按类型分发给宿主应用。
//!
//! 主要模块包括：
//! - `manager`: 对外入口 `ConnectionManager`。
//! - `state_machine`: 连接生命周期状态机。
//! - `message`: 线上信封 `Envelope` 与编解码器 `MessageCodec`。
//! - `heartbeat` / `reconnect`: 心跳监视器与重连调度器。
//! - `dispatcher` / `handlers`: 入站消息分发与默认处理器。
//! - `client`: 链路抽象与基于 `tokio-tungstenite` 的实现。
//! - `collaborators`: 宿主应用实现的持久化、通知、凭据接口。
//! - `config` / `error` / `event`: 配置、错误类型与诊断事件。

pub mod client;
pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod handlers;
pub mod heartbeat;
pub mod manager;
pub mod message;
pub mod outbound;
pub mod reconnect;
pub mod state_machine;

pub use client::{Connector, Endpoint, TungsteniteConnector};
pub use collaborators::{ChatRecord, CredentialProvider, NotificationCollaborator, PersistenceCollaborator};
pub use config::ConnectionConfig;
pub use dispatcher::{DispatchOutcome, MessageDispatcher, MessageHandler};
pub use error::{DecodeError, DecodeErrorReason, HandlerError, WsError};
pub use event::ConnectionEvent;
pub use manager::{ConnectionManager, ConnectionManagerBuilder};
pub use message::{Envelope, MessageCodec};
pub use reconnect::{NetworkQuality, ReconnectAttempt};
pub use state_machine::{ConnectionState, StateEvent};
