// ws_connection_core/src/client/mod.rs

//! WebSocket 客户端链路。
//!
//! - `link`: 与具体网络库无关的链路抽象 (`Connector`、`TransportHandle`、`LinkSignal`)。
//! - `transport`: 基于 `tokio-tungstenite` 的实现 `TungsteniteConnector`。

pub mod link;
pub mod transport;

pub use link::{
    ConnectRequest, Connector, Endpoint, LinkSignal, LinkSignalKind, TransportHandle, WireFrame,
};
pub use transport::TungsteniteConnector;
