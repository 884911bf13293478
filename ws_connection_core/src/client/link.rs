// ws_connection_core/src/client/link.rs

//! 传输链路抽象。
//!
//! `ConnectionManager` 不直接接触 socket：它通过 `Connector` 打开一条链路，
//! 通过 `TransportHandle` 写出帧，并从一个信号通道接收 `LinkSignal`。
//! 每条链路都带有一个代号 (generation)，管理器据此丢弃已被取代的链路发来的信号。

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::error::WsError;

/// 校验过的 WebSocket 端点，只接受 `ws://` 与 `wss://`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self, WsError> {
        let url = Url::parse(raw)
            .map_err(|e| WsError::InvalidEndpoint(format!("无法解析 '{}': {}", raw, e)))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(WsError::InvalidEndpoint(format!(
                    "'{}' 使用了不支持的协议 '{}'，只接受 ws:// 或 wss://",
                    raw, other
                )));
            }
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(WsError::InvalidEndpoint(format!("'{}' 缺少主机名", raw)));
        }
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// 打开一条链路所需的全部参数。
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub endpoint: Endpoint,
    /// 非空时以 `Authorization: Bearer <token>` 请求头随握手发送。
    pub auth_token: Option<String>,
    pub generation: u64,
    pub send_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSignalKind {
    /// 握手完成，可以写帧。
    Opened,
    /// 收到一个数据帧。
    Frame(String),
    /// 收到 Ping / Pong 等不携带业务数据的流量。
    Activity,
    /// 对端关闭了连接。
    Closed { code: Option<u16>, reason: String },
    /// 连接失败或读写出错。
    Failed(String),
}

/// 链路发往管理器的信号。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSignal {
    pub generation: u64,
    pub kind: LinkSignalKind,
}

impl LinkSignal {
    pub fn opened(generation: u64) -> Self {
        Self { generation, kind: LinkSignalKind::Opened }
    }

    pub fn frame(generation: u64, text: impl Into<String>) -> Self {
        Self { generation, kind: LinkSignalKind::Frame(text.into()) }
    }

    pub fn activity(generation: u64) -> Self {
        Self { generation, kind: LinkSignalKind::Activity }
    }

    pub fn closed(generation: u64, code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            generation,
            kind: LinkSignalKind::Closed { code, reason: reason.into() },
        }
    }

    pub fn failed(generation: u64, detail: impl Into<String>) -> Self {
        Self { generation, kind: LinkSignalKind::Failed(detail.into()) }
    }
}

/// 管理器写往链路的帧。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// 一条已打开 (或正在打开) 的链路的写端。
///
/// 直接丢弃句柄等同于让链路自行收尾；`abort` 则立即中止链路任务。
pub struct TransportHandle {
    commands: mpsc::UnboundedSender<WireFrame>,
    task: Option<JoinHandle<()>>,
}

impl TransportHandle {
    pub fn new(commands: mpsc::UnboundedSender<WireFrame>, task: Option<JoinHandle<()>>) -> Self {
        Self { commands, task }
    }

    /// 把文本帧交给链路任务。链路已结束时返回 `false`。
    pub fn send_text(&self, text: String) -> bool {
        self.commands.send(WireFrame::Text(text)).is_ok()
    }

    /// 请求链路以给定关闭码关闭，链路任务在完成关闭握手后自行退出。
    pub fn close(mut self, code: u16, reason: &str) {
        let _ = self.commands.send(WireFrame::Close {
            code,
            reason: reason.to_string(),
        });
        self.task = None;
    }

    pub fn abort(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// 链路工厂。`open` 必须立即返回，连接过程在后台进行，结果通过 `signals` 通知。
pub trait Connector: Send + Sync + 'static {
    fn open(
        &self,
        request: ConnectRequest,
        signals: mpsc::UnboundedSender<LinkSignal>,
    ) -> TransportHandle;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_accepts_ws_and_wss() {
        let plain = Endpoint::parse("ws://127.0.0.1:8088/ws").expect("ws 端点应合法");
        assert!(!plain.is_secure());
        let secure = Endpoint::parse("wss://chat.example.com/socket?v=2").expect("wss 端点应合法");
        assert!(secure.is_secure());
        assert_eq!(secure.url().host_str(), Some("chat.example.com"));
    }

    #[test]
    fn test_endpoint_rejects_other_schemes_and_garbage() {
        for raw in ["http://example.com", "ftp://example.com", "not a url", "", "ws://"] {
            match Endpoint::parse(raw) {
                Err(WsError::InvalidEndpoint(_)) => {}
                other => panic!("'{}' 应被拒绝，实际: {:?}", raw, other),
            }
        }
    }

    #[tokio::test]
    async fn test_handle_forwards_frames_and_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = TransportHandle::new(tx, None);
        assert!(handle.send_text("{}".to_string()));
        handle.close(1000, "bye");
        assert_eq!(rx.recv().await, Some(WireFrame::Text("{}".to_string())));
        assert_eq!(
            rx.recv().await,
            Some(WireFrame::Close { code: 1000, reason: "bye".to_string() })
        );
        assert_eq!(rx.recv().await, None, "句柄已消费，通道应关闭");
    }
}
