// ws_connection_core/src/client/transport.rs

//! 基于 `tokio-tungstenite` 的链路实现。
//!
//! 每条链路是一个独立的 tokio 任务：先完成握手，再在同一个 `select!` 循环里
//! 读取 socket 与管理器下发的写指令。链路的一切结果都以 `LinkSignal` 报告，
//! 任务本身从不重试，重连完全由 `ConnectionManager` 决定。

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::link::{ConnectRequest, Connector, Endpoint, LinkSignal, TransportHandle, WireFrame};
use crate::error::WsError;

/// 使用 `tokio-tungstenite` 打开真实网络链路的 `Connector`。
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for TungsteniteConnector {
    fn open(
        &self,
        request: ConnectRequest,
        signals: mpsc::UnboundedSender<LinkSignal>,
    ) -> TransportHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_link(request, signals, commands_rx));
        TransportHandle::new(commands_tx, Some(task))
    }
}

/// 构造握手请求；有令牌时附带 `Authorization: Bearer` 请求头。
pub fn build_client_request(endpoint: &Endpoint, auth_token: Option<&str>) -> Result<Request, WsError> {
    let mut request = endpoint.as_str().into_client_request()?;
    if let Some(token) = auth_token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| WsError::Message(format!("认证令牌无法作为请求头发送: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(request)
}

async fn run_link(
    request: ConnectRequest,
    signals: mpsc::UnboundedSender<LinkSignal>,
    mut commands: mpsc::UnboundedReceiver<WireFrame>,
) {
    let generation = request.generation;
    let client_request = match build_client_request(&request.endpoint, request.auth_token.as_deref()) {
        Ok(r) => r,
        Err(e) => {
            error!("[WebSocket传输] 构造握手请求失败: {}", e);
            let _ = signals.send(LinkSignal::failed(generation, e.to_string()));
            return;
        }
    };

    info!("[WebSocket传输] 正在连接 {} (链路代号 {})", request.endpoint, generation);
    let ws_stream = match connect_async(client_request).await {
        Ok((stream, response)) => {
            info!(
                "[WebSocket传输] 已连接到 {} (HTTP 状态码: {})",
                request.endpoint,
                response.status()
            );
            stream
        }
        Err(e) => {
            error!("[WebSocket传输] 连接到 {} 失败: {}", request.endpoint, e);
            let _ = signals.send(LinkSignal::failed(generation, WsError::from(e).to_string()));
            return;
        }
    };
    let _ = signals.send(LinkSignal::opened(generation));

    let (mut sink, mut stream) = ws_stream.split();
    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = signals.send(LinkSignal::frame(generation, text));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    debug!("[WebSocket传输] 收到 {} 字节的二进制帧，按 UTF-8 文本处理", bytes.len());
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    let _ = signals.send(LinkSignal::frame(generation, text));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    let _ = signals.send(LinkSignal::activity(generation));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                        None => (None, String::new()),
                    };
                    info!("[WebSocket传输] 服务端关闭了连接 (关闭码 {:?}, 原因 '{}')", code, reason);
                    let _ = signals.send(LinkSignal::closed(generation, code, reason));
                    break;
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    warn!("[WebSocket传输] 读取失败: {}", e);
                    let _ = signals.send(LinkSignal::failed(generation, WsError::from(e).to_string()));
                    break;
                }
                None => {
                    let _ = signals.send(LinkSignal::closed(generation, None, "接收流已结束"));
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(WireFrame::Text(text)) => {
                    match timeout(request.send_timeout, sink.send(Message::Text(text))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!("[WebSocket传输] 写入失败: {}", e);
                            let _ = signals.send(LinkSignal::failed(generation, WsError::from(e).to_string()));
                            break;
                        }
                        Err(_) => {
                            warn!("[WebSocket传输] 写入超过 {:?} 未完成", request.send_timeout);
                            let _ = signals.send(LinkSignal::failed(generation, WsError::SendTimeout.to_string()));
                            break;
                        }
                    }
                }
                Some(WireFrame::Close { code, reason }) => {
                    debug!("[WebSocket传输] 主动关闭链路 (关闭码 {})", code);
                    let frame = CloseFrame { code: CloseCode::from(code), reason: reason.into() };
                    if timeout(request.send_timeout, sink.send(Message::Close(Some(frame)))).await.is_ok() {
                        // 等待对端回应关闭帧，完成关闭握手
                        let _ = timeout(request.send_timeout, async {
                            while let Some(Ok(msg)) = stream.next().await {
                                if msg.is_close() {
                                    break;
                                }
                            }
                        })
                        .await;
                    }
                    break;
                }
                None => {
                    // 句柄已被丢弃
                    let _ = timeout(request.send_timeout, sink.close()).await;
                    break;
                }
            },
        }
    }
    debug!("[WebSocket传输] 链路 {} 的任务已结束", generation);
}
