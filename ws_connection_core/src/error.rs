// ws_connection_core/src/error.rs

//! 定义连接核心相关的错误类型。

use thiserror::Error; // 引入 thiserror 来简化错误类型的定义

/// 连接核心的统一错误类型。
///
/// 可恢复的传输层错误不会以此类型交给调用方，而是在核心内部驱动重连，
/// 调用方只会通过状态流观察到 `Reconnecting`。此类型只承载同步失败
/// (端点、配置) 和终止性结果 (认证被拒、重连耗尽)。
#[derive(Error, Debug)]
pub enum WsError {
    /// 当 serde 序列化失败时返回。
    #[error("序列化错误: {0}")]
    SerializationError(String),

    /// 当 serde 反序列化失败时返回。
    #[error("反序列化错误: {0}")]
    DeserializationError(String),

    /// WebSocket 协议相关的错误。
    #[error("WebSocket协议错误: {0}")]
    WebSocketProtocolError(#[from] tokio_tungstenite::tungstenite::Error),

    /// 链路在连接超时时间内没有完成握手。
    #[error("连接超时")]
    ConnectionTimeout,

    /// 发送超时错误。
    #[error("发送超时")]
    SendTimeout,

    /// 无效的端点：无法解析，或者不是 ws:// / wss:// 协议。
    #[error("无效的端点: {0}")]
    InvalidEndpoint(String),

    /// 配置项取值不合法。
    #[error("无效的配置: {0}")]
    InvalidConfig(String),

    /// 在 tokio 运行时之外创建管理器。
    #[error("当前线程不在 tokio 运行时中: {0}")]
    RuntimeUnavailable(String),

    /// 凭据协作者没有提供认证令牌。
    #[error("缺少认证凭据")]
    MissingCredential,

    /// 服务端拒绝了认证信封，同一凭据重试没有意义。
    #[error("认证被拒绝: {0}")]
    AuthRejected(String),

    /// 重连次数已达上限，需要调用方显式重新 connect。
    #[error("重连次数已耗尽 (共尝试 {0} 次)")]
    ReconnectExhausted(u32),

    /// 未连接错误，当尝试在未建立连接时进行操作。
    #[error("未连接")]
    NotConnected,

    /// 通用消息错误，用于其他未明确分类的错误。
    #[error("消息错误: {0}")]
    Message(String),
}

/// 解码失败的原因分类。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorReason {
    /// 载荷不是合法的结构化数据，或缺少必填的 `type` 字段。
    MalformedPayload,
}

/// `MessageCodec::decode` 返回的错误。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("解码失败 ({reason:?}): {detail}")]
pub struct DecodeError {
    pub reason: DecodeErrorReason,
    /// 人类可读的细节，用于日志诊断。
    pub detail: String,
}

impl DecodeError {
    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        Self {
            reason: DecodeErrorReason::MalformedPayload,
            detail: detail.into(),
        }
    }
}

/// 入站消息处理器返回的错误。处理失败不会影响连接本身。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<WsError> for HandlerError {
    fn from(err: WsError) -> Self {
        Self(err.to_string())
    }
}
