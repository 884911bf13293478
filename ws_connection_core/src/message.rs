// ws_connection_core/src/message.rs

//! 定义线上信封 `Envelope` 及其编解码器 `MessageCodec`。
//!
//! `Envelope` 是客户端与服务端之间所有 WebSocket 消息交换的统一格式：
//! `{ type, id?, from?, to?, data, timestamp }`。信封一经构造即不可变，
//! 字段只能通过访问器读取；`with_*` 方法消费旧值并返回新值。
//!
//! `MessageCodec` 负责信封与 JSON 文本之间的转换。编码是全函数 (不会失败)；
//! 解码只在载荷不是 JSON 对象、缺少 `type` 或已知字段类型不符时失败。
//! 未知的 `type` 会被正常解码，交给分发器决定如何处理。

use chrono::Utc; // 用于生成消息时间戳
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value, json};
use uuid::Uuid; // 用于生成出站聊天消息的唯一 ID

use common_models::enums::{ChatContentType, PresenceStatus};
use common_models::ws_payloads::{
    AUTH_MESSAGE_TYPE, CHAT_MESSAGE_TYPE, HEARTBEAT_MESSAGE_TYPE, MESSAGE_DELIVERED_MESSAGE_TYPE,
    MESSAGE_READ_MESSAGE_TYPE, STATUS_MESSAGE_TYPE, TYPING_MESSAGE_TYPE,
};

use crate::error::{DecodeError, WsError};

/// 线上消息单元。
///
/// 线上格式由 serde 派生：`message_type` 对应 `type` 字段，
/// 空的 `id` / `from` / `to` 不会被序列化。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    /// 消息类型，例如 "auth"、"chat"、"heartbeat"。路由的唯一依据。
    #[serde(rename = "type")]
    message_type: String,
    /// 消息 / 请求关联 ID。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    /// 发送方标识。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<String>,
    /// 接收方标识。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to: Option<String>,
    /// 与类型相关的负载。
    #[serde(default, deserialize_with = "data_or_empty")]
    data: Map<String, Value>,
    /// 自 Unix 纪元以来的毫秒数 (UTC)。
    #[serde(default = "now_millis", deserialize_with = "timestamp_or_now")]
    timestamp: i64,
}

impl Envelope {
    /// 以当前时间戳创建一个新的信封。
    pub fn new(message_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            message_type: message_type.into(),
            id: None,
            from: None,
            to: None,
            data,
            timestamp: now_millis(),
        }
    }

    /// 将任意可序列化的负载放入 `data` 字段创建信封。
    ///
    /// 负载必须序列化为 JSON 对象，否则返回 `WsError::SerializationError`。
    pub fn from_payload<T: Serialize>(
        message_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, WsError> {
        let message_type = message_type.into();
        match serde_json::to_value(payload) {
            Ok(Value::Object(data)) => Ok(Self::new(message_type, data)),
            Ok(other) => Err(WsError::SerializationError(format!(
                "消息类型 '{}' 的负载必须是 JSON 对象，实际为: {}",
                message_type, other
            ))),
            Err(e) => Err(WsError::SerializationError(format!(
                "创建 Envelope 时序列化载荷失败: {}",
                e
            ))),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// 使用 UUID v4 作为消息 ID。
    pub fn with_generated_id(self) -> Self {
        self.with_id(Uuid::new_v4().to_string())
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn from(&self) -> Option<&str> {
        self.from.as_deref()
    }

    pub fn to(&self) -> Option<&str> {
        self.to.as_deref()
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// 读取 `data` 中的字符串字段。
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// 将 `data` 反序列化为指定的负载类型。
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, WsError> {
        serde_json::from_value(Value::Object(self.data.clone())).map_err(|e| {
            WsError::DeserializationError(format!(
                "消息类型 '{}' 的负载反序列化为目标类型失败: {}",
                self.message_type, e
            ))
        })
    }

    /// 认证、心跳等由连接核心自行消费的控制消息。
    pub fn is_control(&self) -> bool {
        self.message_type == AUTH_MESSAGE_TYPE || self.message_type == HEARTBEAT_MESSAGE_TYPE
    }

    // --- 各类出站消息的构造函数 ---

    /// `auth` 消息，`data.token` 为认证令牌。
    pub fn auth(token: &str) -> Self {
        Self::new(AUTH_MESSAGE_TYPE, object_of(json!({ "token": token })))
    }

    /// `heartbeat` 消息，`data.timestamp` 为发送时刻。
    pub fn heartbeat() -> Self {
        let now = Utc::now().timestamp_millis();
        Self::new(HEARTBEAT_MESSAGE_TYPE, object_of(json!({ "timestamp": now }))).with_timestamp(now)
    }

    /// `status` 消息，上报自身在线状态。
    pub fn status(status: PresenceStatus) -> Self {
        Self::new(STATUS_MESSAGE_TYPE, object_of(json!({ "status": status.as_str() })))
    }

    /// `chat` 消息。自动生成消息 ID，供后续已读 / 送达回执关联。
    pub fn chat(content: &str, content_type: ChatContentType, conversation_id: Option<&str>) -> Self {
        let mut data = object_of(json!({
            "content": content,
            "messageType": content_type.as_str(),
        }));
        if let Some(conversation_id) = conversation_id {
            data.insert("conversationId".to_string(), Value::from(conversation_id));
        }
        Self::new(CHAT_MESSAGE_TYPE, data).with_generated_id()
    }

    /// `typing` 消息。
    pub fn typing(conversation_id: &str, is_typing: bool) -> Self {
        Self::new(
            TYPING_MESSAGE_TYPE,
            object_of(json!({ "conversationId": conversation_id, "isTyping": is_typing })),
        )
    }

    /// `message_read` 回执。
    pub fn message_read(message_id: &str, conversation_id: Option<&str>) -> Self {
        Self::new(MESSAGE_READ_MESSAGE_TYPE, receipt_data(message_id, conversation_id))
    }

    /// `message_delivered` 回执。
    pub fn message_delivered(message_id: &str, conversation_id: Option<&str>) -> Self {
        Self::new(MESSAGE_DELIVERED_MESSAGE_TYPE, receipt_data(message_id, conversation_id))
    }
}

fn receipt_data(message_id: &str, conversation_id: Option<&str>) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("messageId".to_string(), Value::from(message_id));
    if let Some(conversation_id) = conversation_id {
        data.insert("conversationId".to_string(), Value::from(conversation_id));
    }
    data
}

fn object_of(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// 信封与 JSON 文本之间的编解码器。
pub struct MessageCodec;

impl MessageCodec {
    /// 将信封编码为 JSON 文本。空的可选字段不会出现在输出中。
    ///
    /// 信封只含字符串键与 JSON 值，序列化不会失败。
    pub fn encode(envelope: &Envelope) -> String {
        serde_json::to_string(envelope).unwrap_or_default()
    }

    /// 同 `encode`，返回 UTF-8 字节。
    pub fn encode_bytes(envelope: &Envelope) -> Vec<u8> {
        Self::encode(envelope).into_bytes()
    }

    /// 将信封转换为 JSON 值。
    pub fn to_value(envelope: &Envelope) -> Value {
        serde_json::to_value(envelope).unwrap_or(Value::Null)
    }

    /// 从原始字节解码信封。
    ///
    /// # Returns
    ///
    /// * `Err(DecodeError)` - 载荷不是 JSON 对象、缺少 `type` 或已知字段类型不符。
    pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| DecodeError::malformed(format!("载荷不是合法的 JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// 从文本帧解码信封。
    pub fn decode_str(text: &str) -> Result<Envelope, DecodeError> {
        Self::decode(text.as_bytes())
    }

    /// 从已解析的 JSON 值构造信封。
    pub fn from_value(value: Value) -> Result<Envelope, DecodeError> {
        // 派生的反序列化也接受数组形式，线上格式只允许对象
        if !value.is_object() {
            return Err(DecodeError::malformed("载荷顶层不是 JSON 对象"));
        }
        let envelope: Envelope = serde_json::from_value(value)
            .map_err(|e| DecodeError::malformed(format!("载荷无法解析为信封: {}", e)))?;
        Self::check(envelope)
    }

    fn check(envelope: Envelope) -> Result<Envelope, DecodeError> {
        if envelope.message_type.is_empty() {
            return Err(DecodeError::malformed("type 字段为空字符串"));
        }
        Ok(envelope)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// `data` 为 null 时视为空对象。
fn data_or_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// 缺少或为 null 的时间戳以接收时刻补齐，兼容较旧的服务端；浮点数截断为整数毫秒。
fn timestamp_or_now<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Number>::deserialize(deserializer)? {
        None => Ok(now_millis()),
        Some(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| de::Error::custom(format!("timestamp 超出范围: {}", n))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeErrorReason;
    use common_models::ws_payloads::{ChatPayload, ReceiptPayload, TypingPayload};

    #[test]
    /// 编码结果应只包含有值的可选字段，`data` 与 `timestamp` 总是存在。
    fn test_encode_omits_absent_optional_fields() {
        let envelope = Envelope::auth("tok123").with_timestamp(42);
        let value: Value =
            serde_json::from_str(&MessageCodec::encode(&envelope)).expect("编码结果应为合法 JSON");
        assert_eq!(
            value,
            json!({"type": "auth", "data": {"token": "tok123"}, "timestamp": 42})
        );
    }

    #[test]
    fn test_decode_then_encode_preserves_all_fields() {
        let original = Envelope::chat("hello", ChatContentType::Image, Some("conv-1"))
            .with_from("alice")
            .with_to("bob");
        let decoded =
            MessageCodec::decode(&MessageCodec::encode_bytes(&original)).expect("解码自身编码结果失败");
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_missing_type_is_malformed() {
        let err = MessageCodec::decode_str(r#"{"data": {"content": "hi"}, "timestamp": 1}"#)
            .expect_err("缺少 type 应解码失败");
        assert_eq!(err.reason, DecodeErrorReason::MalformedPayload);
    }

    #[test]
    fn test_decode_rejects_non_object_and_invalid_json() {
        for raw in ["not json at all", "[1,2,3]", r#""chat""#, r#"{"type": 7}"#, r#"{"type": ""}"#] {
            let err = MessageCodec::decode_str(raw).expect_err("非法载荷应解码失败");
            assert_eq!(err.reason, DecodeErrorReason::MalformedPayload, "载荷: {}", raw);
        }
    }

    #[test]
    fn test_decode_rejects_wrongly_typed_known_fields() {
        let bad_data = MessageCodec::decode_str(r#"{"type": "chat", "data": "oops"}"#);
        assert!(bad_data.is_err(), "data 不是对象时应失败");
        let bad_id = MessageCodec::decode_str(r#"{"type": "chat", "id": 12}"#);
        assert!(bad_id.is_err(), "id 不是字符串时应失败");
        let bad_ts = MessageCodec::decode_str(r#"{"type": "chat", "timestamp": "yesterday"}"#);
        assert!(bad_ts.is_err(), "timestamp 不是数字时应失败");
    }

    #[test]
    /// 未知类型必须在编解码层成功，留给分发器处理。
    fn test_decode_unknown_type_succeeds() {
        let envelope = MessageCodec::decode_str(
            r#"{"type": "reaction_added", "data": {"emoji": "+1"}, "timestamp": 1700000000000}"#,
        )
        .expect("未知类型应正常解码");
        assert_eq!(envelope.message_type(), "reaction_added");
        assert_eq!(envelope.data_str("emoji"), Some("+1"));
        assert_eq!(envelope.timestamp(), 1_700_000_000_000);
    }

    #[test]
    fn test_decode_fills_missing_timestamp_and_data() {
        let before = Utc::now().timestamp_millis();
        let envelope = MessageCodec::decode_str(r#"{"type": "heartbeat"}"#).expect("解码失败");
        assert!(envelope.timestamp() >= before, "缺失的时间戳应以接收时刻补齐");
        assert!(envelope.data().is_empty());
        assert!(envelope.is_control());
    }

    #[test]
    fn test_decode_null_fields_and_float_timestamp() {
        let envelope = MessageCodec::decode_str(
            r#"{"type": "chat", "id": null, "data": null, "timestamp": 1700000000123.9, "extra": 1}"#,
        )
        .expect("null 字段应按缺失处理");
        assert_eq!(envelope.id(), None);
        assert!(envelope.data().is_empty());
        assert_eq!(envelope.timestamp(), 1_700_000_000_123);

        // 数组形式即使字段齐全也不是合法信封
        let err = MessageCodec::decode_str(r#"["chat", null, null, null, {}, 1]"#)
            .expect_err("数组载荷应解码失败");
        assert_eq!(err.reason, DecodeErrorReason::MalformedPayload);
    }

    #[test]
    fn test_typed_constructors_match_wire_payloads() {
        let chat = Envelope::chat("hi", ChatContentType::Text, None);
        assert!(chat.id().is_some(), "聊天消息应自动生成 ID");
        let payload: ChatPayload = chat.payload().expect("chat 负载解析失败");
        assert_eq!(payload.content, "hi");
        assert_eq!(payload.conversation_id, None);

        let typing: TypingPayload = Envelope::typing("c-7", true).payload().expect("typing 负载解析失败");
        assert_eq!(typing.conversation_id, "c-7");
        assert!(typing.is_typing);

        let read = Envelope::message_read("m-1", Some("c-7"));
        assert_eq!(read.message_type(), "message_read");
        let receipt: ReceiptPayload = read.payload().expect("回执负载解析失败");
        assert_eq!(receipt.message_id, "m-1");
        assert_eq!(receipt.conversation_id.as_deref(), Some("c-7"));

        let status = Envelope::status(PresenceStatus::Away);
        assert_eq!(status.data_str("status"), Some("away"));

        let heartbeat = Envelope::heartbeat();
        assert_eq!(
            heartbeat.data().get("timestamp").and_then(Value::as_i64),
            Some(heartbeat.timestamp())
        );
    }

    #[test]
    fn test_payload_to_mismatched_type_is_deserialization_error() {
        let envelope = Envelope::auth("tok");
        let result: Result<ChatPayload, WsError> = envelope.payload();
        match result {
            Err(WsError::DeserializationError(_)) => {}
            other => panic!("预期 DeserializationError，实际: {:?}", other),
        }
    }

    #[test]
    fn test_from_payload_requires_object() {
        let ok = Envelope::from_payload("status", &json!({"status": "busy"})).expect("对象负载应成功");
        assert_eq!(ok.data_str("status"), Some("busy"));
        let err = Envelope::from_payload("status", &"busy");
        assert!(matches!(err, Err(WsError::SerializationError(_))));
    }
}
