// common_models/src/ws_payloads.rs

//! 包含 WebSocket 通信中使用的各种 Payload 结构体定义。
//!
//! 每种消息类型都有一个字符串常量 (信封的 `type` 字段) 和一个对应的 Payload 结构体
//! (信封的 `data` 字段)。Payload 字段名按线上格式使用 camelCase。

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::enums::{ChatContentType, PresenceStatus};

/// 认证消息类型。客户端发送 `AuthPayload`，服务端回复 `AuthResultPayload`。
pub const AUTH_MESSAGE_TYPE: &str = "auth";
/// 心跳消息类型。
pub const HEARTBEAT_MESSAGE_TYPE: &str = "heartbeat";
/// 在线状态消息类型。
pub const STATUS_MESSAGE_TYPE: &str = "status";
/// 聊天消息类型。
pub const CHAT_MESSAGE_TYPE: &str = "chat";
/// 正在输入消息类型。
pub const TYPING_MESSAGE_TYPE: &str = "typing";
/// 已读回执消息类型。
pub const MESSAGE_READ_MESSAGE_TYPE: &str = "message_read";
/// 已送达回执消息类型。
pub const MESSAGE_DELIVERED_MESSAGE_TYPE: &str = "message_delivered";

/// 认证请求负载。连接打开后作为第一条消息发送。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuthPayload {
    /// 认证令牌。
    pub token: String,
}

/// 服务端对认证请求的回复。
///
/// `success == false` 表示凭据被拒绝，客户端不应再用同一凭据重试。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthResultPayload {
    /// 认证是否通过。
    pub success: bool,
    /// 可选的说明文字，例如拒绝原因。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// 认证通过时服务端确认的用户 ID。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// 心跳负载。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HeartbeatPayload {
    /// 发送时刻，自 Unix 纪元以来的毫秒数 (UTC)。
    pub timestamp: i64,
}

impl HeartbeatPayload {
    /// 以当前 UTC 时间创建心跳负载。
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// 在线状态负载。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusPayload {
    pub status: PresenceStatus,
}

/// 聊天消息负载。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    /// 消息正文 (文本内容或媒体地址)。
    pub content: String,
    /// 内容类型，缺省为文本。
    #[serde(default)]
    pub message_type: ChatContentType,
    /// 所属会话 ID。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// 正在输入负载。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: String,
    pub is_typing: bool,
}

/// 已读 / 已送达回执负载。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptPayload {
    /// 被确认的消息 ID。
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_payload_uses_camel_case_wire_names() {
        let payload = ChatPayload {
            content: "hi".to_string(),
            message_type: ChatContentType::Text,
            conversation_id: Some("c-1".to_string()),
        };
        let value = serde_json::to_value(&payload).expect("ChatPayload 序列化失败");
        // 断言：字段名应为线上约定的 camelCase
        assert_eq!(
            value,
            json!({"content": "hi", "messageType": "text", "conversationId": "c-1"})
        );
    }

    #[test]
    fn test_chat_payload_defaults_when_optional_fields_missing() {
        let parsed: ChatPayload =
            serde_json::from_value(json!({"content": "hello"})).expect("缺省字段应可反序列化");
        assert_eq!(parsed.message_type, ChatContentType::Text);
        assert_eq!(parsed.conversation_id, None);
    }

    #[test]
    fn test_receipt_payload_omits_missing_conversation() {
        let payload = ReceiptPayload {
            message_id: "m-9".to_string(),
            conversation_id: None,
        };
        let value = serde_json::to_value(&payload).expect("ReceiptPayload 序列化失败");
        assert_eq!(value, json!({"messageId": "m-9"}));
    }

    #[test]
    fn test_auth_result_payload_parses_rejection() {
        let parsed: AuthResultPayload =
            serde_json::from_value(json!({"success": false, "message": "token expired"}))
                .expect("AuthResultPayload 反序列化失败");
        assert!(!parsed.success);
        assert_eq!(parsed.message.as_deref(), Some("token expired"));
        assert_eq!(parsed.user_id, None);
    }

    #[test]
    fn test_heartbeat_payload_now_is_positive() {
        let payload = HeartbeatPayload::now();
        assert!(payload.timestamp > 0, "心跳时间戳应为正数");
    }
}
