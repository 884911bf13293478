// ws_connection_core/src/collaborators.rs

//! 宿主应用需要实现的协作者接口。
//!
//! 连接核心只通过这些 trait 与存储、通知、凭据打交道，不依赖任何具体实现。

use common_models::enums::{ChatContentType, DeliveryStatus, PresenceStatus};
use common_models::ws_payloads::ChatPayload;
use serde::{Deserialize, Serialize};

use crate::error::HandlerError;
use crate::message::Envelope;

/// 一条入站聊天消息在交给持久化与通知协作者时的形态。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    pub sender_id: Option<String>,
    pub recipient_id: Option<String>,
    pub content: String,
    pub content_type: ChatContentType,
    /// 服务端给出的发送时刻 (毫秒)。
    pub sent_at: i64,
}

impl ChatRecord {
    /// 从 `chat` 信封提取记录。`data.content` 缺失时返回错误。
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, HandlerError> {
        let payload: ChatPayload = envelope.payload()?;
        Ok(Self {
            message_id: envelope.id().map(str::to_string),
            conversation_id: payload.conversation_id,
            sender_id: envelope.from().map(str::to_string),
            recipient_id: envelope.to().map(str::to_string),
            content: payload.content,
            content_type: payload.message_type,
            sent_at: envelope.timestamp(),
        })
    }
}

/// 本地存储协作者。
pub trait PersistenceCollaborator: Send + Sync {
    fn store_message(&self, record: &ChatRecord) -> Result<(), HandlerError>;

    fn update_message_status(
        &self,
        message_id: &str,
        status: DeliveryStatus,
    ) -> Result<(), HandlerError>;

    fn update_presence(&self, user_id: &str, status: PresenceStatus) -> Result<(), HandlerError>;
}

/// 界面通知协作者。
pub trait NotificationCollaborator: Send + Sync {
    fn notify_message(&self, record: &ChatRecord);

    fn notify_typing(&self, user_id: Option<&str>, conversation_id: &str, is_typing: bool);
}

/// 凭据协作者：提供服务端地址与认证令牌。
pub trait CredentialProvider: Send + Sync {
    fn server_url(&self) -> String;

    /// 尚未登录时返回 `None`。
    fn auth_token(&self) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_record_from_envelope() {
        let envelope = crate::message::MessageCodec::decode_str(
            &json!({
                "type": "chat",
                "id": "m-1",
                "from": "alice",
                "to": "bob",
                "data": {"content": "hi", "messageType": "image", "conversationId": "c-1"},
                "timestamp": 1_700_000_000_000i64
            })
            .to_string(),
        )
        .expect("解码聊天消息失败");
        let record = ChatRecord::from_envelope(&envelope).expect("提取聊天记录失败");
        assert_eq!(record.message_id.as_deref(), Some("m-1"));
        assert_eq!(record.sender_id.as_deref(), Some("alice"));
        assert_eq!(record.recipient_id.as_deref(), Some("bob"));
        assert_eq!(record.content_type, ChatContentType::Image);
        assert_eq!(record.conversation_id.as_deref(), Some("c-1"));
        assert_eq!(record.sent_at, 1_700_000_000_000);
    }

    #[test]
    fn test_chat_record_requires_content() {
        let envelope = Envelope::new("chat", serde_json::Map::new());
        assert!(ChatRecord::from_envelope(&envelope).is_err());
    }
}
