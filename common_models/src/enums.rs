//! 通用枚举模块。
//!
//! 本模块定义了连接核心与宿主应用之间共享的通用枚举类型。
//! 线上格式统一使用小写 (或 snake_case) 字符串表示，以便与服务端约定保持一致。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 用户在线状态，对应 `status` 消息中的 `data.status` 字段。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// 在线
    Online,
    /// 离线
    Offline,
    /// 离开
    Away,
    /// 忙碌
    Busy,
}

impl PresenceStatus {
    /// 返回线上格式使用的字符串。
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
            PresenceStatus::Away => "away",
            PresenceStatus::Busy => "busy",
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 聊天消息的内容类型，对应 `chat` 消息中的 `data.messageType` 字段。
///
/// 服务端新增的内容类型会被反序列化为 `Unknown`，而不是导致整条消息解析失败。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChatContentType {
    /// 纯文本
    #[default]
    Text,
    /// 图片
    Image,
    /// 语音
    Voice,
    /// 视频
    Video,
    /// 文件
    File,
    /// 无法识别的类型
    #[serde(other)]
    Unknown,
}

impl ChatContentType {
    /// 返回线上格式使用的字符串。
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatContentType::Text => "text",
            ChatContentType::Image => "image",
            ChatContentType::Voice => "voice",
            ChatContentType::Video => "video",
            ChatContentType::File => "file",
            ChatContentType::Unknown => "unknown",
        }
    }
}

/// 消息投递状态。持久化协作者根据回执消息更新本地记录时使用。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// 已发出，尚未收到任何回执
    Sent,
    /// 对方设备已收到
    Delivered,
    /// 对方已读
    Read,
}
