//! `common_models` 公共模型库 crate。
//!
//! 本 crate 集中定义了持久连接客户端核心 (`ws_connection_core`) 与宿主移动应用之间
//! 共享的线上数据结构和枚举类型。
//!
//! 主要包含以下类型的模型：
//! - **WebSocket 消息负载 (`ws_payloads`)**: 各类消息 `data` 字段的 Payload 结构体，
//!   以及对应的消息类型常量，例如认证、心跳、在线状态、聊天、输入状态、已读/已送达回执。
//! - **通用枚举 (`enums`)**: 在线状态 (`PresenceStatus`)、聊天内容类型 (`ChatContentType`)、
//!   消息投递状态 (`DeliveryStatus`)。
//!
//! 设计原则：
//! - **序列化/反序列化**: 所有模型都派生 `serde::Serialize` 和 `serde::Deserialize`，
//!   字段名按线上格式使用 camelCase。
//! - **可调试性与克隆**: 所有模型也派生 `Debug` 和 `Clone`。

pub mod enums; // 项目中通用的枚举类型定义
pub mod ws_payloads; // WebSocket 通信中使用的各种消息负载结构体
