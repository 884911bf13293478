// ws_connection_core/src/config.rs

//! 连接核心的配置。
//!
//! 所有字段都有推荐默认值，配置文件中只需写出需要覆盖的项。
//! `max_reconnect_attempts` 写为 `null` 表示不限制重连次数。

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::WsError;

/// 默认心跳间隔 (毫秒)。
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
/// 默认心跳超时 (毫秒)，叠加在心跳间隔之上构成存活期限。
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_BASE_RECONNECT_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 300_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// 各项定时配置的上限 (24 小时)。
pub const MAX_TIMER_MS: u64 = 86_400_000;
/// 服务端以这些关闭码断开时视为认证被拒绝 (1008 策略违规，4001/4003 自定义认证失败)。
pub const DEFAULT_AUTH_REJECTION_CLOSE_CODES: [u16; 3] = [1008, 4001, 4003];

/// 连接管理器配置。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// 两次心跳之间的间隔。
    pub heartbeat_interval_ms: u64,
    /// 心跳间隔之外允许的额外静默时间。
    pub heartbeat_timeout_ms: u64,
    /// 第一次重连前的等待时间。
    pub base_reconnect_delay_ms: u64,
    /// 重连等待时间的上限。
    pub max_reconnect_delay_ms: u64,
    /// 放弃前最多重连的次数；`None` 表示无限重连。
    pub max_reconnect_attempts: Option<u32>,
    /// 指数退避的底数。
    pub backoff_factor: f64,
    /// 抖动比例，实际延迟在 `[1 - jitter, 1 + jitter]` 倍之间浮动。
    pub jitter_ratio: f64,
    /// 传输层建立连接 (含握手) 的最长时间。
    pub connect_timeout_ms: u64,
    /// 单帧写入的最长时间。
    pub send_timeout_ms: u64,
    /// 为 true 时，收到服务端 `auth` 成功回复才进入 Connected；
    /// 否则传输层打开并写出认证信封后立即进入 Connected。
    pub await_auth_ack: bool,
    /// 为 true 时，对带 ID 的入站聊天消息自动回复 `message_delivered`。
    pub send_delivery_receipts: bool,
    /// 视为认证失败的关闭码。
    pub auth_rejection_close_codes: Vec<u16>,
    /// 状态 / 消息 / 事件广播通道的容量。
    pub channel_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            base_reconnect_delay_ms: DEFAULT_BASE_RECONNECT_DELAY_MS,
            max_reconnect_delay_ms: DEFAULT_MAX_RECONNECT_DELAY_MS,
            max_reconnect_attempts: Some(DEFAULT_MAX_RECONNECT_ATTEMPTS),
            backoff_factor: 2.0,
            jitter_ratio: 0.2,
            connect_timeout_ms: 15_000,
            send_timeout_ms: 10_000,
            await_auth_ack: false,
            send_delivery_receipts: false,
            auth_rejection_close_codes: DEFAULT_AUTH_REJECTION_CLOSE_CODES.to_vec(),
            channel_capacity: 256,
        }
    }
}

impl ConnectionConfig {
    /// 从 JSON 配置文件加载并校验配置。
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件 '{}' 的内容", path.display()))?;
        let config = Self::from_json_str(&config_str)
            .with_context(|| format!("配置文件 '{}' 无效", path.display()))?;
        log::info!(
            "[连接配置] 已从 '{}' 加载配置: 心跳间隔 {}ms, 最大重连次数 {:?}",
            path.display(),
            config.heartbeat_interval_ms,
            config.max_reconnect_attempts
        );
        Ok(config)
    }

    /// 从 JSON 文本解析并校验配置。
    pub fn from_json_str(json: &str) -> Result<Self, WsError> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            WsError::DeserializationError(format!("解析 ConnectionConfig 失败: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 检查各项取值是否合法。
    pub fn validate(&self) -> Result<(), WsError> {
        if self.heartbeat_interval_ms == 0 {
            return Err(WsError::InvalidConfig("heartbeat_interval_ms 必须大于 0".into()));
        }
        if self.base_reconnect_delay_ms == 0 {
            return Err(WsError::InvalidConfig("base_reconnect_delay_ms 必须大于 0".into()));
        }
        if self.max_reconnect_delay_ms < self.base_reconnect_delay_ms {
            return Err(WsError::InvalidConfig(format!(
                "max_reconnect_delay_ms ({}) 不能小于 base_reconnect_delay_ms ({})",
                self.max_reconnect_delay_ms, self.base_reconnect_delay_ms
            )));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(WsError::InvalidConfig(format!(
                "backoff_factor 必须 >= 1.0，实际为 {}",
                self.backoff_factor
            )));
        }
        if !(0.0..1.0).contains(&self.jitter_ratio) {
            return Err(WsError::InvalidConfig(format!(
                "jitter_ratio 必须位于 [0, 1) 区间，实际为 {}",
                self.jitter_ratio
            )));
        }
        if self.connect_timeout_ms == 0 || self.send_timeout_ms == 0 {
            return Err(WsError::InvalidConfig("连接与发送超时必须大于 0".into()));
        }
        let timers = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("max_reconnect_delay_ms", self.max_reconnect_delay_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("send_timeout_ms", self.send_timeout_ms),
        ];
        for (name, value) in timers {
            if value > MAX_TIMER_MS {
                return Err(WsError::InvalidConfig(format!(
                    "{} 不能超过 {} (24 小时)，实际为 {}",
                    name, MAX_TIMER_MS, value
                )));
            }
        }
        if self.channel_capacity == 0 {
            return Err(WsError::InvalidConfig("channel_capacity 必须大于 0".into()));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// 入站静默超过此时长即判定连接已死。
    pub fn liveness_deadline(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.saturating_add(self.heartbeat_timeout_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn is_auth_rejection_code(&self, code: u16) -> bool {
        self.auth_rejection_close_codes.contains(&code)
    }
}
