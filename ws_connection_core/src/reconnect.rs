// ws_connection_core/src/reconnect.rs

//! 重连调度器：指数退避 + 抖动 + 上限。
//!
//! 第 `n` 次重连前的等待时间为
//! `min(base × m × factor^n × (1 + s), max)`，其中 `s` 在 `[-jitter, +jitter]`
//! 内均匀取样，`m` 为网络质量系数 (未提供时为 1)。

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use rand::Rng;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::ConnectionConfig;

/// 网络质量协作者。弱网环境下返回大于 1 的系数以放慢重连节奏。
pub trait NetworkQuality: Send + Sync {
    fn delay_multiplier(&self) -> f64;
}

/// 当前的重连进度。
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectAttempt {
    /// 本轮断线以来已经发起的重连次数。
    pub count: u32,
    /// 下一次重连前要等待的毫秒数。
    pub next_delay_ms: u64,
}

impl ReconnectAttempt {
    /// `next_delay_ms` 对应的等待时长。
    pub fn next_delay(&self) -> Duration {
        Duration::from_millis(self.next_delay_ms)
    }
}

/// 指数退避策略。
///
/// 计算方式见模块文档。
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// 第一次重连前的基础等待毫秒数。
    pub base_delay_ms: u64,
    /// 等待上限。
    pub max_delay_ms: u64,
    /// 每次重连的放大倍数。
    pub factor: f64,
    /// 抖动比例，0.2 表示在 ±20% 内随机。
    pub jitter_ratio: f64,
    /// 一轮断线内最多发起的重连次数，`None` 表示不限。
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// 由连接配置得到退避策略。
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            base_delay_ms: config.base_reconnect_delay_ms,
            max_delay_ms: config.max_reconnect_delay_ms,
            factor: config.backoff_factor,
            jitter_ratio: config.jitter_ratio,
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

/// 重连调度器：计算退避等待并持有唯一的重连定时器。
///
/// 同一时刻至多有一个定时器在等待，重复 `schedule` 会替换旧的。
pub struct ReconnectScheduler {
    policy: ReconnectPolicy,
    network: Option<Arc<dyn NetworkQuality>>,
    timer: Option<JoinHandle<()>>,
}

impl ReconnectScheduler {
    /// 创建调度器。
    ///
    /// # Arguments
    ///
    /// * `policy` - 退避策略。
    /// * `network` - 可选的网络质量协作者，其系数乘在等待时间上。
    pub fn new(policy: ReconnectPolicy, network: Option<Arc<dyn NetworkQuality>>) -> Self {
        Self {
            policy,
            network,
            timer: None,
        }
    }

    /// 当前使用的退避策略。
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    fn multiplier(&self) -> f64 {
        self.network
            .as_ref()
            .map(|n| n.delay_multiplier())
            .filter(|m| m.is_finite() && *m > 0.0)
            .unwrap_or(1.0)
    }

    /// 连接成功或显式 connect 后的初始进度。
    ///
    /// 首次等待同样带抖动。
    pub fn initial_attempt(&self) -> ReconnectAttempt {
        let mut first = ReconnectAttempt {
            count: 0,
            next_delay_ms: 0,
        };
        first.next_delay_ms = self.next_delay(&first);
        first
    }

    /// 以随机抖动计算 `attempt` 对应的等待时间。
    pub fn next_delay(&self, attempt: &ReconnectAttempt) -> u64 {
        let jitter = self.policy.jitter_ratio;
        let sample = if jitter > 0.0 {
            rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            0.0
        };
        self.next_delay_with(attempt, sample)
    }

    /// 同 `next_delay`，但抖动取样由调用方给出。
    pub fn next_delay_with(&self, attempt: &ReconnectAttempt, sample: f64) -> u64 {
        let exponent = i32::try_from(attempt.count).unwrap_or(i32::MAX);
        let raw = self.policy.base_delay_ms as f64
            * self.multiplier()
            * self.policy.factor.powi(exponent)
            * (1.0 + sample);
        raw.min(self.policy.max_delay_ms as f64).max(0.0).round() as u64
    }

    /// 已发起的次数达到上限时放弃。
    pub fn should_give_up(&self, attempt: &ReconnectAttempt) -> bool {
        match self.policy.max_attempts {
            Some(max) => attempt.count >= max,
            None => false,
        }
    }

    /// 计数加一并算出下一次的等待时间。在新的连接尝试发起前调用。
    pub fn advance(&self, attempt: &ReconnectAttempt) -> ReconnectAttempt {
        let mut next = ReconnectAttempt {
            count: attempt.count.saturating_add(1),
            next_delay_ms: 0,
        };
        next.next_delay_ms = self.next_delay(&next);
        next
    }

    /// 等待 `delay` 后执行 `fire`。已有的定时器会被取消。
    pub fn schedule<F>(&mut self, delay: Duration, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        debug!("[重连调度器] {:?} 后发起重连", delay);
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
        }));
    }

    /// 取消等待中的重连定时器。没有定时器时调用无副作用。
    pub fn cancel(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
            debug!("[重连调度器] 已取消待触发的重连定时器");
        }
    }

    /// 定时器已触发，放弃句柄而不中止正在执行回调的任务。
    pub fn release_fired(&mut self) {
        self.timer = None;
    }

    /// 是否有重连定时器在等待。
    pub fn is_scheduled(&self) -> bool {
        self.timer.is_some()
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}
