// ws_connection_core/src/heartbeat.rs

//! 心跳监视器。
//!
//! 连接处于 Connected 时按固定间隔触发一次回调，由 `ConnectionManager` 在回调中
//! 写出心跳消息并检查存活窗口。任何入站流量 (消息帧、Ping/Pong) 都会刷新
//! `last_ack_at`；当静默时长超过 `心跳间隔 + 心跳超时` 时，连接被判定为已死。
//!
//! 监视器本身不持有连接的任何引用，定时任务只通过回调与外界交互。

use std::time::Duration;

use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// 心跳存活窗口。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatWindow {
    /// 最近一次发出心跳的时刻，本次连接尚未发送过则为 `None`。
    pub last_sent_at: Option<Instant>,
    /// 最近一次收到任何入站流量的时刻。
    pub last_ack_at: Instant,
}

/// 心跳监视器：按固定间隔触发回调，并记录入站流量以判断链路是否存活。
pub struct HeartbeatMonitor {
    interval: Duration,
    /// 允许的最长入站静默，通常为 `心跳间隔 + 心跳超时`。
    deadline: Duration,
    window: HeartbeatWindow,
    ticker: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    /// 创建监视器，不启动定时任务。
    ///
    /// # Arguments
    ///
    /// * `interval` - 心跳间隔。
    /// * `deadline` - 存活期限，见 `ConnectionConfig::liveness_deadline`。
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self {
            interval,
            deadline,
            window: HeartbeatWindow {
                last_sent_at: None,
                last_ack_at: Instant::now(),
            },
            ticker: None,
        }
    }

    /// 重置存活窗口并启动定时任务。第一次回调发生在一个完整间隔之后。
    ///
    /// `on_tick` 返回 `false` 时定时任务自行结束。已有的定时任务会先被停止。
    pub fn start<F>(&mut self, mut on_tick: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.stop();
        let now = Instant::now();
        self.window = HeartbeatWindow {
            last_sent_at: None,
            last_ack_at: now,
        };
        let period = self.interval;
        let Some(first_tick) = now.checked_add(period) else {
            warn!("[心跳监视器] 心跳间隔 {:?} 过大，无法启动心跳定时器", period);
            return;
        };
        debug!("[心跳监视器] 启动心跳定时器，间隔 {:?}，存活期限 {:?}", period, self.deadline);
        self.ticker = Some(tokio::spawn(async move {
            let mut ticker = interval_at(first_tick, period);
            // 进程挂起后恢复时不补发积压的心跳
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !on_tick() {
                    break;
                }
            }
        }));
    }

    /// 停止定时任务。未启动时调用无副作用。
    pub fn stop(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
            debug!("[心跳监视器] 心跳定时器已停止");
        }
    }

    /// 放弃对定时任务的持有但不中止它。只应在定时任务自己的回调里、
    /// 回调随后返回 `false` 的情况下使用。
    pub fn release(&mut self) {
        self.ticker = None;
    }

    /// 定时任务是否在运行。
    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// 记录一次入站流量。
    pub fn record_inbound(&mut self) {
        self.window.last_ack_at = Instant::now();
    }

    /// 记录一次心跳发送。
    pub fn record_sent(&mut self) {
        self.window.last_sent_at = Some(Instant::now());
    }

    /// 自最近一次入站流量起经过的时长。
    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.window.last_ack_at)
    }

    /// 静默时长是否已超过存活期限。
    pub fn is_expired(&self, now: Instant) -> bool {
        self.silent_for(now) > self.deadline
    }

    /// 当前存活窗口的快照。
    pub fn window(&self) -> HeartbeatWindow {
        self.window
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}
