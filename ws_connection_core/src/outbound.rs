// ws_connection_core/src/outbound.rs

//! 未连接期间的待发送队列。严格先进先出，不重排、不去重。

use std::collections::VecDeque;

use crate::message::Envelope;

#[derive(Debug, Clone, PartialEq)]
pub struct PendingSend {
    /// 单调递增的提交序号。
    pub seq: u64,
    pub envelope: Envelope,
}

#[derive(Debug, Default)]
pub struct PendingQueue {
    items: VecDeque<PendingSend>,
    next_seq: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队并返回分配的序号。
    pub fn push(&mut self, envelope: Envelope) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push_back(PendingSend { seq, envelope });
        seq
    }

    /// 按提交顺序取出全部待发送项。
    pub fn drain(&mut self) -> Vec<PendingSend> {
        self.items.drain(..).collect()
    }

    /// 把未能写出的项按原序号放回队首。
    pub fn restore(&mut self, items: Vec<PendingSend>) {
        for item in items.into_iter().rev() {
            self.items.push_front(item);
        }
    }

    /// 丢弃全部待发送项，返回丢弃的数量。序号不回退。
    pub fn clear(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
