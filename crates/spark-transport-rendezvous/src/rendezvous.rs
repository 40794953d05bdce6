//! # rendezvous 模块说明
//!
//! ## 角色定位（Why）
//! - 入站连接到达（循环线程）与 `wait_for_connection`（任意调用方线程）相互竞争，
//!   谁先谁后都可能；两张以序列号为键的映射让两种顺序完全对称：
//!   先到的一方把自己存进去，后到的一方取走对方并完成匹配；
//! - 序列号的分配与两张映射共用同一把锁，保证“分配 → 等待/到达 → 匹配”是线性化的。
//!
//! ## 设计要求（What）
//! - 对同一序列号，两张映射合计最多只有一个条目；匹配后两侧条目都被移除，序列号被“退役”，
//!   之后不会再被插入任何一侧；
//! - 存储只返回结果（[`WaitOutcome`] / [`ArrivalOutcome`]），绝不在持锁期间调用回调，
//!   由调用方在锁外决定同步调用还是延迟调用。
//!
//! ## 扩展建议（How）
//! - 超时淘汰通过 [`RendezvousStore::expire`] 实现：锁内移除即“认领”，
//!   因此超时回调与匹配回调不会同时触发。

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::Mutex;

use crate::address::SequenceNumber;
use crate::error::TransportError;

/// 汇合完成（或失败）时的回调。
pub type ConnectCallback<S> = Box<dyn FnOnce(Result<S, TransportError>) + Send + 'static>;

/// 登记等待后的结果。
pub enum WaitOutcome<S> {
    /// 入站连接尚未到达，回调已保存。
    Pending,
    /// 入站连接已先到达，调用方应在锁外把 `socket` 交给 `callback`。
    Matched {
        socket: S,
        callback: ConnectCallback<S>,
    },
    /// 等待被拒绝，调用方应在锁外以 `error` 调用 `callback`。
    Rejected {
        callback: ConnectCallback<S>,
        error: TransportError,
    },
}

/// 入站连接到达后的结果。
pub enum ArrivalOutcome<S> {
    /// 尚无等待者，连接已保存。
    Stored,
    /// 等待者已先登记，调用方应在锁外把 `socket` 交给 `callback`。
    Matched {
        socket: S,
        callback: ConnectCallback<S>,
    },
    /// 连接不能参与汇合，调用方应丢弃它。
    Discarded { socket: S, reason: DiscardReason },
}

/// 入站连接被丢弃的原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscardReason {
    /// 对端声明的序列号从未由本监听器分配。
    Unissued,
    /// 序列号已完成匹配或已超时。
    Retired,
    /// 同一序列号已有一条未被认领的入站连接。
    Duplicate,
    /// 监听器已关闭。
    Closed,
}

struct Inner<S> {
    next_seq: SequenceNumber,
    /// 已分配、尚未匹配也未超时的序列号；不在其中且小于 `next_seq` 即已退役。
    outstanding: HashSet<SequenceNumber>,
    accepted: HashMap<SequenceNumber, S>,
    waiting: HashMap<SequenceNumber, ConnectCallback<S>>,
    closed: bool,
}

impl<S> Inner<S> {
    fn discard_reason(&self, seq: SequenceNumber) -> Option<DiscardReason> {
        if self.closed {
            Some(DiscardReason::Closed)
        } else if seq >= self.next_seq {
            Some(DiscardReason::Unissued)
        } else if !self.outstanding.contains(&seq) {
            Some(DiscardReason::Retired)
        } else if self.accepted.contains_key(&seq) {
            Some(DiscardReason::Duplicate)
        } else {
            None
        }
    }

    fn retire(&mut self, seq: SequenceNumber) {
        self.outstanding.remove(&seq);
    }
}

/// 序列号分配器与汇合存储，自带互斥锁，只暴露变更操作而不暴露映射本身。
///
/// # 教案式说明
/// - **意图 (Why)**：把“谁先到”的竞争收敛到一把锁内，使两种到达顺序都产生恰好一次回调；
/// - **契约 (What)**：
///   - `allocate`：返回从未分配过的序列号，跨线程两两不同；
///   - `wait` / `arrive`：见 [`WaitOutcome`] 与 [`ArrivalOutcome`]；
///   - `expire`：若等待仍在，移除并返回其回调；
///   - `close`：进入关闭态，交出全部未完成的等待与未认领的连接；
/// - **设计权衡 (Trade-offs)**：只记录仍在途的序列号，内存随在途汇合数而非历史总数增长；
///   分配后既不等待也无人连入的序列号会一直占位，直到监听器关闭。
pub struct RendezvousStore<S> {
    inner: Mutex<Inner<S>>,
}

impl<S> RendezvousStore<S> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_seq: 0,
                outstanding: HashSet::new(),
                accepted: HashMap::new(),
                waiting: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// 分配下一个序列号。
    pub fn allocate(&self) -> SequenceNumber {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        if !inner.closed {
            inner.outstanding.insert(seq);
        }
        seq
    }

    /// 为 `seq` 登记等待。
    pub fn wait(&self, seq: SequenceNumber, callback: ConnectCallback<S>) -> WaitOutcome<S> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return WaitOutcome::Rejected {
                callback,
                error: TransportError::ListenerClosed,
            };
        }
        if !inner.outstanding.contains(&seq) {
            return WaitOutcome::Rejected {
                callback,
                error: TransportError::UnknownSequence { seq },
            };
        }
        if inner.waiting.contains_key(&seq) {
            return WaitOutcome::Rejected {
                callback,
                error: TransportError::AlreadyWaiting { seq },
            };
        }

        match inner.accepted.remove(&seq) {
            Some(socket) => {
                inner.retire(seq);
                WaitOutcome::Matched { socket, callback }
            }
            None => {
                inner.waiting.insert(seq, callback);
                WaitOutcome::Pending
            }
        }
    }

    /// 登记一条声明了 `seq` 的入站连接。
    pub fn arrive(&self, seq: SequenceNumber, socket: S) -> ArrivalOutcome<S> {
        let mut inner = self.inner.lock();
        if let Some(reason) = inner.discard_reason(seq) {
            return ArrivalOutcome::Discarded { socket, reason };
        }

        match inner.waiting.remove(&seq) {
            Some(callback) => {
                inner.retire(seq);
                ArrivalOutcome::Matched { socket, callback }
            }
            None => {
                inner.accepted.insert(seq, socket);
                ArrivalOutcome::Stored
            }
        }
    }

    /// 若 `seq` 的等待仍未完成，移除并退役它，返回其回调。
    pub fn expire(&self, seq: SequenceNumber) -> Option<ConnectCallback<S>> {
        let mut inner = self.inner.lock();
        let callback = inner.waiting.remove(&seq)?;
        inner.retire(seq);
        Some(callback)
    }

    /// 进入关闭态，返回全部未完成的等待与未认领的连接。重复调用返回空集合。
    pub fn close(&self) -> (Vec<ConnectCallback<S>>, Vec<S>) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.outstanding.clear();
        let callbacks = inner.waiting.drain().map(|(_, callback)| callback).collect();
        let sockets = inner.accepted.drain().map(|(_, socket)| socket).collect();
        (callbacks, sockets)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// 已登记、尚未匹配的等待数。
    pub fn pending_waits(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    /// 已到达、尚未被认领的入站连接数。
    pub fn unclaimed_connections(&self) -> usize {
        self.inner.lock().accepted.len()
    }
}

impl<S> Default for RendezvousStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for RendezvousStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RendezvousStore")
            .field("next_seq", &inner.next_seq)
            .field("accepted", &inner.accepted.len())
            .field("waiting", &inner.waiting.len())
            .field("outstanding", &inner.outstanding.len())
            .field("closed", &inner.closed)
            .finish()
    }
}
