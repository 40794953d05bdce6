//! 单线程事件循环。
//!
//! # 模块定位（Why）
//! - 所有就绪事件分发、定长值操作的完成回调以及延迟闭包都在同一条专用线程上执行，
//!   调用方线程永远不会被阻塞；
//! - 以 Tokio 的 current-thread 运行时承担 epoll/kqueue 注册与分发，
//!   一次性注册（one-shot）由“任务等待一次就绪后结束”自然表达。
//!
//! # 暴露接口（What）
//! - [`Loop::defer`]：把闭包排到循环线程上执行，绝不在调用方栈上同步运行；
//! - [`Loop::pending_operations`]：当前仍由循环持有的操作数，用于确认操作在完成后被释放；
//! - 内部的 `submit`：把操作移入循环的任务表，完成或循环关闭时随任务一起被丢弃。
//!
//! # 设计要点（How）
//! - 运行时在构造线程上创建，移动到专用线程上 `block_on` 一个关闭信号；
//! - 最后一个 `Arc<Loop>` 被丢弃时发送关闭信号；若不在循环线程上，还会等待线程退出。

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::runtime::{Builder, EnterGuard, Handle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle as TaskHandle;

use crate::error::{SPAWN_LOOP, TransportError};

const DEFAULT_LOOP_NAME: &str = "spark-rendezvous-loop";

/// 事件循环句柄，通常以 `Arc<Loop>` 在监听器、拨号端与调用方之间共享。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 为定长值读写与监听器提供唯一的“反应堆”：注册、就绪分发与延迟执行都发生在
///   这条线程上，因此同一序列号的汇合回调不会与接受循环并发执行。
///
/// ## 契约 (What)
/// - `defer`：闭包一定在循环线程上、在调用返回之后执行；
/// - `pending_operations`：已提交但尚未完成（也未被丢弃）的操作数；
/// - **后置条件**：循环关闭后提交的操作会被立即丢弃，回调不会触发。
///
/// ## 注意事项 (Trade-offs)
/// - 循环关闭时尚未完成的操作被直接丢弃，其回调永远不会被调用；
///   需要“恰好一次”交付的调用方应保证在关闭前等待结果。
#[derive(Debug)]
pub struct Loop {
    handle: Handle,
    thread_id: ThreadId,
    pending: Arc<AtomicUsize>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Loop {
    /// 以默认线程名启动事件循环。
    pub fn new() -> Result<Arc<Self>, TransportError> {
        Self::with_name(DEFAULT_LOOP_NAME)
    }

    /// 以指定线程名启动事件循环。
    pub fn with_name(name: impl Into<String>) -> Result<Arc<Self>, TransportError> {
        let runtime = Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()
            .map_err(|err| TransportError::system(SPAWN_LOOP, err))?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let name = name.into();
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
            })
            .map_err(|err| TransportError::system(SPAWN_LOOP, err))?;
        let thread_id = thread.thread().id();
        tracing::debug!(loop_name = %name, "event loop started");

        Ok(Arc::new(Self {
            handle,
            thread_id,
            pending: Arc::new(AtomicUsize::new(0)),
            shutdown: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(thread)),
        }))
    }

    /// 在循环线程上执行 `f`。
    pub fn defer<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(async move { f() });
    }

    /// 当前由循环持有、尚未结束的操作数。
    pub fn pending_operations(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// 调用方是否运行在本循环的线程上。
    pub fn is_loop_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// 把一次性操作移入循环的任务表。
    ///
    /// 计数在提交时加一，任务被丢弃时减一：无论是正常完成还是循环关闭。
    pub(crate) fn submit<F>(&self, operation: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = PendingGuard::new(Arc::clone(&self.pending));
        drop(self.handle.spawn(async move {
            let _guard = guard;
            operation.await;
        }));
    }

    /// 启动不计入 `pending_operations` 的常驻任务（接受循环）。
    pub(crate) fn spawn_background<F>(&self, task: F) -> TaskHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(task)
    }

    /// 进入运行时上下文，以便把标准库套接字注册到本循环的反应堆。
    pub(crate) fn enter(&self) -> EnterGuard<'_> {
        self.handle.enter()
    }
}

impl Drop for Loop {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            if self.is_loop_thread() {
                // 在循环线程上无法等待自身退出，交由 block_on 返回后自然结束。
                return;
            }
            if thread.join().is_err() {
                tracing::error!("event loop thread panicked");
            }
        }
    }
}

struct PendingGuard {
    counter: Arc<AtomicUsize>,
}

impl PendingGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self { counter }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
