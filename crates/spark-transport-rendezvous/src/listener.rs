use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener as TokioTcpListener, TcpStream as TokioTcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle as TaskHandle;

use crate::address::{Address, SequenceNumber};
use crate::config::{ListenerConfig, SocketOptions};
use crate::error::{self, TransportError};
use crate::ops;
use crate::reactor::Loop;
use crate::rendezvous::{ArrivalOutcome, ConnectCallback, RendezvousStore, WaitOutcome};
use crate::socket::{Socket, bind_listener};

/// 监听器的生命周期状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerState {
    /// 被动套接字已注册到事件循环，正在接受连接。
    Listening,
    /// 已显式关闭，不再接受连接，新的等待会被拒绝。
    Closed,
}

/// 监听端：持有被动套接字，接受入站连接并执行序列号握手，把连接与等待者汇合。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 运行时中的对端以进程序号而非套接字地址标识；拨号端先用 [`Listener::next_address`]
///   取得“监听地址 + 新序列号”，带外交给远端，远端连上后立刻写出该序列号，
///   监听器据此把入站连接交给对应的 [`Listener::wait_for_connection`] 调用方。
///
/// ## 逻辑 (How)
/// - `bind`：经 `socket2` 建套接字、开启地址复用、绑定、监听，并在事件循环上启动接受循环；
/// - 接受循环：每次就绪都把待接受连接一次取尽；对每条连接应用 [`SocketOptions`]，
///   再提交一次“读取序列号”操作，受 `handshake_timeout` 约束，监听器关闭时随之取消；
///   读取成功后调用内部的 `have_connection`；
/// - 汇合：由 [`RendezvousStore`] 在锁内决定先到/后到，回调总在锁外执行：
///   入站后到时在循环线程上直接调用，等待后到时经 [`Loop::defer`] 延迟调用。
///
/// ## 契约 (What)
/// - `next_address`、`wait_for_connection` 可在任意线程并发调用；
/// - 对每个序列号，交付连接的回调恰好触发一次；
/// - `wait_for_connection` 的 `timeout` 到期时，若仍未匹配，回调以
///   [`TransportError::Timeout`] 触发，序列号随之退役；匹配或关闭时计时器立即释放；
/// - `close` 之后，循环上不再留有属于本监听器的握手或计时器操作；
/// - **致命错误**：`accept` 返回 `WouldBlock` 以外的错误意味着监听套接字本身不可用，
///   记录日志后终止进程。
///
/// ## 注意事项 (Trade-offs)
/// - 握手读取失败的连接只记录日志并丢弃：此时不知道对端声明的序列号，无法通知具体的等待者，
///   等待者由超时得知失败；
/// - 被丢弃（序列号未分配、已退役或重复）的入站连接同样只记录日志。
#[derive(Debug)]
pub struct Listener {
    shared: Arc<Shared>,
    accept_task: Mutex<Option<TaskHandle<()>>>,
}

#[derive(Debug)]
struct Shared {
    lp: Arc<Loop>,
    local_addr: SocketAddr,
    options: SocketOptions,
    handshake_timeout: Duration,
    store: RendezvousStore<Arc<Socket>>,
    /// 关闭信号；进行中的握手订阅它，关闭后立即放弃并释放套接字。
    closed: watch::Sender<bool>,
}

impl Listener {
    /// 按 `config` 绑定并开始监听。
    pub fn bind(lp: &Arc<Loop>, config: ListenerConfig) -> Result<Self, TransportError> {
        let listener = bind_listener(lp, &config)?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| TransportError::system(error::BIND, err))?;

        let shared = Arc::new(Shared {
            lp: Arc::clone(lp),
            local_addr,
            options: config.socket_options(),
            handshake_timeout: config.handshake_timeout(),
            store: RendezvousStore::new(),
            closed: watch::Sender::new(false),
        });
        let accept_task = lp.spawn_background(accept_loop(listener, Arc::downgrade(&shared)));
        tracing::debug!(local = %local_addr, backlog = config.backlog(), "listener started");

        Ok(Self {
            shared,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// 监听器实际绑定的地址。
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// 分配新序列号，并与本地监听地址组成 [`Address`]。
    pub fn next_address(&self) -> Address {
        Address::new(self.shared.local_addr, self.shared.store.allocate())
    }

    /// 等待声明了 `address.seq()` 的入站连接。
    ///
    /// # 教案级注释
    ///
    /// ## 契约（What）
    /// - 连接已先到达：回调经 [`Loop::defer`] 在循环线程上以 `Ok(socket)` 调用，
    ///   绝不在本函数内同步调用；
    /// - 连接尚未到达：保存回调并立即返回；到达时在循环线程上调用；
    /// - `timeout` 到期仍未到达：回调以 [`TransportError::Timeout`] 调用；
    ///   `Duration::MAX` 表示不设时限；
    /// - 同一序列号已有等待、序列号未分配或已退役、监听器已关闭：回调以相应错误延迟调用。
    pub fn wait_for_connection<F>(&self, address: &Address, timeout: Duration, callback: F)
    where
        F: FnOnce(Result<Arc<Socket>, TransportError>) + Send + 'static,
    {
        let seq = address.seq();
        // 回调被调用（或随关闭丢弃）时 `timer_guard` 一并释放，计时器据此提前结束。
        let (timer_guard, timer_released) = oneshot::channel::<()>();
        let callback: ConnectCallback<Arc<Socket>> = Box::new(move |result| {
            drop(timer_guard);
            callback(result);
        });
        match self.shared.store.wait(seq, callback) {
            WaitOutcome::Pending => {
                tracing::debug!(seq, ?timeout, "waiting for inbound connection");
                self.shared.arm_timeout(seq, timeout, timer_released);
            }
            WaitOutcome::Matched { socket, callback } => {
                tracing::debug!(seq, peer = %socket.peer_addr(), "inbound connection already arrived");
                self.shared.lp.defer(move || callback(Ok(socket)));
            }
            WaitOutcome::Rejected { callback, error } => {
                tracing::debug!(seq, %error, "wait rejected");
                self.shared.lp.defer(move || callback(Err(error)));
            }
        }
    }

    /// 停止接受连接，放弃进行中的握手，丢弃未认领的入站连接，并以
    /// [`TransportError::ListenerClosed`] 结束全部未完成的等待。重复调用无副作用。
    pub fn close(&self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
        self.shared.closed.send_replace(true);
        let (callbacks, sockets) = self.shared.store.close();
        if !callbacks.is_empty() || !sockets.is_empty() {
            tracing::debug!(
                local = %self.shared.local_addr,
                waits = callbacks.len(),
                unclaimed = sockets.len(),
                "listener closed with outstanding rendezvous"
            );
        }
        drop(sockets);
        for callback in callbacks {
            self.shared
                .lp
                .defer(move || callback(Err(TransportError::ListenerClosed)));
        }
    }

    pub fn state(&self) -> ListenerState {
        if self.shared.store.is_closed() {
            ListenerState::Closed
        } else {
            ListenerState::Listening
        }
    }

    /// 已登记、尚未匹配的等待数。
    pub fn pending_waits(&self) -> usize {
        self.shared.store.pending_waits()
    }

    /// 已完成握手、尚未被等待者认领的入站连接数。
    pub fn unclaimed_connections(&self) -> usize {
        self.shared.store.unclaimed_connections()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    /// 接受到一条入站连接：应用套接字选项，随后在时限内读取对端声明的序列号。
    fn on_accept(self: &Arc<Self>, stream: TokioTcpStream, peer: SocketAddr) {
        let socket = match Socket::from_stream(stream).and_then(|socket| {
            socket.apply(&self.options)?;
            Ok(socket)
        }) {
            Ok(socket) => Arc::new(socket),
            Err(err) => {
                tracing::warn!(%peer, error = %err, "failed to configure inbound connection; dropping it");
                return;
            }
        };

        let shared = Arc::downgrade(self);
        let mut closed = self.closed.subscribe();
        let timeout = self.handshake_timeout;
        self.lp.submit(async move {
            let handshake =
                tokio::time::timeout(timeout, ops::read_value::<SequenceNumber>(&socket));
            let result = tokio::select! {
                result = handshake => result
                    .unwrap_or_else(|_| Err(TransportError::HandshakeTimeout { peer, timeout })),
                _ = closed.wait_for(|closed| *closed) => {
                    tracing::debug!(%peer, "listener closed during handshake; dropping inbound connection");
                    return;
                }
            };
            match result {
                Ok(seq) => {
                    if let Some(shared) = shared.upgrade() {
                        shared.have_connection(socket, seq);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        %peer,
                        error = %err,
                        "sequence number handshake failed; dropping inbound connection"
                    );
                }
            }
        });
    }

    /// 入站连接完成握手后登记到汇合存储；若等待者已在，直接在当前（循环）线程上回调。
    fn have_connection(&self, socket: Arc<Socket>, seq: SequenceNumber) {
        match self.store.arrive(seq, socket) {
            ArrivalOutcome::Stored => {
                tracing::debug!(seq, "inbound connection stored until a wait arrives");
            }
            ArrivalOutcome::Matched { socket, callback } => {
                tracing::debug!(seq, peer = %socket.peer_addr(), "inbound connection matched");
                callback(Ok(socket));
            }
            ArrivalOutcome::Discarded { socket, reason } => {
                tracing::warn!(
                    seq,
                    peer = %socket.peer_addr(),
                    ?reason,
                    "inbound connection cannot rendezvous; dropping it"
                );
            }
        }
    }

    /// 计时器作为循环持有的操作运行，`released` 完成（等待已被交付或丢弃）时立即结束。
    fn arm_timeout(
        self: &Arc<Self>,
        seq: SequenceNumber,
        timeout: Duration,
        released: oneshot::Receiver<()>,
    ) {
        if timeout == Duration::MAX {
            return;
        }
        let shared = Arc::downgrade(self);
        self.lp.submit(async move {
            tokio::select! {
                () = tokio::time::sleep(timeout) => {}
                _ = released => return,
            }
            let Some(shared) = shared.upgrade() else {
                return;
            };
            if let Some(callback) = shared.store.expire(seq) {
                tracing::debug!(seq, ?timeout, "wait for inbound connection timed out");
                callback(Err(TransportError::Timeout { seq, timeout }));
            }
        });
    }
}

async fn accept_loop(listener: TokioTcpListener, shared: Weak<Shared>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => fatal_accept_error(&err),
        };
        let Some(shared) = shared.upgrade() else {
            return;
        };
        shared.on_accept(stream, peer);
    }
}

fn fatal_accept_error(err: &io::Error) -> ! {
    tracing::error!(
        error = %err,
        code = error::ACCEPT.code,
        "accept failed; listening socket is unusable"
    );
    eprintln!("accept: {err}");
    std::process::abort()
}

/// `Listener` 的建造器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 让调用方在启动前一次性给出绑定地址、`listen` 队列长度与入站连接的套接字选项；
///
/// ## 契约（What）
/// - `new`：以绑定地址创建，其余取 [`ListenerConfig`] 默认值（握手时限为
///   [`DEFAULT_HANDSHAKE_TIMEOUT`](crate::DEFAULT_HANDSHAKE_TIMEOUT)）；
/// - `build`：在 `lp` 上绑定并启动接受循环，失败时返回操作名为 `"bind"` 或 `"listen"` 的 `System` 错误。
#[derive(Clone, Debug)]
pub struct ListenerBuilder {
    config: ListenerConfig,
}

impl ListenerBuilder {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            config: ListenerConfig::new(addr),
        }
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.config = self.config.with_backlog(backlog);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_handshake_timeout(timeout);
        self
    }

    pub fn with_socket_options(mut self, options: SocketOptions) -> Self {
        self.config = self.config.with_socket_options(options);
        self
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn build(self, lp: &Arc<Loop>) -> Result<Listener, TransportError> {
        Listener::bind(lp, self.config)
    }
}
