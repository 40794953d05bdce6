use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream};

use socket2::{Domain, Protocol, Socket as RawSocket, Type};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream as TokioTcpStream};

use crate::config::{ListenerConfig, SocketOptions};
use crate::error::{self, TransportError};
use crate::reactor::Loop;

/// 已连接的非阻塞 TCP 套接字，以 `Arc<Socket>` 在操作与上层连接之间共享。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 定长值读写只需要“等待一次就绪 + 尝试一次系统调用”，`Socket` 暴露的正是这两步，
///   不做缓冲也不做分帧；
/// - 汇合完成后交给上层的也是同一个 `Arc<Socket>`，上层可借 [`Socket::stream`]
///   继续收发消息。
///
/// ## 契约 (What)
/// - 构造时已注册到某个 [`Loop`] 的反应堆，只能在该循环上等待就绪；
/// - 同一套接字上的并发读（或并发写）不由本层串行化，调用方需自行保证；
/// - 只要仍有操作引用该 `Arc<Socket>`，底层描述符就不会被关闭。
#[derive(Debug)]
pub struct Socket {
    stream: TokioTcpStream,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl Socket {
    pub(crate) fn from_stream(stream: TokioTcpStream) -> io::Result<Self> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        Ok(Self {
            stream,
            local_addr,
            peer_addr,
        })
    }

    /// 把已连接的标准库套接字接入 `lp` 的反应堆。
    pub fn from_std(lp: &Loop, stream: StdTcpStream) -> Result<Self, TransportError> {
        let configure = |err| TransportError::system(error::CONFIGURE, err);
        stream.set_nonblocking(true).map_err(configure)?;
        let _enter = lp.enter();
        let stream = TokioTcpStream::from_std(stream).map_err(configure)?;
        Self::from_stream(stream).map_err(configure)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// 底层 Tokio 流，供汇合完成后的上层协议使用。
    pub fn stream(&self) -> &TokioTcpStream {
        &self.stream
    }

    pub fn set_no_delay(&self, no_delay: bool) -> io::Result<()> {
        self.stream.set_nodelay(no_delay)
    }

    pub fn no_delay(&self) -> io::Result<bool> {
        self.stream.nodelay()
    }

    pub(crate) fn apply(&self, options: &SocketOptions) -> io::Result<()> {
        options.apply(&self.stream)
    }

    /// 等待一次读就绪，随后执行一次非阻塞读。
    ///
    /// 就绪通知可能是伪唤醒：此时 `try_read` 返回 `WouldBlock`，Tokio 清除就绪位后重新等待，
    /// 这不算一次真正的读尝试。
    pub(crate) async fn read_once(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            self.stream.readable().await?;
            match self.stream.try_read(buf) {
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                result => return result,
            }
        }
    }

    /// 等待一次写就绪，随后执行一次非阻塞写。
    pub(crate) async fn write_once(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            self.stream.writable().await?;
            match self.stream.try_write(buf) {
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                result => return result,
            }
        }
    }
}

/// 创建被动套接字：按地址族建套接字、开启地址复用、绑定、以 `backlog` 开始监听，
/// 最后注册到 `lp` 的反应堆。
pub(crate) fn bind_listener(
    lp: &Loop,
    config: &ListenerConfig,
) -> Result<TokioTcpListener, TransportError> {
    let addr = config.bind_addr();
    let bind = |err| TransportError::system(error::BIND, err);

    let socket = RawSocket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind)?;
    socket.set_reuse_address(true).map_err(bind)?;
    socket.set_nonblocking(true).map_err(bind)?;
    socket.bind(&addr.into()).map_err(bind)?;
    socket
        .listen(config.backlog())
        .map_err(|err| TransportError::system(error::LISTEN, err))?;

    let listener: StdTcpListener = socket.into();
    let _enter = lp.enter();
    TokioTcpListener::from_std(listener).map_err(|err| TransportError::system(error::LISTEN, err))
}
