use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream as TokioTcpStream;

use crate::address::Address;
use crate::config::SocketOptions;
use crate::error::{self, TransportError};
use crate::ops;
use crate::reactor::Loop;
use crate::socket::Socket;

/// 拨号到 `address`，并按线上契约立刻写出其序列号。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 这是 [`Listener`](crate::Listener) 握手的另一半：远端拿到带外传来的 [`Address`] 后，
///   连上监听地址并在任何其他流量之前写出 8 字节序列号（本机字节序，无分帧）。
///
/// ## 逻辑 (How)
/// - 在事件循环上建立连接，`timeout` 限制建连耗时；
/// - 应用 [`SocketOptions`]（默认关闭 Nagle），随后执行一次定长值写；
/// - 目标为通配地址时改连同族的回环地址。
///
/// ## 契约 (What)
/// - 回调在循环线程上恰好调用一次：成功时交付已完成握手的套接字；
///   建连超时返回 [`TransportError::ConnectTimeout`]，建连失败返回操作名为 `"connect"` 的 `System`，
///   序列号写失败返回操作名为 `"write"` 的 `System` 或 `ShortTransfer`。
pub fn connect<F>(lp: &Loop, address: Address, timeout: Duration, callback: F)
where
    F: FnOnce(Result<Arc<Socket>, TransportError>) + Send + 'static,
{
    connect_with_options(lp, address, timeout, SocketOptions::default(), callback);
}

/// 与 [`connect`] 相同，但使用调用方给出的套接字选项。
pub fn connect_with_options<F>(
    lp: &Loop,
    address: Address,
    timeout: Duration,
    options: SocketOptions,
    callback: F,
) where
    F: FnOnce(Result<Arc<Socket>, TransportError>) + Send + 'static,
{
    lp.submit(async move {
        let result = dial(address, timeout, options).await;
        if let Err(err) = &result {
            tracing::debug!(%address, error = %err, "dial failed");
        }
        callback(result);
    });
}

async fn dial(
    address: Address,
    timeout: Duration,
    options: SocketOptions,
) -> Result<Arc<Socket>, TransportError> {
    let addr = dial_target(address.sockaddr());
    let stream = match tokio::time::timeout(timeout, TokioTcpStream::connect(addr)).await {
        Ok(stream) => stream.map_err(|err| TransportError::system(error::CONNECT, err))?,
        Err(_) => return Err(TransportError::ConnectTimeout { addr, timeout }),
    };

    let configure = |err| TransportError::system(error::CONFIGURE, err);
    let socket = Socket::from_stream(stream).map_err(configure)?;
    socket.apply(&options).map_err(configure)?;

    ops::write_value(&socket, address.seq()).await?;
    tracing::debug!(%address, local = %socket.local_addr(), "dialed and sent sequence number");
    Ok(Arc::new(socket))
}

/// 通配地址不可作为连接目标，替换为同族回环地址。
pub fn dial_target(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_targets_map_to_loopback() {
        let v4: SocketAddr = "0.0.0.0:9000".parse().expect("v4");
        assert_eq!(dial_target(v4), "127.0.0.1:9000".parse().expect("v4 loopback"));
        let v6: SocketAddr = "[::]:9000".parse().expect("v6");
        assert_eq!(dial_target(v6), "[::1]:9000".parse().expect("v6 loopback"));
        let concrete: SocketAddr = "10.1.2.3:9000".parse().expect("concrete");
        assert_eq!(dial_target(concrete), concrete);
    }
}
