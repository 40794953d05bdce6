use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::SockRef;
use tokio::net::TcpStream as TokioTcpStream;

/// 监听器默认的 `listen` 队列长度。
pub const DEFAULT_BACKLOG: i32 = 128;

/// 入站对端写完序列号的默认时限。
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// 应用到每条已建立连接上的套接字选项。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 握手只传 8 字节，Nagle 算法会把这类小包拖延到下一个 ACK，所以默认关闭；
/// - 入站连接与拨号连接共用同一份选项，保证两端行为一致。
///
/// ## 契约（What）
/// - `reuse_addr`：是否设置 `SO_REUSEADDR`，默认 `true`；
/// - `no_delay`：是否设置 `TCP_NODELAY`，默认 `true`；
/// - `apply` 仅修改内核选项，不触发 IO。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketOptions {
    reuse_addr: bool,
    no_delay: bool,
}

impl SocketOptions {
    pub const fn new() -> Self {
        Self {
            reuse_addr: true,
            no_delay: true,
        }
    }

    pub fn with_reuse_addr(mut self, reuse_addr: bool) -> Self {
        self.reuse_addr = reuse_addr;
        self
    }

    pub fn with_no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = no_delay;
        self
    }

    pub fn reuse_addr(&self) -> bool {
        self.reuse_addr
    }

    pub fn no_delay(&self) -> bool {
        self.no_delay
    }

    pub(crate) fn apply(&self, stream: &TokioTcpStream) -> io::Result<()> {
        SockRef::from(stream).set_reuse_address(self.reuse_addr)?;
        stream.set_nodelay(self.no_delay)
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// 监听器配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把绑定地址、`listen` 队列长度与入站连接的套接字选项集中在一处，
///   由 [`ListenerBuilder`](crate::ListenerBuilder) 一次性注入；
///
/// ## 契约（What）
/// - `bind_addr` 允许通配地址与端口 `0`，实际地址以 `Listener::local_addr` 为准；
/// - `backlog` 必须为正数，非正值在 [`ListenerConfig::with_backlog`] 中被夹到 `1`；
/// - `handshake_timeout`：入站连接在此时限内未写完序列号即被关闭，避免空闲对端长期占用描述符。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerConfig {
    bind_addr: SocketAddr,
    backlog: i32,
    handshake_timeout: Duration,
    socket_options: SocketOptions,
}

impl ListenerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            backlog: DEFAULT_BACKLOG,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            socket_options: SocketOptions::default(),
        }
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog.max(1);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_socket_options(mut self, options: SocketOptions) -> Self {
        self.socket_options = options;
        self
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    pub fn backlog(&self) -> i32 {
        self.backlog
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub fn socket_options(&self) -> SocketOptions {
        self.socket_options
    }
}

impl Default for ListenerConfig {
    /// 绑定 `0.0.0.0:0`，由内核挑选端口。
    fn default() -> Self {
        Self::new(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_reuse_and_no_delay() {
        let config = ListenerConfig::default();
        assert!(config.bind_addr().ip().is_unspecified());
        assert_eq!(config.bind_addr().port(), 0);
        assert_eq!(config.backlog(), DEFAULT_BACKLOG);
        assert_eq!(config.handshake_timeout(), DEFAULT_HANDSHAKE_TIMEOUT);
        assert!(config.socket_options().reuse_addr());
        assert!(config.socket_options().no_delay());
    }

    #[test]
    fn backlog_is_clamped_to_positive() {
        let config = ListenerConfig::default().with_backlog(-5);
        assert_eq!(config.backlog(), 1);
    }

    #[test]
    fn socket_options_builder_overrides() {
        let options = SocketOptions::new().with_no_delay(false).with_reuse_addr(false);
        let config = ListenerConfig::default()
            .with_socket_options(options)
            .with_handshake_timeout(Duration::from_millis(250));
        assert_eq!(config.handshake_timeout(), Duration::from_millis(250));
        assert!(!config.socket_options().no_delay());
        assert!(!config.socket_options().reuse_addr());
    }
}
