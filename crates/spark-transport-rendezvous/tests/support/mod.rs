//! 集成测试共用的夹具。
//!
//! - **Why**：事件循环运行在独立线程上，测试线程只能通过通道等待回调结果；
//!   这里集中提供“等待结果”“等待操作释放”“造一对已连接套接字”等样板。
//! - **What**：所有等待都有上限 [`WAIT`]，超时即 panic，避免测试卡死。

#![allow(dead_code)]

use std::net::{TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::{Duration, Instant};

use spark_transport_rendezvous::{Loop, Socket};
use tracing_subscriber::EnvFilter;

pub const WAIT: Duration = Duration::from_secs(5);

/// 按 `RUST_LOG` 安装测试日志输出，重复调用无副作用。
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 等待循环持有的操作全部释放。
pub fn wait_idle(lp: &Loop) {
    wait_until("loop operations released", || lp.pending_operations() == 0);
}

pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for: {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

pub fn recv<T>(rx: &Receiver<T>) -> T {
    rx.recv_timeout(WAIT).expect("callback did not fire in time")
}

/// 建立一对回环连接：服务端一侧接入 `lp`，客户端一侧保持为阻塞的标准库套接字。
pub fn socket_pair(lp: &Loop) -> (Arc<Socket>, StdTcpStream) {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind std listener");
    let client = StdTcpStream::connect(listener.local_addr().expect("local addr"))
        .expect("connect std client");
    let (server, _) = listener.accept().expect("accept std client");
    let socket = Socket::from_std(lp, server).expect("adopt server socket");
    (Arc::new(socket), client)
}
