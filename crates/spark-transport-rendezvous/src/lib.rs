#![doc = r#"
# spark-transport-rendezvous

## 设计动机（Why）
- **定位**：分布式计算运行时里的对端以进程序号（rank）标识，而不是事先已知的套接字地址。
  两个 rank 之间的 TCP 连接需要“汇合”：拨号端在还不知道对端地址时就先分配一个本地唯一的
  序列号，监听端在入站对端声明该序列号后把连接交给对应的等待者。
- **架构角色**：本 crate 只负责“建立一条可靠字节流”与“定长值异步读写”两件事；
  消息分帧、集合通信算法、流控与重试均由上层负责。
- **设计理念**：单线程事件循环驱动全部 IO，调用方线程只通过 `next_address` 与
  `wait_for_connection` 进入；异步读写操作由事件循环持有，完成即释放。

## 核心契约（What）
- [`Listener::next_address`]：在锁内分配序列号，跨线程两两不同、永不复用；
- [`Listener::wait_for_connection`]：无论入站连接与等待谁先到达，回调恰好触发一次，
  且绝不在持锁期间、也绝不在调用方栈上同步触发；
- [`read`] / [`write`]：一次就绪、一次系统调用，结果分类为成功、系统错误或字节不足；
- **线上契约**：入站连接建立后，对端必须首先写出 8 字节序列号（本机字节序，无分帧）。

## 实现策略（How）
- **事件循环**：[`Loop`] 在专用线程上运行 Tokio current-thread 运行时，提供
  [`Loop::defer`] 延迟执行原语；
- **套接字**：被动套接字经 `socket2` 创建（地址复用、绑定、`listen(backlog)`），
  入站连接关闭 Nagle；
- **汇合**：[`RendezvousStore`] 以两张按序列号索引的映射对称处理两种到达顺序。

## 风险与考量（Trade-offs）
- **握手失败静默**：握手读取失败时无法得知对端声明的序列号，连接被记录日志后丢弃；
  等待者通过 `timeout` 得知失败；
- **致命错误**：`accept` 返回 `WouldBlock` 以外的错误时进程终止；
- **循环关闭**：事件循环关闭时尚未完成的操作被丢弃，其回调不会触发。
"#]

mod address;
mod config;
mod connector;
mod error;
mod listener;
mod ops;
mod reactor;
mod rendezvous;
mod socket;

pub use address::{Address, SEQUENCE_NUMBER_WIRE_LEN, SequenceNumber};
pub use config::{DEFAULT_BACKLOG, DEFAULT_HANDSHAKE_TIMEOUT, ListenerConfig, SocketOptions};
pub use connector::{connect, connect_with_options, dial_target};
pub use error::{ErrorCategory, OperationKind, TransportError};
pub use listener::{Listener, ListenerBuilder, ListenerState};
pub use ops::{Value, read, wire_len, write};
pub use reactor::Loop;
pub use rendezvous::{ArrivalOutcome, ConnectCallback, DiscardReason, RendezvousStore, WaitOutcome};
pub use socket::Socket;
