//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义建连汇合与定长值读写的错误语义，三类错误各有去处：
//!   系统调用失败（`System`）、字节数不足（`ShortTransfer`）、以及监听器层面的
//!   汇合失败（超时、重复等待、未知序列号、监听器关闭）；
//! - 致命配置错误（`accept` 非 `WouldBlock` 失败）不在此枚举中出现，它直接终止进程，
//!   见 [`crate::listener`]。
//!
//! ## 设计要求（What）
//! - 所有错误实现 `thiserror::Error`，并提供稳定错误码 [`TransportError::code`] 与
//!   [`ErrorCategory`] 分类，供上层决定是否重试；
//! - 异步读写从不 panic，失败一律经回调以 `Err(TransportError)` 返回。

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::address::SequenceNumber;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub const BIND: OperationKind = OperationKind {
    code: "spark.transport.rendezvous.bind_failed",
    message: "bind",
};
pub const LISTEN: OperationKind = OperationKind {
    code: "spark.transport.rendezvous.listen_failed",
    message: "listen",
};
pub const ACCEPT: OperationKind = OperationKind {
    code: "spark.transport.rendezvous.accept_failed",
    message: "accept",
};
pub const CONNECT: OperationKind = OperationKind {
    code: "spark.transport.rendezvous.connect_failed",
    message: "connect",
};
pub const READ: OperationKind = OperationKind {
    code: "spark.transport.rendezvous.read_failed",
    message: "read",
};
pub const WRITE: OperationKind = OperationKind {
    code: "spark.transport.rendezvous.write_failed",
    message: "write",
};
pub const CONFIGURE: OperationKind = OperationKind {
    code: "spark.transport.rendezvous.configure_failed",
    message: "configure",
};
pub const SPAWN_LOOP: OperationKind = OperationKind {
    code: "spark.transport.rendezvous.loop_failed",
    message: "spawn loop",
};

const SHORT_TRANSFER_CODE: &str = "spark.transport.rendezvous.short_transfer";
const TIMEOUT_CODE: &str = "spark.transport.rendezvous.timeout";
const CONNECT_TIMEOUT_CODE: &str = "spark.transport.rendezvous.connect_timeout";
const HANDSHAKE_TIMEOUT_CODE: &str = "spark.transport.rendezvous.handshake_timeout";
const ALREADY_WAITING_CODE: &str = "spark.transport.rendezvous.already_waiting";
const UNKNOWN_SEQUENCE_CODE: &str = "spark.transport.rendezvous.unknown_sequence";
const CLOSED_CODE: &str = "spark.transport.rendezvous.listener_closed";

/// 建连与定长值传输的统一错误类型。
///
/// # 教案式说明
/// - **意图 (Why)**：读写原语与监听器都通过回调交付结果，调用方需要一个可匹配的错误枚举
///   来区分“重试有意义”与“放弃本次建连”；
/// - **契约 (What)**：
///   - `System`：系统调用失败，`op` 为失败的操作（错误码与操作名），`source` 保留原始 `io::Error`；
///   - `ShortTransfer`：一次读/写只搬运了 `actual` 字节，少于定长值要求的 `expected`；
///   - `Timeout`：`wait_for_connection` 在 `timeout` 内没有等到序列号 `seq` 的入站连接；
///   - `ConnectTimeout`：拨号端在 `timeout` 内未能连上 `addr`；
///   - `HandshakeTimeout`：入站对端 `peer` 在 `timeout` 内没有写完序列号；
///   - `AlreadyWaiting` / `UnknownSequence` / `ListenerClosed`：汇合请求被监听器拒绝；
/// - **设计权衡 (Trade-offs)**：保留 `io::Error` 使本类型无法 `Clone`，换取完整的 OS 错误信息。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{}: {source}", .op.message)]
    System {
        op: OperationKind,
        #[source]
        source: io::Error,
    },

    #[error("short {op}: transferred {actual} of {expected} bytes")]
    ShortTransfer {
        op: &'static str,
        actual: usize,
        expected: usize,
    },

    #[error("no connection for sequence number {seq} within {timeout:?}")]
    Timeout {
        seq: SequenceNumber,
        timeout: Duration,
    },

    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    #[error("{peer} did not send its sequence number within {timeout:?}")]
    HandshakeTimeout { peer: SocketAddr, timeout: Duration },

    #[error("sequence number {seq} already has a pending wait")]
    AlreadyWaiting { seq: SequenceNumber },

    #[error("sequence number {seq} was never issued or is already retired")]
    UnknownSequence { seq: SequenceNumber },

    #[error("listener closed")]
    ListenerClosed,
}

/// 错误的粗粒度分类，供上层选择重试或放弃。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 换一个序列号重新拨号通常能成功。
    Retryable,
    /// 调用方用法错误或对端不可用，重试无意义。
    NonRetryable,
    /// 等待超过了调用方给出的时限。
    Timeout,
    /// 监听器已关闭。
    Closed,
}

impl TransportError {
    /// 将系统调用失败包装为 `System` 变体。
    pub fn system(kind: OperationKind, source: io::Error) -> Self {
        TransportError::System { op: kind, source }
    }

    /// 构造字节数不足的错误。
    pub fn short_transfer(kind: OperationKind, actual: usize, expected: usize) -> Self {
        TransportError::ShortTransfer {
            op: kind.message,
            actual,
            expected,
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::System { op, .. } => op.code,
            TransportError::ShortTransfer { .. } => SHORT_TRANSFER_CODE,
            TransportError::Timeout { .. } => TIMEOUT_CODE,
            TransportError::ConnectTimeout { .. } => CONNECT_TIMEOUT_CODE,
            TransportError::HandshakeTimeout { .. } => HANDSHAKE_TIMEOUT_CODE,
            TransportError::AlreadyWaiting { .. } => ALREADY_WAITING_CODE,
            TransportError::UnknownSequence { .. } => UNKNOWN_SEQUENCE_CODE,
            TransportError::ListenerClosed => CLOSED_CODE,
        }
    }

    /// 返回错误分类。
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransportError::System { source, .. } => categorize_io_error(source),
            TransportError::ShortTransfer { .. } => ErrorCategory::Retryable,
            TransportError::Timeout { .. }
            | TransportError::ConnectTimeout { .. }
            | TransportError::HandshakeTimeout { .. } => ErrorCategory::Timeout,
            TransportError::AlreadyWaiting { .. } | TransportError::UnknownSequence { .. } => {
                ErrorCategory::NonRetryable
            }
            TransportError::ListenerClosed => ErrorCategory::Closed,
        }
    }

    /// 若为系统错误，返回失败的操作名（如 `"read"`）。
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            TransportError::System { op, .. } => Some(op.message),
            _ => None,
        }
    }

    /// 若为系统错误，返回底层 `io::ErrorKind`。
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            TransportError::System { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::TimedOut => ErrorCategory::Timeout,
        ErrorKind::WouldBlock
        | ErrorKind::Interrupted
        | ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::AddrInUse
        | ErrorKind::AddrNotAvailable
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof
        | ErrorKind::WriteZero => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}
