use std::fmt;
use std::net::SocketAddr;

/// 单次汇合的唯一键。监听器在锁内单调递增分配，生命周期内永不复用。
pub type SequenceNumber = u64;

/// 序列号在线上的字节宽度（本机字节序，无分帧）。
pub const SEQUENCE_NUMBER_WIRE_LEN: usize = std::mem::size_of::<SequenceNumber>();

/// 监听地址与序列号组成的不可变值。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 拨号端在尚不知道对端地址时就需要一个本地唯一的汇合键；`Address` 把监听器
///   实际绑定的地址与新分配的序列号打包，交由上层带外传给远端进程。
///
/// ## 契约 (What)
/// - 只能通过 [`Listener::next_address`](crate::Listener::next_address) 或
///   [`Address::new`] 构造，构造后不可修改；
/// - `sockaddr` 为监听器 `sockName()` 的结果（通配地址绑定时即为通配地址）；
/// - 远端连上 `sockaddr` 后必须立刻写出 `seq` 的 8 字节编码。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    sockaddr: SocketAddr,
    seq: SequenceNumber,
}

impl Address {
    pub fn new(sockaddr: SocketAddr, seq: SequenceNumber) -> Self {
        Self { sockaddr, seq }
    }

    /// 监听器绑定的套接字地址。
    pub fn sockaddr(&self) -> SocketAddr {
        self.sockaddr
    }

    pub fn seq(&self) -> SequenceNumber {
        self.seq
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.sockaddr, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_endpoint_and_sequence() {
        let addr = Address::new("127.0.0.1:4000".parse().expect("parse addr"), 7);
        assert_eq!(addr.to_string(), "127.0.0.1:4000#7");
        assert_eq!(addr.seq(), 7);
        assert_eq!(addr.sockaddr().port(), 4000);
    }

    #[test]
    fn wire_width_is_eight_bytes() {
        assert_eq!(SEQUENCE_NUMBER_WIRE_LEN, 8);
    }
}
