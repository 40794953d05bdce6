//! 自持有的定长值异步读写操作。
//!
//! # 模块定位（Why）
//! - 握手阶段只需要收发一个定长值（序列号），为此维护一套分段读写状态机得不偿失；
//!   这里的每个操作只经历一次“注册 → 等待就绪 → 完成”周期；
//! - 调用方不管理操作的内存：操作在提交时被移入事件循环的任务表，完成后随任务一起被丢弃。
//!
//! # 暴露接口（What）
//! - [`read`]：读取恰好 `size_of::<T>()` 字节，回调形如 `(socket, Result<T, _>)`；
//! - [`write`]：写出恰好 `size_of::<T>()` 字节，回调形如 `(socket, Result<(), _>)`；
//! - [`Value`]：可作为定长值传输的类型，已为全部定宽整数实现，按本机字节序编码。
//!
//! # 设计要点（How）
//! - 就绪后只做一次系统调用并分类结果：系统错误 → `System`，字节不足 → `ShortTransfer`，
//!   否则成功；
//! - 回调在循环线程上恰好调用一次，随后操作立即释放，不会再收到任何事件；
//! - 假设定长值在一次可读窗口内完整到达，这对局域网内的小握手负载成立。
//!
//! # 风险与考量（Trade-offs）
//! - 不适用于变长负载；
//! - 同一套接字上的两个读（或两个写）操作不会被本层串行化。

use std::sync::Arc;

use crate::error::{self, TransportError};
use crate::reactor::Loop;
use crate::socket::Socket;

/// 可按固定宽度、逐字节拷贝在线上传输的值。
pub trait Value: Send + Sized + 'static {
    /// 线上表示，长度即为一次传输必须搬运的字节数。
    type Bytes: AsRef<[u8]> + AsMut<[u8]> + Default + Send + 'static;

    fn to_wire(&self) -> Self::Bytes;

    fn from_wire(bytes: Self::Bytes) -> Self;
}

macro_rules! impl_value_for_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Value for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn to_wire(&self) -> Self::Bytes {
                    self.to_ne_bytes()
                }

                fn from_wire(bytes: Self::Bytes) -> Self {
                    <$ty>::from_ne_bytes(bytes)
                }
            }
        )*
    };
}

impl_value_for_int!(
    u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize
);

/// `T` 在线上占用的字节数。
pub fn wire_len<T: Value>() -> usize {
    std::mem::size_of::<T::Bytes>()
}

/// 在 `lp` 上提交一次“读取一个 `T`”操作。
///
/// # 教案式注释
///
/// ## 契约 (What)
/// - `socket`：已连接、已注册到 `lp` 的套接字；
/// - `callback`：在循环线程上恰好调用一次，参数为同一个 `socket` 与读取结果；
/// - **错误语义**：读系统调用失败返回 `TransportError::System`（操作名 `"read"`）；
///   读到的字节少于 `T` 的宽度（包括对端已关闭时的 0 字节）返回 `ShortTransfer`。
///
/// ## 注意事项 (Trade-offs)
/// - 若 `lp` 在操作完成前关闭，操作被丢弃，回调不会触发。
pub fn read<T, F>(lp: &Loop, socket: Arc<Socket>, callback: F)
where
    T: Value,
    F: FnOnce(Arc<Socket>, Result<T, TransportError>) + Send + 'static,
{
    lp.submit(async move {
        let result = read_value::<T>(&socket).await;
        callback(socket, result);
    });
}

/// 在 `lp` 上提交一次“写出一个 `T`”操作，语义与 [`read`] 对称。
pub fn write<T, F>(lp: &Loop, socket: Arc<Socket>, value: T, callback: F)
where
    T: Value,
    F: FnOnce(Arc<Socket>, Result<(), TransportError>) + Send + 'static,
{
    lp.submit(async move {
        let result = write_value(&socket, value).await;
        callback(socket, result);
    });
}

pub(crate) async fn read_value<T: Value>(socket: &Socket) -> Result<T, TransportError> {
    let mut bytes = T::Bytes::default();
    let expected = bytes.as_ref().len();
    let actual = socket
        .read_once(bytes.as_mut())
        .await
        .map_err(|err| TransportError::system(error::READ, err))?;
    if actual < expected {
        return Err(TransportError::short_transfer(error::READ, actual, expected));
    }
    Ok(T::from_wire(bytes))
}

pub(crate) async fn write_value<T: Value>(socket: &Socket, value: T) -> Result<(), TransportError> {
    let bytes = value.to_wire();
    let expected = bytes.as_ref().len();
    let actual = socket
        .write_once(bytes.as_ref())
        .await
        .map_err(|err| TransportError::system(error::WRITE, err))?;
    if actual < expected {
        return Err(TransportError::short_transfer(error::WRITE, actual, expected));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_len_matches_integer_width() {
        assert_eq!(wire_len::<u8>(), 1);
        assert_eq!(wire_len::<u32>(), 4);
        assert_eq!(wire_len::<u64>(), 8);
        assert_eq!(wire_len::<i128>(), 16);
    }

    #[test]
    fn integers_use_native_byte_order() {
        let value: u64 = 0x0102_0304_0506_0708;
        assert_eq!(value.to_wire(), value.to_ne_bytes());
        assert_eq!(u64::from_wire(value.to_ne_bytes()), value);
        assert_eq!(i16::from_wire((-2i16).to_ne_bytes()), -2);
    }
}
