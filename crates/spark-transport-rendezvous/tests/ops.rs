//! 定长值异步读写操作的行为测试。
//!
//! # 教案式说明
//! - **Why**：读写操作是握手的基础，必须保证“恰好一次回调、完成即释放”，
//!   且系统错误、字节不足、成功三种结果分类准确；
//! - **How**：用回环连接的一端接入事件循环，另一端以阻塞标准库套接字扮演对端；
//! - **What**：每个用例都在回调后确认 `pending_operations` 归零，即操作已被释放。

mod support;

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use socket2::SockRef;
use spark_transport_rendezvous::{Loop, TransportError, read, write};
use support::{init_tracing, recv, socket_pair, wait_idle};

/// 对端恰好写出 8 字节时，读操作交付完整的值并释放自身。
#[test]
fn read_full_value_yields_exact_value() {
    init_tracing();
    let lp = Loop::new().expect("start loop");
    let (socket, mut peer) = socket_pair(&lp);
    let value: u64 = 0x0123_4567_89ab_cdef;
    peer.write_all(&value.to_ne_bytes()).expect("peer write");

    let (tx, rx) = mpsc::channel();
    let expected = Arc::clone(&socket);
    let this_loop = Arc::clone(&lp);
    read::<u64, _>(&lp, socket, move |socket, result| {
        let same = Arc::ptr_eq(&socket, &expected);
        tx.send((same, this_loop.is_loop_thread(), result.map_err(|err| err.to_string())))
            .expect("send");
    });

    let (same, on_loop, result) = recv(&rx);
    assert!(same, "callback receives the socket the read was issued on");
    assert!(on_loop, "callback runs on the loop thread");
    assert_eq!(result, Ok(value));
    wait_idle(&lp);
}

/// 对端只写出 3 字节时，读操作报告字节不足及实际/期望字节数。
#[test]
fn read_short_value_reports_counts() {
    init_tracing();
    let lp = Loop::new().expect("start loop");
    let (socket, mut peer) = socket_pair(&lp);
    peer.write_all(&[1, 2, 3]).expect("peer write");

    let (tx, rx) = mpsc::channel();
    read::<u64, _>(&lp, socket, move |_, result| tx.send(result).expect("send"));

    match recv(&rx) {
        Err(TransportError::ShortTransfer {
            op,
            actual,
            expected,
        }) => {
            assert_eq!(op, "read");
            assert_eq!(actual, 3);
            assert_eq!(expected, 8);
        }
        other => panic!("expected short read, got {other:?}"),
    }
    wait_idle(&lp);
}

/// 对端未写任何数据就正常关闭时，读到 0 字节，同样归类为字节不足。
#[test]
fn read_after_orderly_close_is_short() {
    init_tracing();
    let lp = Loop::new().expect("start loop");
    let (socket, peer) = socket_pair(&lp);
    drop(peer);

    let (tx, rx) = mpsc::channel();
    read::<u32, _>(&lp, socket, move |_, result| tx.send(result).expect("send"));

    match recv(&rx) {
        Err(TransportError::ShortTransfer {
            actual: 0,
            expected: 4,
            ..
        }) => {}
        other => panic!("expected zero-byte short read, got {other:?}"),
    }
    wait_idle(&lp);
}

/// 对端以 RST 中止连接时，读操作返回系统错误而不是崩溃，且操作仍被释放。
#[test]
fn read_after_reset_is_system_error() {
    init_tracing();
    let lp = Loop::new().expect("start loop");
    let (socket, peer) = socket_pair(&lp);
    SockRef::from(&peer)
        .set_linger(Some(Duration::ZERO))
        .expect("set linger");
    drop(peer);

    let (tx, rx) = mpsc::channel();
    read::<u64, _>(&lp, socket, move |_, result| tx.send(result).expect("send"));

    let err = recv(&rx).expect_err("reset connection cannot yield a value");
    assert!(matches!(err, TransportError::System { .. }), "unexpected error: {err:?}");
    assert_eq!(err.operation(), Some("read"));
    assert_eq!(err.io_kind(), Some(std::io::ErrorKind::ConnectionReset));
    wait_idle(&lp);
}

/// 写操作一次写出定长值，对端按本机字节序读回。
#[test]
fn write_value_reaches_peer() {
    init_tracing();
    let lp = Loop::new().expect("start loop");
    let (socket, mut peer) = socket_pair(&lp);

    let (tx, rx) = mpsc::channel();
    write(&lp, socket, 0xfeed_beef_u32, move |_, result| {
        tx.send(result.map_err(|err| err.to_string())).expect("send");
    });
    assert_eq!(recv(&rx), Ok(()));

    let mut buf = [0u8; 4];
    peer.read_exact(&mut buf).expect("peer read");
    assert_eq!(u32::from_ne_bytes(buf), 0xfeed_beef);
    wait_idle(&lp);
}

/// 对端以 RST 中止连接后，写操作返回 `write` 系统错误，操作同样被释放。
///
/// 先用一次读确认 RST 已经到达，再发起写。
#[test]
fn write_after_reset_is_system_error() {
    init_tracing();
    let lp = Loop::new().expect("start loop");
    let (socket, peer) = socket_pair(&lp);
    SockRef::from(&peer)
        .set_linger(Some(Duration::ZERO))
        .expect("set linger");
    drop(peer);

    let (tx, rx) = mpsc::channel();
    read::<u8, _>(&lp, socket, move |socket, result| {
        tx.send((socket, result.is_err())).expect("send");
    });
    let (socket, read_failed) = recv(&rx);
    assert!(read_failed, "reset is observed by the read");

    let (tx, rx) = mpsc::channel();
    write(&lp, socket, 0x0bad_f00d_u32, move |_, result| {
        tx.send(result).expect("send");
    });
    let err = recv(&rx).expect_err("reset connection cannot accept a value");
    assert!(matches!(err, TransportError::System { .. }), "unexpected error: {err:?}");
    assert_eq!(err.operation(), Some("write"));
    assert!(
        matches!(
            err.io_kind(),
            Some(std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset)
        ),
        "unexpected io error: {err:?}"
    );
    wait_idle(&lp);
}

/// 大量并发提交的操作各自恰好回调一次，全部完成后循环不再持有任何操作。
#[test]
fn every_operation_calls_back_exactly_once() {
    init_tracing();
    let lp = Loop::new().expect("start loop");
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();
    let mut peers = Vec::new();

    for i in 0..32u16 {
        let (socket, mut peer) = socket_pair(&lp);
        let calls = Arc::clone(&calls);
        let tx = tx.clone();
        if i % 2 == 0 {
            peer.write_all(&i.to_ne_bytes()).expect("peer write");
            read::<u16, _>(&lp, socket, move |_, result| {
                calls.fetch_add(1, Ordering::SeqCst);
                tx.send(result.is_ok()).expect("send");
            });
        } else {
            write(&lp, socket, i, move |_, result| {
                calls.fetch_add(1, Ordering::SeqCst);
                tx.send(result.is_ok()).expect("send");
            });
        }
        peers.push(peer);
    }
    drop(tx);

    let outcomes: Vec<bool> = (0..32).map(|_| recv(&rx)).collect();
    assert!(outcomes.iter().all(|ok| *ok));
    wait_idle(&lp);
    assert_eq!(calls.load(Ordering::SeqCst), 32);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
}
