use std::sync::Arc;
use std::time::{Duration, Instant};

use uart_channel::{LoopbackPeer, LoopbackTransport, SerialChannel, SerialConfig, SerialError};

async fn open_loopback(config: SerialConfig) -> (Arc<SerialChannel>, LoopbackPeer) {
    let transport = LoopbackTransport::new();
    let peer = transport.peer();
    let port = Arc::new(SerialChannel::new("loop0", config, Arc::new(transport)));
    port.open().await.expect("open loopback");
    (port, peer)
}

fn timed(ms: u64) -> SerialConfig {
    SerialConfig::default().read_timeout(Duration::from_millis(ms))
}

#[tokio::test]
async fn test_round_trip_preserves_bytes_and_order() {
    let transport = LoopbackTransport::echo();
    let port = SerialChannel::new("loop0", timed(500), Arc::new(transport));
    port.open().await.expect("open");

    let payload: Vec<u8> = (0..=255u8).collect();
    assert_eq!(port.write(&payload).await.expect("write"), payload.len());

    let mut received = vec![0u8; payload.len()];
    let n = port.read_all(&mut received).await.expect("read");
    assert_eq!(n, payload.len());
    assert_eq!(received, payload);
}

#[tokio::test]
async fn test_read_timeout_returns_zero_bytes() {
    let (port, _peer) = open_loopback(timed(100)).await;
    let mut buf = [0u8; 16];

    let start = Instant::now();
    let n = port.read_all(&mut buf).await.expect("timeout is not an error");
    let elapsed = start.elapsed();

    assert_eq!(n, 0);
    assert!(elapsed >= Duration::from_millis(100), "returned after {:?}", elapsed);
    assert_eq!(port.metrics().read_timeouts, 1);
}

#[tokio::test]
async fn test_read_returns_partial_data_without_waiting_for_count() {
    let (port, peer) = open_loopback(timed(2000)).await;
    peer.inject(b"abc");

    let mut buf = [0u8; 10];
    let start = Instant::now();
    let n = port.read_all(&mut buf).await.expect("read");
    assert_eq!(&buf[..n], b"abc");
    assert!(start.elapsed() < Duration::from_millis(1000), "must not wait for a full buffer");
}

#[tokio::test]
async fn test_read_waits_for_late_data() {
    let (port, peer) = open_loopback(timed(2000)).await;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        peer.inject(b"late");
    });

    let mut buf = [0u8; 8];
    let n = port.read_all(&mut buf).await.expect("read");
    assert_eq!(&buf[..n], b"late");
}

#[tokio::test]
async fn test_read_into_offset() {
    let (port, peer) = open_loopback(timed(100)).await;
    peer.inject(b"abcdef");

    let mut dest = [b'.'; 10];
    let n = port.read(&mut dest, 3, 4).await.expect("read");
    assert_eq!(n, 4);
    assert_eq!(&dest, b"...abcd...");
    assert_eq!(port.bytes_to_read(), 2);

    assert!(matches!(port.read(&mut dest, 8, 5).await, Err(SerialError::InvalidArgument(_))));
    assert_eq!(port.read(&mut dest, 10, 0).await.expect("empty read"), 0);
}

#[tokio::test]
async fn test_read_byte_and_peek() {
    let (port, peer) = open_loopback(timed(50)).await;
    assert_eq!(port.peek(), -1);
    assert_eq!(port.read_byte().await.expect("read"), -1);

    peer.inject(b"Z!");
    assert_eq!(port.peek(), i32::from(b'Z'));
    assert_eq!(port.bytes_to_read(), 2, "peek must not consume");
    assert_eq!(port.read_byte().await.expect("read"), i32::from(b'Z'));
    assert_eq!(port.read_byte().await.expect("read"), i32::from(b'!'));
    assert_eq!(port.read_byte().await.expect("read"), -1);
}

#[tokio::test]
async fn test_read_to_strips_or_keeps_delimiter() {
    let (port, peer) = open_loopback(timed(200)).await;

    peer.inject(b"AB\r\nCD");
    let bytes = port.read_to(b"\r\n", false).await.expect("read_to");
    assert_eq!(bytes, b"AB".to_vec());
    assert_eq!(port.bytes_to_read(), 2, "CD stays buffered");

    port.clear_receive_buffer();
    peer.inject(b"AB\r\nCD");
    let bytes = port.read_to(b"\r\n", true).await.expect("read_to");
    assert_eq!(bytes, b"AB\r\n".to_vec());
    assert_eq!(port.bytes_to_read(), 2);
}

#[tokio::test]
async fn test_read_to_finds_delimiter_split_across_pushes() {
    let (port, peer) = open_loopback(timed(2000)).await;
    tokio::spawn(async move {
        for chunk in [&b"hel"[..], b"lo\r", b"\nrest"] {
            tokio::time::sleep(Duration::from_millis(20)).await;
            peer.inject(chunk);
        }
    });

    let bytes = port.read_to(b"\r\n", false).await.expect("read_to");
    assert_eq!(bytes, b"hello".to_vec());
}

#[tokio::test]
async fn test_read_to_timeout_consumes_nothing() {
    let (port, peer) = open_loopback(timed(100)).await;
    peer.inject(b"no delimiter");

    let start = Instant::now();
    let bytes = port.read_to(b"\n", true).await.expect("timeout is not an error");
    assert!(bytes.is_empty());
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(port.bytes_to_read(), 12, "prefix must remain buffered");

    // The rest of the line turns up; the next call sees all of it
    peer.inject(b"!\n");
    let bytes = port.read_to(b"\n", true).await.expect("read_to");
    assert_eq!(bytes, b"no delimiter!\n".to_vec());
}

#[tokio::test]
async fn test_read_to_token_and_read_line() {
    let (port, peer) = open_loopback(timed(200)).await;
    peer.inject(b"OK;VERSION:1.2\r\nnext");

    assert_eq!(port.read_to_token(b';').await.expect("token"), b"OK;".to_vec());
    assert_eq!(port.read_line().await.expect("line"), "VERSION:1.2");
    assert_eq!(port.read_line().await.expect("line"), "", "no terminator yet");
    assert_eq!(port.bytes_to_read(), 4);
}

#[tokio::test]
async fn test_empty_token_rejected() {
    let (port, _peer) = open_loopback(timed(50)).await;
    assert!(matches!(port.read_to(b"", true).await, Err(SerialError::Configuration(_))));
}

#[tokio::test]
async fn test_clear_receive_buffer() {
    let (port, peer) = open_loopback(timed(50)).await;
    peer.inject(b"garbage");
    port.clear_receive_buffer();
    assert_eq!(port.bytes_to_read(), 0);
    assert_eq!(port.peek(), -1);

    peer.inject(b"x");
    assert_eq!(port.read_byte().await.expect("read"), i32::from(b'x'));
}

#[tokio::test]
async fn test_read_line_replaces_invalid_utf8() {
    let (port, peer) = open_loopback(timed(200)).await;
    peer.inject(b"temp \xff\xfe C\r\nraw \xff\n");

    assert_eq!(port.read_line().await.expect("line"), "temp \u{fffd}\u{fffd} C");
    // Raw bytes stay available through read_to
    assert_eq!(port.read_to(b"\n", false).await.expect("bytes"), b"raw \xff".to_vec());
}
