//! Buffered serial (UART) channel.
//!
//! A [`SerialChannel`] sits between a transport driver, which pushes received
//! bytes in from its own task or thread, and application code that reads and
//! writes with timeouts. Received bytes wait in a fixed-size ring buffer; when it
//! fills, new bytes are dropped and a single `BufferOverrun` event is raised per
//! overrun episode.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use uart_channel::{SerialChannel, SerialConfig};
//!
//! # async fn demo() -> uart_channel::Result<()> {
//! let config = SerialConfig::new(115200).read_timeout(Duration::from_millis(500));
//! let port = SerialChannel::native("/dev/ttyUSB0", config);
//! port.open().await?;
//! port.write(b"VERSION\n").await?;
//! let reply = port.read_line().await?;
//! println!("{}", reply);
//! port.close().await;
//! # Ok(())
//! # }
//! ```

pub mod serial;
pub mod transport;

pub use serial::{
    discover_ports, ChannelMetrics, Parity, PortState, Result, SerialChannel, SerialConfig,
    SerialDeviceInfo, SerialError, SerialEvent, StopBits, INFINITE_TIMEOUT,
};
pub use transport::{LoopbackPeer, LoopbackTransport, NativeTransport, ReceiveSink, Transport, TransportHandle};
