//! Driver seam between a `SerialChannel` and the device that moves the bytes.
//!
//! A `Transport` opens a handle for a port and, from then on, delivers every
//! received chunk through the `ReceiveSink` it was given. The channel writes
//! through the returned `TransportHandle`.

pub mod loopback;
pub mod native;

pub use loopback::{LoopbackPeer, LoopbackTransport};
pub use native::NativeTransport;

use std::sync::Arc;

use crate::serial::channel::Shared;
use crate::serial::{Result, SerialConfig};

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Acquire the device for `port_name`. Fails with `ResourceUnavailable` when
    /// the port is missing or busy, or `Configuration` when the device cannot
    /// express `config`.
    async fn open_handle(
        &self,
        port_name: &str,
        config: &SerialConfig,
        sink: ReceiveSink,
    ) -> Result<Box<dyn TransportHandle>>;
}

#[async_trait::async_trait]
pub trait TransportHandle: Send {
    async fn raw_write(&mut self, bytes: &[u8]) -> std::io::Result<usize>;

    async fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    /// Release the device. The sink handed out at open is already dead when this
    /// runs.
    async fn close_handle(&mut self) -> std::io::Result<()>;
}

/// Where a driver delivers received bytes.
///
/// Cheap to clone and safe to call from any thread. Once the channel closes (or
/// reopens) the sink goes inactive and drops whatever it is given.
///
/// A single producer per session is assumed: chunks pushed concurrently from
/// several threads are buffered in lock order, but their `DataReceived` events
/// may be broadcast out of order.
#[derive(Clone)]
pub struct ReceiveSink {
    shared: Arc<Shared>,
    session: u64,
}

impl ReceiveSink {
    pub(crate) fn new(shared: Arc<Shared>, session: u64) -> Self {
        Self { shared, session }
    }

    /// Hand a chunk to the channel. Returns `false` once the sink is inactive so
    /// reader loops know to stop.
    pub fn push(&self, bytes: &[u8]) -> bool {
        self.shared.deliver(self.session, bytes)
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_session_live(self.session)
    }
}

impl std::fmt::Debug for ReceiveSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiveSink").field("session", &self.session).finish()
    }
}
