//! In-memory transport.
//!
//! `LoopbackPeer` plays the device on the other end of the wire: it injects bytes
//! into the channel and collects what the channel wrote. In echo mode every write
//! comes straight back, like a jumper between TX and RX.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ReceiveSink, Transport, TransportHandle};
use crate::serial::{Result, SerialConfig, SerialError};

#[derive(Default)]
struct PeerState {
    sink: Option<ReceiveSink>,
    written: Vec<u8>,
    echo: bool,
    refuse_open: Option<String>,
    fail_writes: bool,
    stall_writes: bool,
    stall_flush: bool,
    max_write_chunk: Option<usize>,
    last_config: Option<SerialConfig>,
    opens: usize,
}

#[derive(Clone, Default)]
pub struct LoopbackPeer {
    state: Arc<Mutex<PeerState>>,
}

impl LoopbackPeer {
    fn lock(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver bytes as if they arrived on the wire. Returns `false` when no
    /// channel is listening.
    pub fn inject(&self, bytes: &[u8]) -> bool {
        let sink = self.lock().sink.clone();
        match sink {
            Some(sink) => sink.push(bytes),
            None => false,
        }
    }

    /// Everything the channel wrote since the last call
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().written)
    }

    pub fn set_echo(&self, echo: bool) {
        self.lock().echo = echo;
    }

    /// Make the next opens fail as if the port were busy
    pub fn refuse_opens(&self, reason: Option<&str>) {
        self.lock().refuse_open = reason.map(str::to_string);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Writes never complete while set
    pub fn stall_writes(&self, stall: bool) {
        self.lock().stall_writes = stall;
    }

    /// Flushes never complete while set
    pub fn stall_flush(&self, stall: bool) {
        self.lock().stall_flush = stall;
    }

    /// Accept at most `limit` bytes per raw write
    pub fn limit_write_chunk(&self, limit: Option<usize>) {
        self.lock().max_write_chunk = limit;
    }

    pub fn is_connected(&self) -> bool {
        self.lock().sink.as_ref().is_some_and(ReceiveSink::is_active)
    }

    pub fn last_config(&self) -> Option<SerialConfig> {
        self.lock().last_config.clone()
    }

    pub fn opens(&self) -> usize {
        self.lock().opens
    }
}

#[derive(Clone, Default)]
pub struct LoopbackTransport {
    peer: LoopbackPeer,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose writes are looped back into the receive buffer
    pub fn echo() -> Self {
        let transport = Self::new();
        transport.peer.set_echo(true);
        transport
    }

    pub fn peer(&self) -> LoopbackPeer {
        self.peer.clone()
    }
}

#[async_trait::async_trait]
impl Transport for LoopbackTransport {
    async fn open_handle(
        &self,
        port_name: &str,
        config: &SerialConfig,
        sink: ReceiveSink,
    ) -> Result<Box<dyn TransportHandle>> {
        let mut state = self.peer.lock();
        if let Some(reason) = state.refuse_open.clone() {
            return Err(SerialError::ResourceUnavailable {
                port: port_name.to_string(),
                reason,
            });
        }
        state.sink = Some(sink);
        state.last_config = Some(config.clone());
        state.opens += 1;
        Ok(Box::new(LoopbackHandle { peer: self.peer.clone() }))
    }
}

struct LoopbackHandle {
    peer: LoopbackPeer,
}

#[async_trait::async_trait]
impl TransportHandle for LoopbackHandle {
    async fn raw_write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        let (accepted, echo_sink) = {
            let mut state = self.peer.lock();
            if state.fail_writes {
                return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "loopback write failure"));
            }
            if state.stall_writes {
                (None, None)
            } else {
                let n = state.max_write_chunk.map_or(bytes.len(), |limit| limit.min(bytes.len()));
                state.written.extend_from_slice(&bytes[..n]);
                let echo_sink = if state.echo { state.sink.clone() } else { None };
                (Some(n), echo_sink)
            }
        };

        let Some(n) = accepted else {
            return std::future::pending().await;
        };
        if let Some(sink) = echo_sink {
            sink.push(&bytes[..n]);
        }
        Ok(n)
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        if self.peer.lock().stall_flush {
            return std::future::pending().await;
        }
        Ok(())
    }

    async fn close_handle(&mut self) -> std::io::Result<()> {
        self.peer.lock().sink = None;
        Ok(())
    }
}
