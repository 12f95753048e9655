use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch, Notify};

use super::buffer::ReceiveBuffer;
use super::scanner::TokenScanner;
use super::timeout::{Deadline, TimeoutPolicy};
use super::types::{ChannelMetrics, PortState, SerialEvent};
use super::{Parity, Result, SerialConfig, SerialError, StopBits};
use crate::transport::{NativeTransport, ReceiveSink, Transport, TransportHandle};

pub const EVENT_CAPACITY: usize = 256;

/// State shared between a channel and the sink its transport pushes into
pub(crate) struct Shared {
    port_name: String,
    inner: Mutex<Inner>,
    notify: Notify,
    events_tx: broadcast::Sender<SerialEvent>,
    metrics_tx: watch::Sender<ChannelMetrics>,
}

struct Inner {
    state: PortState,
    /// Bumped on every open and close; sinks from older sessions are dead
    session: u64,
    buffer: Option<ReceiveBuffer>,
    config: SerialConfig,
    active_config: Option<SerialConfig>,
}

impl Inner {
    /// Buffer of `session`, or `NotOpen` once that session has been closed
    fn session_buffer(&mut self, session: u64) -> Result<&mut ReceiveBuffer> {
        if self.state != PortState::Open || self.session != session {
            return Err(SerialError::NotOpen);
        }
        self.buffer.as_mut().ok_or(SerialError::NotOpen)
    }

    fn active_config(&self) -> Result<&SerialConfig> {
        match (self.state, self.active_config.as_ref()) {
            (PortState::Open, Some(config)) => Ok(config),
            _ => Err(SerialError::NotOpen),
        }
    }

    fn shut(&mut self) -> bool {
        let was_open = self.state == PortState::Open;
        self.state = PortState::Closed;
        self.session = self.session.wrapping_add(1);
        self.buffer = None;
        self.active_config = None;
        was_open
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_session_live(&self, session: u64) -> bool {
        let inner = self.lock();
        inner.session == session && inner.buffer.is_some()
    }

    pub(crate) fn deliver(&self, session: u64, bytes: &[u8]) -> bool {
        let (outcome, bytes_to_read) = {
            let mut inner = self.lock();
            if inner.session != session {
                return false;
            }
            let Some(buffer) = inner.buffer.as_mut() else {
                return false;
            };
            (buffer.push(bytes), buffer.bytes_available())
        };

        if bytes.is_empty() {
            return true;
        }

        log::trace!("{} <- {}", self.port_name, hex::encode(bytes));
        self.record(|m| {
            m.bytes_received += outcome.accepted as u64;
            m.bytes_dropped += outcome.dropped as u64;
            if outcome.overrun_started {
                m.overrun_episodes += 1;
            }
        });

        if outcome.accepted > 0 {
            self.notify.notify_waiters();
            let _ = self.events_tx.send(SerialEvent::DataReceived { bytes_to_read });
        }
        if outcome.overrun_started {
            log::warn!(
                "Receive buffer overrun on {}: dropped {} bytes",
                self.port_name,
                outcome.dropped
            );
            let _ = self.events_tx.send(SerialEvent::BufferOverrun { dropped: outcome.dropped });
        }
        true
    }

    fn record(&self, update: impl FnOnce(&mut ChannelMetrics)) {
        self.metrics_tx.send_modify(|m| {
            update(m);
            m.last_activity = Some(Utc::now());
        });
    }
}

/// Buffered serial port.
///
/// Bytes pushed by the transport collect in a fixed-size receive buffer until a
/// read drains them. Reads and writes wait according to the read/write timeout of
/// the configuration snapshot taken at `open()`; a zero timeout waits forever. A
/// timed-out call is not an error: it returns whatever it managed to transfer.
///
/// All methods take `&self`, so the channel can be shared behind an `Arc` and
/// closed from one task while another is blocked in a read. The channel assumes a
/// single logical reader and a single logical writer; concurrent readers get an
/// unspecified split of the incoming bytes.
pub struct SerialChannel {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    handle: tokio::sync::Mutex<Option<Box<dyn TransportHandle>>>,
}

impl SerialChannel {
    pub fn new(port_name: impl Into<String>, config: SerialConfig, transport: Arc<dyn Transport>) -> Self {
        let (events_tx, _events_rx) = broadcast::channel(EVENT_CAPACITY);
        let (metrics_tx, _metrics_rx) = watch::channel(ChannelMetrics::default());
        let shared = Shared {
            port_name: port_name.into(),
            inner: Mutex::new(Inner {
                state: PortState::Closed,
                session: 0,
                buffer: None,
                config,
                active_config: None,
            }),
            notify: Notify::new(),
            events_tx,
            metrics_tx,
        };
        Self {
            shared: Arc::new(shared),
            transport,
            handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Channel backed by an OS serial device
    pub fn native(port_name: impl Into<String>, config: SerialConfig) -> Self {
        Self::new(port_name, config, Arc::new(NativeTransport::new()))
    }

    pub async fn open(&self) -> Result<()> {
        let mut slot = self.handle.lock().await;
        if slot.is_some() {
            return Err(SerialError::AlreadyOpen);
        }

        let (config, session) = {
            let mut inner = self.shared.lock();
            let config = inner.config.clone();
            config.validate()?;
            inner.session = inner.session.wrapping_add(1);
            inner.buffer = Some(ReceiveBuffer::with_capacity(config.receive_buffer_size));
            (config, inner.session)
        };

        let sink = ReceiveSink::new(self.shared.clone(), session);
        let mut handle = match self.transport.open_handle(&self.shared.port_name, &config, sink).await {
            Ok(handle) => handle,
            Err(e) => {
                {
                    let mut inner = self.shared.lock();
                    if inner.session == session {
                        inner.shut();
                    }
                }
                log::warn!("Failed to open {}: {}", self.shared.port_name, e);
                return Err(e);
            }
        };

        let cancelled = {
            let mut inner = self.shared.lock();
            if inner.session == session {
                inner.state = PortState::Open;
                inner.active_config = Some(config.clone());
                false
            } else {
                true
            }
        };
        if cancelled {
            // close() ran while the transport was opening
            log::info!("Open of {} cancelled by close", self.shared.port_name);
            if let Err(e) = handle.close_handle().await {
                log::warn!("Error releasing {}: {}", self.shared.port_name, e);
            }
            return Err(SerialError::NotOpen);
        }

        *slot = Some(handle);
        self.shared.record(|m| m.opens += 1);
        log::info!(
            "Opened {} at {} baud ({} data bits, {:?} parity, {:?} stop bits)",
            self.shared.port_name,
            config.baud_rate,
            config.data_bits,
            config.parity,
            config.stop_bits
        );
        Ok(())
    }

    /// Release the transport and drop buffered data. Never fails; calling it on a
    /// closed channel does nothing. Pending reads and writes wake up with
    /// `NotOpen`.
    pub async fn close(&self) {
        let was_open = self.shared.lock().shut();
        self.shared.notify.notify_waiters();

        let handle = self.handle.lock().await.take();
        if let Some(mut handle) = handle {
            if let Err(e) = handle.close_handle().await {
                log::warn!("Error closing {}: {}", self.shared.port_name, e);
            }
        }
        if was_open {
            log::info!("Closed {}", self.shared.port_name);
        }
    }

    pub fn port_name(&self) -> &str {
        &self.shared.port_name
    }

    pub fn is_open(&self) -> bool {
        self.state() == PortState::Open
    }

    pub fn state(&self) -> PortState {
        self.shared.lock().state
    }

    pub fn bytes_to_read(&self) -> usize {
        self.shared.lock().buffer.as_ref().map_or(0, ReceiveBuffer::bytes_available)
    }

    /// Capacity of the live buffer, or the configured size while closed
    pub fn receive_buffer_size(&self) -> usize {
        let inner = self.shared.lock();
        match inner.buffer.as_ref() {
            Some(buffer) => buffer.capacity(),
            None => inner.config.receive_buffer_size,
        }
    }

    /// True when data was lost since the buffer was last cleared
    pub fn has_overrun(&self) -> bool {
        self.shared.lock().buffer.as_ref().is_some_and(ReceiveBuffer::has_overrun)
    }

    pub fn clear_receive_buffer(&self) {
        if let Some(buffer) = self.shared.lock().buffer.as_mut() {
            buffer.clear();
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SerialEvent> {
        self.shared.events_tx.subscribe()
    }

    pub fn metrics_receiver(&self) -> watch::Receiver<ChannelMetrics> {
        self.shared.metrics_tx.subscribe()
    }

    pub fn metrics(&self) -> ChannelMetrics {
        self.shared.metrics_tx.borrow().clone()
    }

    /// Next byte without consuming it, or -1 when nothing is buffered
    pub fn peek(&self) -> i32 {
        self.shared
            .lock()
            .buffer
            .as_ref()
            .and_then(ReceiveBuffer::peek)
            .map_or(-1, i32::from)
    }

    /// Read up to `count` bytes into `dest[offset..]`, waiting until at least one
    /// byte is available. Returns 0 if the read timeout passes first.
    pub async fn read(&self, dest: &mut [u8], offset: usize, count: usize) -> Result<usize> {
        let target = slice_range(dest.len(), offset, count)?;
        let (deadline, session) = self.read_deadline()?;
        let dest = &mut dest[target];

        if dest.is_empty() {
            return Ok(0);
        }

        let read = self
            .wait_until(&deadline, session, |buffer| match buffer.read_into(dest) {
                0 => None,
                n => Some(n),
            })
            .await?;

        match read {
            Some(n) => {
                self.shared.record(|m| m.bytes_read += n as u64);
                Ok(n)
            }
            None => {
                self.read_timed_out(&deadline);
                Ok(0)
            }
        }
    }

    pub async fn read_all(&self, dest: &mut [u8]) -> Result<usize> {
        let len = dest.len();
        self.read(dest, 0, len).await
    }

    /// One byte, or -1 if none arrived before the read timeout
    pub async fn read_byte(&self) -> Result<i32> {
        let (deadline, session) = self.read_deadline()?;
        match self.wait_until(&deadline, session, ReceiveBuffer::read_byte).await? {
            Some(byte) => {
                self.shared.record(|m| m.bytes_read += 1);
                Ok(i32::from(byte))
            }
            None => {
                self.read_timed_out(&deadline);
                Ok(-1)
            }
        }
    }

    /// Read through the first occurrence of `token`.
    ///
    /// With `preserve_token` the delimiter ends the returned bytes, otherwise it is
    /// consumed and left out. If the token does not show up before the read
    /// timeout, nothing is consumed and the result is empty.
    pub async fn read_to(&self, token: &[u8], preserve_token: bool) -> Result<Vec<u8>> {
        let mut scanner = TokenScanner::new(token, preserve_token)?;
        let (deadline, session) = self.read_deadline()?;

        let extracted = self
            .wait_until(&deadline, session, |buffer| {
                scanner
                    .find_token(buffer)
                    .map(|found| TokenScanner::extract(buffer, found))
            })
            .await?;

        match extracted {
            Some((bytes, consumed)) => {
                self.shared.record(|m| m.bytes_read += consumed as u64);
                Ok(bytes)
            }
            None => {
                self.read_timed_out(&deadline);
                Ok(Vec::new())
            }
        }
    }

    /// Read through a single-byte delimiter, keeping it
    pub async fn read_to_token(&self, token: u8) -> Result<Vec<u8>> {
        self.read_to(&[token], true).await
    }

    /// Next `\n`-terminated line without its terminator (a trailing `\r` is also
    /// stripped). Empty when no full line arrived in time.
    ///
    /// Invalid UTF-8 is replaced with U+FFFD; use `read_to(b"\n", false)` for the
    /// raw bytes.
    pub async fn read_line(&self) -> Result<String> {
        let mut line = self.read_to(b"\n", false).await?;
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    pub async fn write(&self, buffer: &[u8]) -> Result<usize> {
        self.write_at(buffer, 0, buffer.len()).await
    }

    /// Write `buffer[offset..offset + count]`, waiting until the transport has
    /// accepted all of it or the write timeout passes. Returns the bytes written.
    pub async fn write_at(&self, buffer: &[u8], offset: usize, count: usize) -> Result<usize> {
        let range = slice_range(buffer.len(), offset, count)?;
        let data = &buffer[range];

        let (deadline, session) = {
            let inner = self.shared.lock();
            let config = inner.active_config()?;
            (TimeoutPolicy::new(config.write_timeout).start(), inner.session)
        };

        let mut slot = self.handle.lock().await;
        let handle = slot.as_mut().ok_or(SerialError::NotOpen)?;

        let mut written = 0;
        while written < data.len() {
            let chunk = &data[written..];
            let attempt = async {
                tokio::select! {
                    res = handle.raw_write(chunk) => Some(res),
                    _ = self.closed(session) => None,
                }
            };
            match deadline.wait(attempt).await {
                None => break,
                Some(None) => return Err(SerialError::NotOpen),
                Some(Some(Ok(0))) => {
                    return Err(SerialError::Transport {
                        transferred: written,
                        source: std::io::Error::new(std::io::ErrorKind::WriteZero, "transport accepted no bytes"),
                    })
                }
                Some(Some(Ok(n))) => written += n,
                Some(Some(Err(source))) => return Err(SerialError::Transport { transferred: written, source }),
            }
        }

        if written == data.len() {
            let flush = async {
                tokio::select! {
                    res = handle.flush() => Some(res),
                    _ = self.closed(session) => None,
                }
            };
            match deadline.wait(flush).await {
                Some(None) => return Err(SerialError::NotOpen),
                Some(Some(Err(source))) => return Err(SerialError::Transport { transferred: written, source }),
                None | Some(Some(Ok(()))) => {}
            }
        } else {
            log::warn!(
                "Write to {} timed out after {:?}: {}/{} bytes",
                self.shared.port_name,
                deadline.elapsed(),
                written,
                data.len()
            );
        }

        if !data.is_empty() {
            log::trace!("{} -> {}", self.shared.port_name, hex::encode(&data[..written]));
        }
        self.shared.record(|m| {
            m.bytes_written += written as u64;
            if written < data.len() {
                m.write_timeouts += 1;
            }
        });
        Ok(written)
    }

    pub fn config(&self) -> SerialConfig {
        self.shared.lock().config.clone()
    }

    /// Replace the configuration used by the next `open()`
    pub fn set_config(&self, config: SerialConfig) {
        self.update_config(|c| *c = config);
    }

    pub fn baud_rate(&self) -> u32 {
        self.shared.lock().config.baud_rate
    }

    pub fn set_baud_rate(&self, baud_rate: u32) {
        self.update_config(|c| c.baud_rate = baud_rate);
    }

    pub fn data_bits(&self) -> u8 {
        self.shared.lock().config.data_bits
    }

    pub fn set_data_bits(&self, data_bits: u8) {
        self.update_config(|c| c.data_bits = data_bits);
    }

    pub fn parity(&self) -> Parity {
        self.shared.lock().config.parity
    }

    pub fn set_parity(&self, parity: Parity) {
        self.update_config(|c| c.parity = parity);
    }

    pub fn stop_bits(&self) -> StopBits {
        self.shared.lock().config.stop_bits
    }

    pub fn set_stop_bits(&self, stop_bits: StopBits) {
        self.update_config(|c| c.stop_bits = stop_bits);
    }

    pub fn read_timeout(&self) -> Duration {
        self.shared.lock().config.read_timeout
    }

    pub fn set_read_timeout(&self, timeout: Duration) {
        self.update_config(|c| c.read_timeout = timeout);
    }

    pub fn write_timeout(&self) -> Duration {
        self.shared.lock().config.write_timeout
    }

    pub fn set_write_timeout(&self, timeout: Duration) {
        self.update_config(|c| c.write_timeout = timeout);
    }

    fn update_config(&self, update: impl FnOnce(&mut SerialConfig)) {
        let mut inner = self.shared.lock();
        update(&mut inner.config);
        if inner.state == PortState::Open {
            log::debug!("{} is open; configuration change applies on next open", self.shared.port_name);
        }
    }

    /// Deadline for a read starting now, and the session it belongs to
    fn read_deadline(&self) -> Result<(Deadline, u64)> {
        let inner = self.shared.lock();
        let config = inner.active_config()?;
        Ok((TimeoutPolicy::new(config.read_timeout).start(), inner.session))
    }

    fn read_timed_out(&self, deadline: &Deadline) {
        log::debug!("Read on {} timed out after {:?}", self.shared.port_name, deadline.elapsed());
        self.shared.record(|m| m.read_timeouts += 1);
    }

    /// Retry `attempt` against the receive buffer on every arrival until it yields
    /// a value or the deadline passes. `Ok(None)` means the deadline passed;
    /// `NotOpen` means `session` was closed, even if the port has reopened since.
    async fn wait_until<T>(
        &self,
        deadline: &Deadline,
        session: u64,
        mut attempt: impl FnMut(&mut ReceiveBuffer) -> Option<T>,
    ) -> Result<Option<T>> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.shared.lock();
                if let Some(value) = attempt(inner.session_buffer(session)?) {
                    return Ok(Some(value));
                }
            }

            if deadline.wait(notified.as_mut()).await.is_none() {
                let mut inner = self.shared.lock();
                return Ok(attempt(inner.session_buffer(session)?));
            }
        }
    }

    /// Resolves once `session` is no longer the open one
    async fn closed(&self, session: u64) {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let inner = self.shared.lock();
                if inner.session != session || inner.state != PortState::Open {
                    return;
                }
            }
            notified.await;
        }
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        if self.shared.lock().shut() {
            log::debug!("{} dropped while open", self.shared.port_name);
        }
        self.shared.notify.notify_waiters();
    }
}

impl std::fmt::Display for SerialChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.shared.port_name, self.state())
    }
}

fn slice_range(len: usize, offset: usize, count: usize) -> Result<std::ops::Range<usize>> {
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(offset..end),
        _ => Err(SerialError::InvalidArgument(format!(
            "offset {} + count {} exceeds buffer of {} bytes",
            offset, count, len
        ))),
    }
}
