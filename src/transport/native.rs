//! OS serial device backend built on tokio-serial
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_serial::{FlowControl, SerialPortBuilderExt, SerialStream};

use super::{ReceiveSink, Transport, TransportHandle};
use crate::serial::{Parity, Result, SerialConfig, SerialError, StopBits};

const READ_CHUNK: usize = 512;

#[derive(Debug, Default)]
pub struct NativeTransport;

impl NativeTransport {
    pub fn new() -> Self {
        Self
    }
}

/// Map the channel settings onto what the OS serial layer supports
fn line_settings(config: &SerialConfig) -> Result<(tokio_serial::DataBits, tokio_serial::Parity, tokio_serial::StopBits)> {
    let data_bits = match config.data_bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        8 => tokio_serial::DataBits::Eight,
        other => {
            return Err(SerialError::Configuration(format!(
                "{} data bits not supported by OS serial ports",
                other
            )))
        }
    };
    let parity = match config.parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Mark | Parity::Space => {
            return Err(SerialError::Configuration(format!(
                "{:?} parity not supported by OS serial ports",
                config.parity
            )))
        }
    };
    let stop_bits = match config.stop_bits {
        StopBits::One => tokio_serial::StopBits::One,
        StopBits::Two => tokio_serial::StopBits::Two,
        StopBits::OnePointFive => {
            return Err(SerialError::Configuration(
                "1.5 stop bits not supported by OS serial ports".to_string(),
            ))
        }
    };
    Ok((data_bits, parity, stop_bits))
}

fn open_error(port_name: &str, e: tokio_serial::Error) -> SerialError {
    match e.kind() {
        tokio_serial::ErrorKind::InvalidInput => SerialError::Configuration(e.to_string()),
        _ => SerialError::ResourceUnavailable {
            port: port_name.to_string(),
            reason: e.to_string(),
        },
    }
}

#[async_trait::async_trait]
impl Transport for NativeTransport {
    async fn open_handle(
        &self,
        port_name: &str,
        config: &SerialConfig,
        sink: ReceiveSink,
    ) -> Result<Box<dyn TransportHandle>> {
        let (data_bits, parity, stop_bits) = line_settings(config)?;

        let stream = tokio_serial::new(port_name, config.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| open_error(port_name, e))?;

        let (reader, writer) = tokio::io::split(stream);
        let reader_task = tokio::spawn(reader_loop(port_name.to_string(), reader, sink));

        Ok(Box::new(NativeHandle { writer, reader_task }))
    }
}

async fn reader_loop(port_name: String, mut reader: ReadHalf<SerialStream>, sink: ReceiveSink) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                log::info!("{} reached end of stream", port_name);
                break;
            }
            Ok(n) => {
                if !sink.push(&buf[..n]) {
                    break;
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                log::error!("Read from {} failed: {}", port_name, e);
                break;
            }
        }
    }
    log::debug!("Reader for {} stopped", port_name);
}

struct NativeHandle {
    writer: WriteHalf<SerialStream>,
    reader_task: JoinHandle<()>,
}

#[async_trait::async_trait]
impl TransportHandle for NativeHandle {
    async fn raw_write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        self.writer.write(bytes).await
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush().await
    }

    async fn close_handle(&mut self) -> std::io::Result<()> {
        // Pending output is discarded
        self.reader_task.abort();
        Ok(())
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_settings_accepts_8n1() {
        assert!(line_settings(&SerialConfig::default()).is_ok());
        assert!(line_settings(&SerialConfig::default().data_bits(5).parity(Parity::Odd).stop_bits(StopBits::Two)).is_ok());
    }

    #[test]
    fn test_line_settings_rejects_unsupported() {
        for config in [
            SerialConfig::default().data_bits(9),
            SerialConfig::default().parity(Parity::Mark),
            SerialConfig::default().parity(Parity::Space),
            SerialConfig::default().stop_bits(StopBits::OnePointFive),
        ] {
            assert!(matches!(line_settings(&config), Err(SerialError::Configuration(_))), "{:?}", config);
        }
    }
}
