//! Printer line link.
//!
//! Printers are reached through a serial-to-TCP bridge speaking plain
//! newline-terminated text. A reader task turns the socket into a channel of
//! lines so the runner can wait on printer output and on the dispatch queue
//! at the same time without losing partial reads.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Printer link errors
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout waiting for printer")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Buffered lines between the reader task and the runner.
const LINE_CHANNEL_CAPACITY: usize = 256;

pub struct PrinterConnection<W> {
    writer: W,
    lines: mpsc::Receiver<String>,
    reader_task: JoinHandle<()>,
    read_timeout: Duration,
    lines_received: u64,
}

impl PrinterConnection<OwnedWriteHalf> {
    /// Connect to a printer bridge with timeout and TCP keepalive.
    pub async fn connect(
        addr: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, LinkError> {
        tracing::info!(address = %addr, "Connecting to printer");

        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| LinkError::Timeout)?
            .map_err(|e| LinkError::ConnectionFailed(e.to_string()))?;

        let sock_ref = socket2::SockRef::from(&stream);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(30))
            .with_interval(Duration::from_secs(10));
        let _ = sock_ref.set_tcp_keepalive(&keepalive);
        let _ = stream.set_nodelay(true);

        let (reader, writer) = stream.into_split();
        tracing::info!("Printer connection established");
        Ok(Self::from_parts(reader, writer, read_timeout))
    }
}

impl<W: AsyncWrite + Unpin + Send> PrinterConnection<W> {
    /// Wrap an already-open byte stream.
    pub fn from_parts<R>(reader: R, writer: W, read_timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let reader_task = tokio::spawn(read_lines(BufReader::new(reader), tx));
        Self {
            writer,
            lines: rx,
            reader_task,
            read_timeout,
            lines_received: 0,
        }
    }

    pub async fn send_line(&mut self, line: &str) -> Result<(), LinkError> {
        tracing::trace!(line, "Send");
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next line from the printer, trailing whitespace removed.
    ///
    /// Cancel-safe: a line is never lost if the future is dropped.
    pub async fn next_line(&mut self) -> Result<String, LinkError> {
        match tokio::time::timeout(self.read_timeout, self.lines.recv()).await {
            Ok(Some(line)) => {
                self.lines_received += 1;
                tracing::trace!(line = %line, "Recv");
                Ok(line)
            }
            Ok(None) => Err(LinkError::ConnectionClosed),
            Err(_) => Err(LinkError::Timeout),
        }
    }

    pub fn lines_received(&self) -> u64 {
        self.lines_received
    }

    /// Close the write side and stop the reader.
    pub async fn shutdown(mut self) {
        let _ = self.writer.shutdown().await;
        self.reader_task.abort();
        tracing::info!(lines_received = self.lines_received, "Printer connection closed");
    }
}

async fn read_lines<R: AsyncRead + Unpin>(mut reader: BufReader<R>, tx: mpsc::Sender<String>) {
    let mut buffer = String::with_capacity(256);
    loop {
        buffer.clear();
        match reader.read_line(&mut buffer).await {
            Ok(0) => {
                tracing::debug!("Printer closed the connection");
                return;
            }
            Ok(_) => {
                let line = buffer.trim_end();
                if line.is_empty() {
                    continue;
                }
                if tx.send(line.to_string()).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Printer read failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lines_round_trip_over_duplex() {
        let (host_side, printer_side) = tokio::io::duplex(1024);
        let (host_read, host_write) = tokio::io::split(host_side);
        let (printer_read, mut printer_write) = tokio::io::split(printer_side);

        let mut conn = PrinterConnection::from_parts(host_read, host_write, Duration::from_secs(1));
        conn.send_line("M115").await.unwrap();

        let mut printer_reader = BufReader::new(printer_read);
        let mut got = String::new();
        printer_reader.read_line(&mut got).await.unwrap();
        assert_eq!(got, "M115\n");

        printer_write.write_all(b"FIRMWARE_NAME:Marlin\r\n\nok\n").await.unwrap();
        assert_eq!(conn.next_line().await.unwrap(), "FIRMWARE_NAME:Marlin");
        assert_eq!(conn.next_line().await.unwrap(), "ok");
        assert_eq!(conn.lines_received(), 2);
    }

    #[tokio::test]
    async fn test_closed_link_reports_closed() {
        let (host_side, printer_side) = tokio::io::duplex(64);
        let (host_read, host_write) = tokio::io::split(host_side);
        let mut conn = PrinterConnection::from_parts(host_read, host_write, Duration::from_secs(1));
        drop(printer_side);
        assert!(matches!(conn.next_line().await, Err(LinkError::ConnectionClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_printer_times_out() {
        let (host_side, _printer_side) = tokio::io::duplex(64);
        let (host_read, host_write) = tokio::io::split(host_side);
        let mut conn = PrinterConnection::from_parts(host_read, host_write, Duration::from_secs(5));
        assert!(matches!(conn.next_line().await, Err(LinkError::Timeout)));
    }
}
