//! Channel-backed mock serial port for driver integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{timeout, Duration};

/// The driver-facing side of the mock serial port.
#[derive(Debug)]
pub struct MockSerialPort {
    writes_tx: UnboundedSender<Vec<u8>>,
    reads_rx: UnboundedReceiver<Vec<u8>>,
    read_buffer: VecDeque<u8>,
}

/// The test-facing side, playing the stacker firmware.
#[derive(Debug)]
pub struct MockDeviceHarness {
    writes_rx: UnboundedReceiver<Vec<u8>>,
    reads_tx: UnboundedSender<Vec<u8>>,
    write_buffer: Vec<u8>,
}

pub fn new_mock_serial() -> (MockSerialPort, MockDeviceHarness) {
    let (client_to_harness_tx, client_to_harness_rx) = mpsc::unbounded_channel();
    let (harness_to_client_tx, harness_to_client_rx) = mpsc::unbounded_channel();

    let port = MockSerialPort {
        writes_tx: client_to_harness_tx,
        reads_rx: harness_to_client_rx,
        read_buffer: VecDeque::new(),
    };

    let harness = MockDeviceHarness {
        writes_rx: client_to_harness_rx,
        reads_tx: harness_to_client_tx,
        write_buffer: Vec::new(),
    };

    (port, harness)
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.read_buffer.is_empty() {
            match self.reads_rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => self.read_buffer.extend(chunk),
                Poll::Ready(None) => return Poll::Ready(Ok(())), // EOF
                Poll::Pending => return Poll::Pending,
            }
        }

        let to_read = std::cmp::min(buf.remaining(), self.read_buffer.len());
        let chunk: Vec<u8> = self.read_buffer.drain(..to_read).collect();
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.writes_tx.send(buf.to_vec()) {
            Ok(_) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock device harness disconnected",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl MockDeviceHarness {
    /// Queue bytes for the driver to read.
    pub fn send_response(&self, data: &[u8]) {
        self.reads_tx
            .send(data.to_vec())
            .expect("driver side of mock port dropped");
    }

    async fn fill_until_newline(&mut self, wait: Duration) -> bool {
        while !self.write_buffer.contains(&b'\n') {
            match timeout(wait, self.writes_rx.recv()).await {
                Ok(Some(chunk)) => self.write_buffer.extend_from_slice(&chunk),
                Ok(None) | Err(_) => return false,
            }
        }
        true
    }

    /// Next complete line written by the driver, terminator included.
    pub async fn next_line(&mut self) -> String {
        assert!(
            self.fill_until_newline(Duration::from_secs(2)).await,
            "Timeout waiting for a command line, buffered `{}`",
            String::from_utf8_lossy(&self.write_buffer)
        );
        let end = self
            .write_buffer
            .iter()
            .position(|b| *b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(self.write_buffer.len());
        let line: Vec<u8> = self.write_buffer.drain(..end).collect();
        String::from_utf8_lossy(&line).into_owned()
    }

    /// Assert the next line written equals `expected`.
    pub async fn expect_write(&mut self, expected: &str) {
        let line = self.next_line().await;
        assert_eq!(line, expected, "unexpected command on the wire");
    }

    pub async fn expect_and_respond(&mut self, expected: &str, response: &str) {
        self.expect_write(expected).await;
        self.send_response(response.as_bytes());
    }

    /// Assert nothing is written for `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        let wrote = self.fill_until_newline(wait).await || !self.write_buffer.is_empty();
        assert!(
            !wrote,
            "expected no writes, got `{}`",
            String::from_utf8_lossy(&self.write_buffer)
        );
    }
}
