//! Async serial port plumbing for the stacker driver.
//!
//! The stacker speaks a line-oriented ASCII protocol, so the port is always
//! held behind a `BufReader` for `read_line`. The port sits inside a
//! `tokio::sync::Mutex` so a single command/response transaction owns the
//! wire for its whole duration. The background poller goes through the same
//! lock and can never interleave bytes with a foreground command.
//!
//! # Example
//!
//! ```rust,ignore
//! use stacker_core::serial::{open_serial_async, wrap_shared};
//!
//! let port = open_serial_async("/dev/ot_module_flexstacker0", 115200).await?;
//! let shared = wrap_shared(Box::new(port));
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::Mutex;

/// Anything usable as the stacker's serial link.
///
/// Covers `tokio_serial::SerialStream` on hardware and
/// `tokio::io::DuplexStream` or channel-backed mocks in tests.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Line-buffered serial port behind an async mutex.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Wrap a port for shared, line-buffered access.
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

/// Open the stacker's serial port without blocking the runtime.
///
/// Applies 8N1 with no flow control.
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();

    let port = spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .with_context(|| format!("Failed to open Flex Stacker serial port: {}", port_path_owned))
    })
    .await
    .context("spawn_blocking for serial port opening failed")??;

    tracing::info!(port = port_path, baud_rate, "Opened Flex Stacker serial port");
    Ok(port)
}

/// Read and discard whatever is already waiting on the port.
///
/// Returns the number of bytes thrown away. Stops at EOF, on any read error,
/// or once nothing arrives for `quiet_ms`.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, quiet_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let mut total_discarded = 0usize;

    loop {
        match tokio::time::timeout(Duration::from_millis(quiet_ms), port.read(&mut discard)).await
        {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    total_discarded
}
