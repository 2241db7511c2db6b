//! Raw line tools: send bytes, dump whatever arrives.

use anyhow::Result;
use sblflash::{NativePort, Port};
use std::time::Duration;

use crate::config::Config;
use crate::{Cli, CliError, Settings, get_port, open_port};

/// Receive buffer size for `rx`.
const RX_BUF_LEN: usize = 256;

fn open_raw(cli: &Cli, config: &Config, settings: &Settings) -> Result<NativePort> {
    let name = get_port(cli, config)?;
    open_port(&name, settings.baud)
}

fn write_raw(port: &mut NativePort, bytes: &[u8]) -> Result<()> {
    port.write_all_bytes(bytes)
        .map_err(|e| CliError::Write(format!("Write failed: {e}")).into())
}

/// Format bytes the way `rx` prints them.
fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("0x{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Negative timeouts mean "do not wait".
fn rx_timeout(timeout_ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(timeout_ms).unwrap_or(0))
}

/// `tx-byte` implementation.
pub(crate) fn cmd_tx_byte(cli: &Cli, config: &Config, settings: &Settings, byte: u8) -> Result<()> {
    let mut port = open_raw(cli, config, settings)?;
    write_raw(&mut port, &[byte])?;
    println!("Sent 1 byte: 0x{byte:02X}");
    port.close()?;
    Ok(())
}

/// `tx` implementation.
pub(crate) fn cmd_tx(cli: &Cli, config: &Config, settings: &Settings, bytes: &[u8]) -> Result<()> {
    let mut port = open_raw(cli, config, settings)?;
    write_raw(&mut port, bytes)?;
    println!("Sent {} bytes.", bytes.len());
    port.close()?;
    Ok(())
}

/// `rx` implementation.
pub(crate) fn cmd_rx(cli: &Cli, config: &Config, settings: &Settings, timeout_ms: i64) -> Result<()> {
    let mut port = open_raw(cli, config, settings)?;
    let mut buf = [0u8; RX_BUF_LEN];
    let n = port
        .read_timeout(&mut buf, rx_timeout(timeout_ms))
        .map_err(|e| CliError::Read(format!("Read failed: {e}")))?;

    if n == 0 {
        println!("Timeout: no data received.");
    } else {
        println!("Received {n} bytes:");
        println!("{}", hex_dump(&buf[..n]));
    }
    port.close()?;
    Ok(())
}
