//! One subcommand per bootloader command.

use anyhow::Result;
use console::style;
use sblflash::protocol::MAX_DATA_LEN;
use sblflash::{
    Bootloader, DEFAULT_SCAN_BAUDS, NativePort, Timeouts, autobaud_scan, erase_page,
};

use crate::config::Config;
use crate::{Cli, CliError, Settings, connect, get_port, open_port};

/// Print a success line and release the port.
fn finish(mut bl: Bootloader<NativePort>, message: &str) -> Result<()> {
    println!("{message}");
    bl.close()?;
    Ok(())
}

/// `autobaud` implementation.
///
/// Opens the port directly so `--autobaud` does not sync twice.
pub(crate) fn cmd_autobaud(cli: &Cli, config: &Config, settings: &Settings) -> Result<()> {
    let name = get_port(cli, config)?;
    let mut bl = Bootloader::new(open_port(&name, settings.baud)?);
    bl.autobaud(Timeouts::default().autobaud)?;
    finish(bl, "Auto-baud OK (ACK 0xCC).")
}

/// `autobaud-scan` implementation.
pub(crate) fn cmd_autobaud_scan(cli: &Cli, config: &Config, bauds: &[u32]) -> Result<()> {
    let name = get_port(cli, config)?;
    let bauds = if bauds.is_empty() {
        DEFAULT_SCAN_BAUDS
    } else {
        bauds
    };

    if !cli.quiet {
        eprintln!(
            "{} Scanning {} at {} baud rates",
            style("⏳").yellow(),
            style(&name).cyan(),
            bauds.len()
        );
    }

    let found = autobaud_scan(bauds, Timeouts::default().autobaud, |baud| {
        NativePort::open_simple(&name, baud)
    })?;
    println!("Auto-baud OK at {found} (ACK 0xCC).");
    Ok(())
}

/// `ping` implementation.
pub(crate) fn cmd_ping(cli: &Cli, config: &Config, settings: &Settings) -> Result<()> {
    let mut bl = connect(cli, config, settings)?;
    bl.ping(Timeouts::default().query)?;
    finish(bl, "PING OK.")
}

/// `status` implementation.
pub(crate) fn cmd_status(cli: &Cli, config: &Config, settings: &Settings) -> Result<()> {
    let mut bl = connect(cli, config, settings)?;
    let status = bl.get_status(Timeouts::default().status)?;
    finish(bl, &format!("STATUS: 0x{:02X}", status.raw()))
}

/// `chip-id` implementation.
pub(crate) fn cmd_chip_id(cli: &Cli, config: &Config, settings: &Settings) -> Result<()> {
    let mut bl = connect(cli, config, settings)?;
    let id = bl.get_chip_id(Timeouts::default().query)?;
    finish(bl, &format!("CHIP ID: 0x{id:08X}"))
}

/// `reset` implementation.
pub(crate) fn cmd_reset(cli: &Cli, config: &Config, settings: &Settings) -> Result<()> {
    let mut bl = connect(cli, config, settings)?;
    bl.reset(Timeouts::default().reset)?;
    finish(bl, "RESET OK.")
}

/// `download` implementation.
pub(crate) fn cmd_download(
    cli: &Cli,
    config: &Config,
    settings: &Settings,
    addr: u32,
    len: u32,
) -> Result<()> {
    let timeouts = Timeouts::default();
    let mut bl = connect(cli, config, settings)?;
    bl.download(addr, len, timeouts.download)?;
    bl.check_status("DOWNLOAD", timeouts.status)?;
    finish(
        bl,
        &format!("Download accepted: addr=0x{addr:08X} len={len}"),
    )
}

/// `erase` implementation.
pub(crate) fn cmd_erase(cli: &Cli, config: &Config, settings: &Settings, addr: u32) -> Result<()> {
    let mut bl = connect(cli, config, settings)?;
    erase_page(&mut bl, addr, &Timeouts::default())?;
    finish(bl, &format!("Erase OK at 0x{addr:08X}"))
}

/// `send-data` implementation.
pub(crate) fn cmd_send_data(
    cli: &Cli,
    config: &Config,
    settings: &Settings,
    bytes: &[u8],
) -> Result<()> {
    if bytes.len() > MAX_DATA_LEN {
        return Err(CliError::Usage(format!("Too many bytes (max {MAX_DATA_LEN})")).into());
    }

    let mut bl = connect(cli, config, settings)?;
    bl.send_data(bytes, Timeouts::default().send_data)?;
    finish(bl, &format!("Sent {} data bytes OK.", bytes.len()))
}

/// `crc` implementation.
pub(crate) fn cmd_crc(
    cli: &Cli,
    config: &Config,
    settings: &Settings,
    addr: u32,
    len: u32,
    repeat: u32,
) -> Result<()> {
    let timeouts = Timeouts::default();
    let mut bl = connect(cli, config, settings)?;
    let crc = bl.crc32(addr, len, repeat, timeouts.crc32)?;
    bl.check_status("CRC32", timeouts.status)?;
    finish(bl, &format!("CRC OK. Received CRC: 0x{crc:08X}"))
}
