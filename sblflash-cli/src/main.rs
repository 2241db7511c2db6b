//! sblflash CLI - Command-line tool for the CC13xx/CC26xx ROM serial bootloader.
//!
//! ## Features
//!
//! - Raw byte transmit/receive for line debugging
//! - One subcommand per bootloader command
//! - Full erase sweep and image programming with optional CRC32 verification
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and configuration file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::{debug, info};
use sblflash::{Bootloader, ChipFamily, ErrorKind, FlashLayout, NativePort, Timeouts};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Baud rate used when neither flag, environment nor config name one.
const DEFAULT_BAUD: u32 = 115_200;

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// sblflash - host-side client for the CC13xx/CC26xx ROM serial bootloader.
///
/// Environment variables:
///   SBLFLASH_PORT              - Default serial port
///   SBLFLASH_BAUD              - Default baud rate (default: 115200)
///   SBLFLASH_CHIP              - Default chip family (cc26x0, cc13x0, cc26x2, cc13x2, custom)
///   SBLFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "sblflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "SBLFLASH_PORT")]
    pub port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "SBLFLASH_BAUD")]
    pub baud: Option<u32>,

    /// Target chip family.
    #[arg(short, long, global = true, env = "SBLFLASH_CHIP", value_parser = parse_chip)]
    pub chip: Option<ChipFamily>,

    /// Flash size in bytes, overriding the chip preset.
    #[arg(long, global = true, value_parser = parse_u32)]
    pub flash_size: Option<u32>,

    /// Flash page size in bytes, overriding the chip preset.
    #[arg(long, global = true, value_parser = parse_u32)]
    pub page_size: Option<u32>,

    /// Run the autobaud exchange right after opening the port.
    #[arg(short, long, global = true)]
    pub autobaud: bool,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "SBLFLASH_NON_INTERACTIVE")]
    pub non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Transmit a single raw byte.
    TxByte {
        /// Byte value (decimal, 0x hex or 0 octal).
        #[arg(value_parser = parse_byte)]
        byte: u8,
    },

    /// Transmit raw bytes.
    Tx {
        /// Byte values (decimal, 0x hex or 0 octal).
        #[arg(required = true, value_parser = parse_byte)]
        bytes: Vec<u8>,
    },

    /// Receive raw bytes and print them as hex.
    Rx {
        /// How long to wait for data, in milliseconds.
        #[arg(allow_negative_numbers = true)]
        timeout_ms: i64,
    },

    /// Synchronise the bootloader baud rate.
    Autobaud,

    /// Try autobaud at each baud rate until the bootloader answers.
    AutobaudScan {
        /// Comma-separated baud rates, tried in order.
        #[arg(long, value_delimiter = ',', value_parser = parse_u32)]
        bauds: Vec<u32>,
    },

    /// Check that the bootloader answers.
    Ping,

    /// Read the status of the last command.
    Status,

    /// Read the chip ID.
    ChipId,

    /// Reset the device.
    Reset,

    /// Announce a programming transfer.
    Download {
        /// Flash address.
        #[arg(value_parser = parse_u32)]
        addr: u32,
        /// Number of bytes that will follow.
        #[arg(value_parser = parse_u32)]
        len: u32,
    },

    /// Erase the flash page containing an address.
    Erase {
        /// Page address.
        #[arg(value_parser = parse_u32)]
        addr: u32,
    },

    /// Erase every page below the CCFG page.
    FullErase,

    /// Send one data block for an announced transfer.
    SendData {
        /// Byte values (at most 252).
        #[arg(required = true, value_parser = parse_byte)]
        bytes: Vec<u8>,
    },

    /// Compute a CRC32 over a flash range on the device.
    Crc {
        /// Start address.
        #[arg(value_parser = parse_u32)]
        addr: u32,
        /// Length in bytes.
        #[arg(value_parser = parse_u32)]
        len: u32,
        /// Read repeat count.
        #[arg(value_parser = parse_u32)]
        repeat: u32,
    },

    /// Program a binary image into flash.
    Program {
        /// Binary image file.
        file: PathBuf,
        /// Page-aligned base address.
        #[arg(value_parser = parse_u32)]
        addr: u32,
        /// Verify the written range with CRC32.
        #[arg(long)]
        verify: bool,
        /// Leave the device in the bootloader afterwards.
        #[arg(long)]
        no_reset: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

/// CLI failures that carry their own exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad arguments or setup.
    #[error("{0}")]
    Usage(String),
    /// The serial port could not be opened.
    #[error("{0}")]
    Open(String),
    /// Raw write failed.
    #[error("{0}")]
    Write(String),
    /// Buffer allocation failed.
    #[error("{0}")]
    Alloc(String),
    /// Raw read failed.
    #[error("{0}")]
    Read(String),
    /// Cancelled by the user.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 1,
            Self::Open(_) => 2,
            Self::Write(_) => 3,
            Self::Alloc(_) => 4,
            Self::Read(_) => 5,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(cli) = cause.downcast_ref::<CliError>() {
            return cli.exit_code();
        }
        if let Some(e) = cause.downcast_ref::<sblflash::Error>() {
            return match e.kind() {
                ErrorKind::Interrupted => 130,
                _ => 1,
            };
        }
    }
    1
}

/// Settings resolved from flags, environment and configuration files.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub baud: u32,
    pub chip: ChipFamily,
    /// No chip was given by flag, environment or configuration.
    pub chip_is_default: bool,
    pub flash_size: Option<u32>,
    pub page_size: Option<u32>,
    pub verify: bool,
    pub reset: bool,
}

impl Settings {
    fn resolve(cli: &Cli, config: &Config) -> Result<Self> {
        let chip = match (cli.chip, config.target.chip.as_deref()) {
            (Some(chip), _) => chip,
            (None, Some(name)) => ChipFamily::from_name(name).ok_or_else(|| {
                CliError::Usage(format!("Unknown chip '{name}' in configuration"))
            })?,
            (None, None) => ChipFamily::default(),
        };

        Ok(Self {
            baud: cli
                .baud
                .or(config.connection.baud)
                .unwrap_or(DEFAULT_BAUD),
            chip,
            chip_is_default: cli.chip.is_none() && config.target.chip.is_none(),
            flash_size: cli.flash_size.or(config.target.flash_size),
            page_size: cli.page_size.or(config.target.page_size),
            verify: config.program.verify.unwrap_or(false),
            reset: config.program.reset.unwrap_or(true),
        })
    }

    /// Flash geometry for the selected chip.
    pub fn layout(&self) -> Result<FlashLayout> {
        let layout = self
            .chip
            .layout(self.flash_size, self.page_size)
            .map_err(|e| CliError::Usage(e.to_string()))?;
        info!("{}", self.describe_layout(&layout));
        Ok(layout)
    }

    fn describe_layout(&self, layout: &FlashLayout) -> String {
        let source = if self.chip_is_default {
            " (default, pass --chip to change)"
        } else {
            ""
        };
        format!(
            "Target {}{source}: {} KiB flash, {} byte pages, CCFG at 0x{:08X}",
            self.chip,
            layout.flash_size() / 1024,
            layout.page_size(),
            layout.last_page_start()
        )
    }
}

/// Parse an unsigned number: `0x` hex, leading `0` octal, otherwise decimal.
fn parse_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let digits: String = s.chars().filter(|c| *c != '_').collect();
    let parsed = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        u32::from_str_radix(&digits[1..], 8)
    } else {
        digits.parse()
    };
    parsed.map_err(|e| format!("Invalid number '{s}': {e}"))
}

/// Parse a byte value in the same notations as [`parse_u32`].
fn parse_byte(s: &str) -> Result<u8, String> {
    parse_u32(s)
        .ok()
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| format!("Invalid byte: {s}"))
}

fn parse_chip(s: &str) -> Result<ChipFamily, String> {
    ChipFamily::from_name(s).ok_or_else(|| {
        let names: Vec<&str> = ChipFamily::ALL
            .iter()
            .map(ChipFamily::name)
            .collect();
        format!("Unknown chip '{s}' (expected one of: {})", names.join(", "))
    })
}

/// Get serial port from CLI args, config or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };
    select_serial_port(&options, config)
}

/// Open the serial port, mapping failure to the open exit code.
pub(crate) fn open_port(name: &str, baud: u32) -> Result<NativePort> {
    NativePort::open_simple(name, baud)
        .map_err(|e| CliError::Open(format!("Failed to open {name} at {baud} baud: {e}")).into())
}

/// Open the selected port and wrap it in a bootloader session.
pub(crate) fn connect(
    cli: &Cli,
    config: &Config,
    settings: &Settings,
) -> Result<Bootloader<NativePort>> {
    let port = get_port(cli, config)?;
    if !cli.quiet {
        eprintln!(
            "{} Using {} at {} baud",
            style("🔌").cyan(),
            style(&port).cyan(),
            settings.baud
        );
    }

    let mut bl = Bootloader::new(open_port(&port, settings.baud)?);
    if cli.autobaud {
        bl.autobaud(Timeouts::default().autobaud)?;
        debug!("Autobaud OK before command");
    }
    Ok(bl)
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    sblflash::set_interrupt_checker(was_interrupted);
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };
    let settings = Settings::resolve(cli, &config)?;
    debug!("Resolved settings: {settings:?}");

    match &cli.command {
        Commands::TxByte { byte } => commands::raw::cmd_tx_byte(cli, &config, &settings, *byte),
        Commands::Tx { bytes } => commands::raw::cmd_tx(cli, &config, &settings, bytes),
        Commands::Rx { timeout_ms } => commands::raw::cmd_rx(cli, &config, &settings, *timeout_ms),
        Commands::Autobaud => commands::device::cmd_autobaud(cli, &config, &settings),
        Commands::AutobaudScan { bauds } => {
            commands::device::cmd_autobaud_scan(cli, &config, bauds)
        },
        Commands::Ping => commands::device::cmd_ping(cli, &config, &settings),
        Commands::Status => commands::device::cmd_status(cli, &config, &settings),
        Commands::ChipId => commands::device::cmd_chip_id(cli, &config, &settings),
        Commands::Reset => commands::device::cmd_reset(cli, &config, &settings),
        Commands::Download { addr, len } => {
            commands::device::cmd_download(cli, &config, &settings, *addr, *len)
        },
        Commands::Erase { addr } => commands::device::cmd_erase(cli, &config, &settings, *addr),
        Commands::SendData { bytes } => {
            commands::device::cmd_send_data(cli, &config, &settings, bytes)
        },
        Commands::Crc { addr, len, repeat } => {
            commands::device::cmd_crc(cli, &config, &settings, *addr, *len, *repeat)
        },
        Commands::FullErase => commands::flash::cmd_full_erase(cli, &config, &settings),
        Commands::Program {
            file,
            addr,
            verify,
            no_reset,
        } => {
            let mut settings = settings.clone();
            settings.verify |= *verify;
            if *no_reset {
                settings.reset = false;
            }
            commands::flash::cmd_program(cli, &config, &settings, file, *addr)
        },
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "specify a shell type, e.g.: sblflash completions bash \
                         (or use --install to auto-install)"
                            .to_string(),
                    )
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind as ClapKind;
            let code = match err.kind() {
                ClapKind::DisplayHelp | ClapKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(code);
        },
    };

    init_logging(&cli);
    install_interrupt_handler();
    debug!(
        "sblflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = run(&cli) {
        let code = if was_interrupted() {
            130
        } else {
            exit_code(&err)
        };
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(code);
    }
}
