//! Interactive serial port selection.
//!
//! Port resolution order:
//! - `--port` / `SBLFLASH_PORT`
//! - `[connection] port` from the configuration file
//! - enumeration, preferring TI debug probes (XDS110 and friends)
//!
//! A single candidate is used directly, several candidates are offered in a
//! prompt. In non-interactive mode anything but exactly one candidate is a
//! usage error.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    sblflash::{NativePortEnumerator, PortEnumerator, PortInfo},
    std::io::IsTerminal,
};

/// Texas Instruments USB vendor ID.
pub const TI_VID: u16 = 0x0451;

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI or environment.
    pub port: Option<String>,
    /// Non-interactive mode (fail if the choice is ambiguous).
    pub non_interactive: bool,
}

/// What to do with the enumerated ports.
#[derive(Debug)]
enum Choice {
    Use(String),
    Confirm(PortInfo),
    Prompt(Vec<PortInfo>),
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Whether a port belongs to a TI probe.
pub fn is_known_device(port: &PortInfo) -> bool {
    port.vid == Some(TI_VID)
}

/// One-line description of a port for lists and prompts.
pub fn port_label(port: &PortInfo) -> String {
    let ids = match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
        _ => String::new(),
    };
    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();
    format!("{}{ids}{product}", port.name)
}

fn plan_selection(ports: Vec<PortInfo>, non_interactive: bool) -> Result<Choice> {
    let known: Vec<PortInfo> = ports
        .iter()
        .filter(|p| is_known_device(p))
        .cloned()
        .collect();
    let mut candidates = if known.is_empty() { ports } else { known };

    if candidates.len() > 1 {
        if non_interactive {
            return Err(usage_err(
                "Found multiple serial ports; pick one with --port in non-interactive mode",
            ));
        }
        return Ok(Choice::Prompt(candidates));
    }

    match candidates.pop() {
        Some(port) if non_interactive || is_known_device(&port) => {
            info!("Auto-selected port: {}", port.name);
            Ok(Choice::Use(port.name))
        },
        Some(port) => Ok(Choice::Confirm(port)),
        None => Err(usage_err("No serial ports found; name one with --port")),
    }
}

/// Resolve the serial port to use.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<String> {
    if let Some(port_name) = &options.port {
        return Ok(port_name.clone());
    }

    if let Some(port_name) = &config.connection.port {
        debug!("Using port from config: {port_name}");
        return Ok(port_name.clone());
    }

    let ports = NativePortEnumerator::list_ports()
        .map_err(|e| usage_err(&format!("Could not list serial ports: {e}")))?;
    debug!("Enumerated {} serial ports", ports.len());

    match plan_selection(ports, options.non_interactive)? {
        Choice::Use(name) => Ok(name),
        Choice::Confirm(port) => {
            ensure_interactive_terminal()?;
            confirm_single_port(&port)
        },
        Choice::Prompt(ports) => {
            ensure_interactive_terminal()?;
            select_port_interactive(ports)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs a terminal; pass --port or --non-interactive",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err(&format!("Port prompt failed: {io_err}"))
            }
        },
    }
}

/// Fit a label into `width` columns without wrapping.
fn fit_label(label: &str, width: usize) -> String {
    console::truncate_str(label, width.saturating_sub(4), "\u{2026}").into_owned()
}

/// Interactive port selection.
fn select_port_interactive(mut ports: Vec<PortInfo>) -> Result<String> {
    eprintln!(
        "{} Detected {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    ports.sort_by_key(|p| !is_known_device(p));

    let term_width = console::Term::stderr().size().1 as usize;
    let labels: Vec<String> = ports
        .iter()
        .map(|port| {
            let label = port_label(port);
            let label = if is_known_device(port) {
                style(label).bold().to_string()
            } else {
                label
            };
            fit_label(&label, term_width)
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .map(|p| p.name)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Confirm use of a single unrecognized port.
fn confirm_single_port(port: &PortInfo) -> Result<String> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}?", port_label(port)))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(port.name.clone())
    } else {
        Err(CliError::Cancelled("Port selection cancelled".to_string()).into())
    }
}
