//! Serial port listing.

use anyhow::Result;
use console::style;
use log::warn;
use sblflash::{NativePortEnumerator, PortEnumerator, PortInfo};

use crate::serial::{is_known_device, port_label};

/// Each port's [`PortInfo`] fields plus whether it looks like a TI probe.
fn ports_json(ports: &[PortInfo]) -> serde_json::Result<serde_json::Value> {
    ports
        .iter()
        .map(|p| {
            let mut value = serde_json::to_value(p)?;
            if let Some(obj) = value.as_object_mut() {
                obj.insert("known".into(), is_known_device(p).into());
            }
            Ok(value)
        })
        .collect()
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports().unwrap_or_else(|e| {
        warn!("Could not list serial ports: {e}");
        Vec::new()
    });

    if json {
        println!("{}", serde_json::to_string_pretty(&ports_json(&ports)?)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());
    if ports.is_empty() {
        eprintln!("  {}", style("(none)").dim());
        return Ok(());
    }

    for port in &ports {
        let marker = if is_known_device(port) {
            format!(" [{}]", style("TI").yellow())
        } else {
            String::new()
        };
        eprintln!(
            "  {} {}{marker}",
            style("•").green(),
            style(port_label(port)).cyan()
        );
    }
    Ok(())
}
