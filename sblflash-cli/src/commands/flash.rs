//! Full erase and image programming.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use sblflash::{ProgramOptions, Progress, Timeouts, erase_all, program_image};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::config::Config;
use crate::{Cli, CliError, Settings, connect, use_fancy_output};

/// Read an image, reserving its buffer up front.
fn load_image(path: &Path) -> Result<Vec<u8>> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open image {}", path.display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("Failed to stat image {}", path.display()))?
        .len();
    let len = usize::try_from(len)
        .map_err(|_| CliError::Alloc(format!("Image {} is too large", path.display())))?;

    let mut image = Vec::new();
    image.try_reserve_exact(len).map_err(|e| {
        CliError::Alloc(format!(
            "Cannot allocate {len} bytes for {}: {e}",
            path.display()
        ))
    })?;
    file.read_to_end(&mut image)
        .with_context(|| format!("Failed to read image {}", path.display()))?;
    Ok(image)
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Map a progress event onto the 0..=100 bar.
fn render(pb: &ProgressBar, event: Progress) {
    match event {
        Progress::Erased { addr, index, count } => {
            pb.set_message(format!("Erasing 0x{addr:08X}"));
            pb.set_position(u64::from(index) * 100 / u64::from(count.max(1)));
        },
        Progress::Programmed { offset, total, percent } => {
            pb.set_message(format!("Programming {offset}/{total}"));
            pb.set_position(u64::from(percent));
        },
        Progress::Verified { crc } => {
            pb.set_message(format!("Verified CRC 0x{crc:08X}"));
        },
    }
}

/// `full-erase` implementation.
pub(crate) fn cmd_full_erase(cli: &Cli, config: &Config, settings: &Settings) -> Result<()> {
    let layout = settings.layout()?;
    let mut bl = connect(cli, config, settings)?;

    erase_all(&mut bl, &layout, &Timeouts::default(), |event| {
        if let Progress::Erased { addr, .. } = event {
            println!("Erase OK at 0x{addr:08X}");
        }
    })?;
    println!(
        "Full erase done up to (but not including) CCFG at 0x{:08X}",
        layout.last_page_start()
    );
    bl.close()?;
    Ok(())
}

/// `program` implementation.
pub(crate) fn cmd_program(
    cli: &Cli,
    config: &Config,
    settings: &Settings,
    file: &Path,
    addr: u32,
) -> Result<()> {
    let layout = settings.layout()?;
    let image = load_image(file)?;
    let plan = layout.plan(addr, image.len())?;

    if !cli.quiet {
        eprintln!(
            "{} {} ({} bytes) -> 0x{:08X}, {} pages of {} bytes on {}",
            style("📦").cyan(),
            file.display(),
            plan.image_len,
            plan.base_addr,
            plan.page_count(),
            layout.page_size(),
            settings.chip
        );
    }

    let mut bl = connect(cli, config, settings)?;
    let options = ProgramOptions {
        verify: settings.verify,
        reset: settings.reset,
        ..ProgramOptions::default()
    };

    let pb = progress_bar(cli.quiet);
    let result = program_image(&mut bl, &layout, &image, addr, &options, |event| {
        render(&pb, event);
    });
    let summary = match result {
        Ok(summary) => summary,
        Err(err) => {
            pb.abandon();
            return Err(err.into());
        },
    };
    pb.finish_with_message("done");

    println!(
        "Programmed {} bytes at 0x{:08X} ({} bytes sent).",
        summary.plan.image_len, summary.plan.base_addr, summary.plan.total_len
    );
    if let Some(crc) = summary.crc {
        println!("CRC OK. Received CRC: 0x{crc:08X}");
    }
    if summary.reset {
        println!("RESET OK.");
    }
    bl.close()?;

    if !cli.quiet {
        eprintln!("\n{} Programming completed", style("🎉").green().bold());
    }
    Ok(())
}
