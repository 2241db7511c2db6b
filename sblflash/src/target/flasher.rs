//! Flash programming workflow.
//!
//! [`program_image`] drives the whole sequence for one image:
//!
//! 1. plan and validate (no device traffic on failure)
//! 2. SECTOR_ERASE + GET_STATUS for every page the image covers
//! 3. DOWNLOAD + GET_STATUS
//! 4. SEND_DATA + GET_STATUS per chunk of at most 252 bytes
//! 5. optional CRC32 readback
//! 6. RESET (best effort)
//!
//! The first failure aborts the run. Nothing is rolled back; a target left
//! behind by a failed run needs a fresh erase and program cycle.

use log::{debug, info, warn};

use crate::bootloader::{Bootloader, Timeouts};
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::frame::MAX_DATA_LEN;
use crate::target::layout::{FlashLayout, PAD_BYTE, ProgramPlan};

/// CRC used by the bootloader's CRC32 command.
pub const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Settings for [`program_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramOptions {
    /// Per-command time budgets.
    pub timeouts: Timeouts,
    /// Read back a CRC32 of the programmed range and compare it.
    pub verify: bool,
    /// Send RESET after a successful run.
    pub reset: bool,
}

impl Default for ProgramOptions {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            verify: false,
            reset: true,
        }
    }
}

/// Progress notifications emitted while the workflow runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A page was erased and its status checked.
    Erased {
        /// Address of the page just erased.
        addr: u32,
        /// 1-based index of the page.
        index: u32,
        /// Number of pages to erase.
        count: u32,
    },
    /// The integer percentage of bytes sent changed.
    Programmed {
        /// Bytes sent so far.
        offset: u32,
        /// Bytes announced with DOWNLOAD.
        total: u32,
        /// `offset * 100 / total`.
        percent: u32,
    },
    /// CRC32 readback matched.
    Verified {
        /// The matching CRC.
        crc: u32,
    },
}

/// Outcome of a successful [`program_image`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramSummary {
    /// The plan that was carried out.
    pub plan: ProgramPlan,
    /// CRC confirmed by readback, if verification ran.
    pub crc: Option<u32>,
    /// Whether the device acknowledged RESET.
    pub reset: bool,
}

/// Attach the failing step to an error. Device rejections already name it.
fn annotate(err: Error, step: &str) -> Error {
    match err {
        Error::DeviceRejected { .. } => err,
        other => other.context(step),
    }
}

/// Erase one page and confirm it with GET_STATUS.
pub fn erase_page<P: Port>(bl: &mut Bootloader<P>, addr: u32, timeouts: &Timeouts) -> Result<()> {
    let step = format!("SECTOR_ERASE at 0x{addr:08X}");
    bl.sector_erase(addr, timeouts.sector_erase)
        .and_then(|()| bl.check_status(&step, timeouts.erase_status))
        .map_err(|e| annotate(e, &step))
}

/// Erase the given pages in order, stopping at the first failure.
pub fn erase_range<P, I, F>(
    bl: &mut Bootloader<P>,
    pages: I,
    timeouts: &Timeouts,
    progress: &mut F,
) -> Result<u32>
where
    P: Port,
    I: ExactSizeIterator<Item = u32>,
    F: FnMut(Progress),
{
    let count = u32::try_from(pages.len()).unwrap_or(u32::MAX);
    let mut erased = 0;
    for addr in pages {
        crate::check_interrupted()?;
        erase_page(bl, addr, timeouts)?;
        erased += 1;
        debug!("Erased 0x{addr:08X}");
        progress(Progress::Erased {
            addr,
            index: erased,
            count,
        });
    }
    Ok(erased)
}

/// Erase every page below the CCFG page.
pub fn erase_all<P, F>(
    bl: &mut Bootloader<P>,
    layout: &FlashLayout,
    timeouts: &Timeouts,
    mut progress: F,
) -> Result<u32>
where
    P: Port,
    F: FnMut(Progress),
{
    let pages: Vec<u32> = layout.pages_before_ccfg().collect();
    info!(
        "Erasing {} pages up to the CCFG page at 0x{:08X}",
        pages.len(),
        layout.last_page_start()
    );
    erase_range(bl, pages.into_iter(), timeouts, &mut progress)
}

/// Host-side CRC32 of `image` padded with `0xFF` to `total_len` bytes.
pub fn padded_crc(image: &[u8], total_len: u32) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(image);
    let pad = (total_len as usize).saturating_sub(image.len());
    for _ in 0..pad {
        digest.update(&[PAD_BYTE]);
    }
    digest.finalize()
}

/// Ask the device for the CRC32 of `len` bytes at `addr` and compare it with
/// `expected`.
pub fn verify_crc<P: Port>(
    bl: &mut Bootloader<P>,
    addr: u32,
    len: u32,
    expected: u32,
    timeouts: &Timeouts,
) -> Result<u32> {
    let end = u64::from(addr) + u64::from(len);
    let step = format!("CRC32 of 0x{addr:08X}..0x{end:08X}");
    let actual = bl
        .crc32(addr, len, 0, timeouts.crc32)
        .and_then(|crc| bl.check_status(&step, timeouts.status).map(|()| crc))
        .map_err(|e| annotate(e, &step))?;

    if actual != expected {
        return Err(Error::Protocol(format!(
            "CRC mismatch over 0x{addr:08X}..0x{end:08X}: device 0x{actual:08X}, image 0x{expected:08X}"
        )));
    }
    Ok(actual)
}

/// Program `image` at `base_addr`.
///
/// `progress` receives one [`Progress::Erased`] per page and a
/// [`Progress::Programmed`] each time the percentage sent changes.
pub fn program_image<P, F>(
    bl: &mut Bootloader<P>,
    layout: &FlashLayout,
    image: &[u8],
    base_addr: u32,
    options: &ProgramOptions,
    mut progress: F,
) -> Result<ProgramSummary>
where
    P: Port,
    F: FnMut(Progress),
{
    let plan = layout.plan(base_addr, image.len())?;
    let t = &options.timeouts;
    info!(
        "Programming {} bytes at 0x{:08X} ({} pages to erase)",
        plan.image_len,
        plan.base_addr,
        plan.page_count()
    );

    let pages: Vec<u32> = plan.erase_pages().collect();
    erase_range(bl, pages.into_iter(), t, &mut progress)?;

    crate::check_interrupted()?;
    let step = format!("DOWNLOAD 0x{:08X}, {} bytes", plan.base_addr, plan.total_len);
    bl.download(plan.base_addr, plan.total_len, t.download)
        .and_then(|()| bl.check_status(&step, t.status))
        .map_err(|e| annotate(e, &step))?;

    let total = plan.total_len as usize;
    let mut chunk = [PAD_BYTE; MAX_DATA_LEN];
    let mut offset = 0usize;
    let mut percent = 0u32;
    while offset < total {
        crate::check_interrupted()?;

        let len = (total - offset).min(MAX_DATA_LEN);
        let copy = image.len().saturating_sub(offset).min(len);
        chunk[..copy].copy_from_slice(&image[offset..offset + copy]);
        chunk[copy..len].fill(PAD_BYTE);

        let step = format!("SEND_DATA at offset {offset}");
        bl.send_data(&chunk[..len], t.send_data)
            .and_then(|()| bl.check_status(&step, t.status))
            .map_err(|e| annotate(e, &step))?;

        offset += len;
        let now = u32::try_from(offset as u64 * 100 / total as u64).unwrap_or(100);
        if now != percent {
            percent = now;
            progress(Progress::Programmed {
                offset: u32::try_from(offset).unwrap_or(u32::MAX),
                total: plan.total_len,
                percent,
            });
        }
    }
    info!("Sent {} bytes", plan.total_len);

    let crc = if options.verify {
        let expected = padded_crc(image, plan.total_len);
        let crc = verify_crc(bl, plan.base_addr, plan.total_len, expected, t)?;
        info!("CRC32 0x{crc:08X} verified");
        progress(Progress::Verified { crc });
        Some(crc)
    } else {
        None
    };

    let reset = if options.reset {
        match bl.reset(t.reset) {
            Ok(()) => true,
            Err(e) => {
                warn!("RESET failed after programming: {e}");
                false
            },
        }
    } else {
        false
    };

    Ok(ProgramSummary { plan, crc, reset })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::SimulatedDevice;
    use crate::protocol::frame::{Command, Status};

    fn fast() -> ProgramOptions {
        let ms = std::time::Duration::from_millis(100);
        ProgramOptions {
            timeouts: Timeouts {
                sector_erase: ms,
                erase_status: ms,
                status: ms,
                download: ms,
                send_data: ms,
                reset: ms,
                crc32: ms,
                autobaud: ms,
                query: ms,
            },
            ..ProgramOptions::default()
        }
    }

    fn setup(flash_size: u32, page_size: u32) -> (Bootloader<SimulatedDevice>, FlashLayout) {
        // RUST_LOG=trace shows the packet exchange of a failing test.
        let _ = env_logger::builder().is_test(true).try_init();
        (
            Bootloader::new(SimulatedDevice::new(flash_size, page_size)),
            FlashLayout::new(flash_size, page_size).unwrap(),
        )
    }

    #[test]
    fn test_program_ten_byte_image() {
        let (mut bl, layout) = setup(0x40000, 0x1000);
        let image = *b"0123456789";

        let mut events = Vec::new();
        let summary =
            program_image(&mut bl, &layout, &image, 0x2000, &fast(), |p| events.push(p)).unwrap();

        let dev = bl.port();
        assert_eq!(
            dev.commands(),
            vec![
                Command::SectorErase,
                Command::GetStatus,
                Command::Download,
                Command::GetStatus,
                Command::SendData,
                Command::GetStatus,
                Command::Reset,
            ]
        );
        assert_eq!(dev.logged(Command::SectorErase)[0].u32_arg(0), 0x2000);
        let download = dev.logged(Command::Download)[0];
        assert_eq!((download.u32_arg(0), download.u32_arg(1)), (0x2000, 12));

        let data = &dev.logged(Command::SendData)[0].args;
        assert_eq!(data.len(), 12);
        assert_eq!(&data[..10], &image);
        assert_eq!(&data[10..], [0xFF, 0xFF]);
        assert_eq!(&dev.flash[0x2000..0x200A], &image);

        assert!(summary.reset);
        assert_eq!(summary.crc, None);
        assert_eq!(
            events,
            vec![
                Progress::Erased {
                    addr: 0x2000,
                    index: 1,
                    count: 1
                },
                Progress::Programmed {
                    offset: 12,
                    total: 12,
                    percent: 100
                },
            ]
        );
    }

    #[test]
    fn test_chunks_are_padded_with_ff() {
        let (mut bl, layout) = setup(0x40000, 0x1000);
        let image = vec![0x5A; 598];

        program_image(&mut bl, &layout, &image, 0, &fast(), |_| {}).unwrap();

        let dev = bl.port();
        assert_eq!(dev.logged(Command::Download)[0].u32_arg(1), 600);
        let chunks: Vec<usize> = dev
            .logged(Command::SendData)
            .iter()
            .map(|l| l.args.len())
            .collect();
        assert_eq!(chunks, vec![252, 252, 96]);
        let last = &dev.logged(Command::SendData)[2].args;
        assert_eq!(&last[94..], [0xFF, 0xFF]);
        assert!(last[..94].iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_word_aligned_image_needs_no_padding() {
        let (mut bl, layout) = setup(0x40000, 0x1000);
        let image = vec![0x11; 504];

        program_image(&mut bl, &layout, &image, 0x1000, &fast(), |_| {}).unwrap();

        let dev = bl.port();
        assert_eq!(dev.logged(Command::Download)[0].u32_arg(1), 504);
        assert_eq!(dev.logged(Command::SendData).len(), 2);
    }

    #[test]
    fn test_percent_reported_only_on_change() {
        let (mut bl, layout) = setup(0x40000, 0x1000);
        let image = vec![0u8; 252 * 3];

        let mut percents = Vec::new();
        program_image(&mut bl, &layout, &image, 0, &fast(), |p| {
            if let Progress::Programmed { percent, .. } = p {
                percents.push(percent);
            }
        })
        .unwrap();
        assert_eq!(percents, vec![33, 66, 100]);
    }

    #[test]
    fn test_misaligned_base_touches_nothing() {
        let (mut bl, layout) = setup(0x40000, 0x1000);
        let err = program_image(&mut bl, &layout, &[1, 2, 3], 0x2004, &fast(), |_| {}).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(bl.port().log.is_empty());
    }

    #[test]
    fn test_erase_failure_aborts_with_address_and_status() {
        let (mut bl, layout) = setup(0x40000, 0x1000);
        bl.port_mut().fail_erase_at.insert(0x3000);
        let image = vec![0u8; 0x1800];

        let err = program_image(&mut bl, &layout, &image, 0x2000, &fast(), |_| {}).unwrap_err();
        assert_eq!(err.status(), Some(Status::FlashFail));
        assert!(err.to_string().contains("0x00003000"));
        assert!(bl.port().logged(Command::Download).is_empty());
    }

    #[test]
    fn test_send_data_failure_aborts_with_offset() {
        let (mut bl, layout) = setup(0x40000, 0x1000);
        bl.port_mut().fail_send_data_at = Some(1);
        let image = vec![0u8; 600];

        let err = program_image(&mut bl, &layout, &image, 0, &fast(), |_| {}).unwrap_err();
        assert_eq!(err.status(), Some(Status::FlashFail));
        assert!(err.to_string().contains("offset 252"));
        let dev = bl.port();
        assert_eq!(dev.logged(Command::SendData).len(), 2);
        assert!(dev.logged(Command::Reset).is_empty());
    }

    #[test]
    fn test_download_rejection_aborts() {
        let (mut bl, layout) = setup(0x40000, 0x1000);
        bl.port_mut().download_status = Status::InvalidAddr;

        let err = program_image(&mut bl, &layout, &[0; 8], 0, &fast(), |_| {}).unwrap_err();
        assert_eq!(err.status(), Some(Status::InvalidAddr));
        assert!(bl.port().logged(Command::SendData).is_empty());
    }

    #[test]
    fn test_timeout_mid_transfer_is_annotated() {
        let (mut bl, layout) = setup(0x40000, 0x1000);
        // Erase, status, download, status, send, status, then silence.
        bl.port_mut().go_silent_after = Some(6);
        let image = vec![0u8; 600];

        let err = program_image(&mut bl, &layout, &image, 0, &fast(), |_| {}).unwrap_err();
        assert!(matches!(err.root_cause(), Error::Timeout(_)));
        assert!(err.to_string().contains("SEND_DATA at offset 252"));
    }

    #[test]
    fn test_verify_matches_padded_image() {
        let (mut bl, layout) = setup(0x40000, 0x1000);
        let image = vec![0xA5; 301];
        let options = ProgramOptions {
            verify: true,
            ..fast()
        };

        let summary = program_image(&mut bl, &layout, &image, 0x4000, &options, |_| {}).unwrap();
        assert_eq!(summary.crc, Some(padded_crc(&image, 304)));
        let crc = bl.port().logged(Command::Crc32)[0];
        assert_eq!((crc.u32_arg(0), crc.u32_arg(1)), (0x4000, 304));
    }

    #[test]
    fn test_verify_detects_mismatch() {
        let (mut bl, _) = setup(0x40000, 0x1000);
        let timeouts = fast().timeouts;

        let err = verify_crc(&mut bl, 0x1000, 8, 0xDEAD_BEEF, &timeouts).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(err.to_string().contains("0xDEADBEEF"));

        let erased = padded_crc(&[], 8);
        assert_eq!(verify_crc(&mut bl, 0x1000, 8, erased, &timeouts).unwrap(), erased);
    }

    #[test]
    fn test_reset_failure_is_not_fatal() {
        let (mut bl, layout) = setup(0x40000, 0x1000);
        // Erase, status, download, status, send, status; RESET goes unanswered.
        bl.port_mut().go_silent_after = Some(6);

        let summary = program_image(&mut bl, &layout, &[1, 2, 3, 4], 0, &fast(), |_| {}).unwrap();
        assert!(!summary.reset);
    }

    #[test]
    fn test_no_reset_option() {
        let (mut bl, layout) = setup(0x40000, 0x1000);
        let options = ProgramOptions {
            reset: false,
            ..fast()
        };
        program_image(&mut bl, &layout, &[1, 2, 3, 4], 0, &options, |_| {}).unwrap();
        assert!(bl.port().logged(Command::Reset).is_empty());
    }

    #[test]
    fn test_erase_all_stops_before_ccfg() {
        let (mut bl, layout) = setup(0x8000, 0x2000);
        let mut erased = Vec::new();
        let count = erase_all(&mut bl, &layout, &fast().timeouts, |p| {
            if let Progress::Erased { addr, .. } = p {
                erased.push(addr);
            }
        })
        .unwrap();
        assert_eq!(count, 3);
        assert_eq!(erased, vec![0, 0x2000, 0x4000]);
    }

    #[test]
    fn test_interrupt_stops_between_steps() {
        let (mut bl, layout) = setup(0x40000, 0x1000);
        crate::test_set_interrupted(true);
        let err = program_image(&mut bl, &layout, &[0; 16], 0, &fast(), |_| {}).unwrap_err();
        crate::test_set_interrupted(false);

        assert!(matches!(err, Error::Interrupted));
        assert!(bl.port().log.is_empty());
    }
}
