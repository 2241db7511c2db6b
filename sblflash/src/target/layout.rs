//! Flash geometry and the arithmetic of an erase/program plan.
//!
//! The last flash page holds the customer configuration (CCFG). Erasing it
//! with a wrong image can lock the chip out of the bootloader, so every plan
//! computed here stops short of it.

use log::warn;

use crate::error::{Error, Result};

/// SEND_DATA transfers are padded to a multiple of this many bytes.
pub const WORD_SIZE: u32 = 4;

/// Byte used to pad partial words and chunks. Matches erased flash.
pub const PAD_BYTE: u8 = 0xFF;

/// Validated flash geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlashLayout {
    flash_size: u32,
    page_size: u32,
}

impl FlashLayout {
    /// Check and build a layout.
    ///
    /// The page size must be non-zero and no larger than the flash. It does
    /// not have to be a power of two.
    pub fn new(flash_size: u32, page_size: u32) -> Result<Self> {
        if page_size == 0 {
            return Err(Error::InvalidArgument("page size must not be zero".into()));
        }
        if page_size > flash_size {
            return Err(Error::InvalidArgument(format!(
                "page size 0x{page_size:X} exceeds flash size 0x{flash_size:X}"
            )));
        }
        Ok(Self {
            flash_size,
            page_size,
        })
    }

    /// Total flash size in bytes.
    pub fn flash_size(&self) -> u32 {
        self.flash_size
    }

    /// Erase granularity in bytes.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Start of the CCFG page, i.e. the last page of flash.
    pub fn last_page_start(&self) -> u32 {
        self.flash_size - self.page_size
    }

    /// Whether `addr` is on a page boundary.
    pub fn is_page_aligned(&self, addr: u32) -> bool {
        addr % self.page_size == 0
    }

    /// Page-aligned addresses from 0 up to, not including, the CCFG page.
    pub fn pages_before_ccfg(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.last_page_start()).step_by(self.page_size as usize)
    }

    /// Plan programming `image_len` bytes at `base_addr`.
    ///
    /// Fails without touching the device when the base address is not page
    /// aligned, lies in the CCFG page, or the padded image would run past
    /// the end of flash. An image that reaches into the CCFG page is allowed;
    /// that page is simply not erased.
    pub fn plan(&self, base_addr: u32, image_len: usize) -> Result<ProgramPlan> {
        if image_len == 0 {
            return Err(Error::InvalidArgument("image is empty".into()));
        }
        if !self.is_page_aligned(base_addr) {
            return Err(Error::InvalidArgument(format!(
                "base address 0x{base_addr:08X} not page aligned (page size 0x{:X})",
                self.page_size
            )));
        }
        let ccfg = self.last_page_start();
        if base_addr >= ccfg {
            return Err(Error::InvalidArgument(format!(
                "base address 0x{base_addr:08X} is inside the CCFG page at 0x{ccfg:08X}"
            )));
        }

        let image_len = u32::try_from(image_len).map_err(|_| {
            Error::InvalidArgument(format!("image of {image_len} bytes is too large"))
        })?;
        let total_len = padded_len(image_len)?;
        let end = u64::from(base_addr) + u64::from(total_len);
        if end > u64::from(self.flash_size) {
            return Err(Error::InvalidArgument(format!(
                "image of {image_len} bytes at 0x{base_addr:08X} runs past the end of flash (0x{:X})",
                self.flash_size
            )));
        }

        let mut erase_len = erase_len_for(image_len, self.page_size);
        if u64::from(base_addr) + u64::from(erase_len) > u64::from(ccfg) {
            warn!(
                "Image overlaps the CCFG page at 0x{ccfg:08X}; that page will not be erased"
            );
            erase_len = ccfg - base_addr;
        }

        Ok(ProgramPlan {
            base_addr,
            image_len,
            erase_len,
            total_len,
            page_size: self.page_size,
        })
    }
}

/// Where and how much to erase and program for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramPlan {
    /// First byte to program, page aligned.
    pub base_addr: u32,
    /// Unpadded image length.
    pub image_len: u32,
    /// Bytes to erase from `base_addr`, a whole number of pages.
    pub erase_len: u32,
    /// Image length rounded up to [`WORD_SIZE`]; the length sent to DOWNLOAD.
    pub total_len: u32,
    page_size: u32,
}

impl ProgramPlan {
    /// Addresses of the pages to erase, in ascending order.
    pub fn erase_pages(&self) -> impl Iterator<Item = u32> {
        let end = self.base_addr + self.erase_len;
        (self.base_addr..end).step_by(self.page_size as usize)
    }

    /// Number of pages to erase.
    pub fn page_count(&self) -> u32 {
        self.erase_len / self.page_size
    }
}

/// `len` rounded up to a whole number of pages.
fn erase_len_for(len: u32, page_size: u32) -> u32 {
    let pages = u64::from(len).div_ceil(u64::from(page_size));
    // Bounded by the flash-size check in `plan`.
    u32::try_from(pages * u64::from(page_size)).unwrap_or(u32::MAX)
}

/// `len` rounded up to a multiple of [`WORD_SIZE`].
pub fn padded_len(len: u32) -> Result<u32> {
    len.checked_next_multiple_of(WORD_SIZE)
        .ok_or_else(|| Error::InvalidArgument(format!("length {len} overflows when padded")))
}
