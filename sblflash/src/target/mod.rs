//! Target geometry and the flash programming workflow.

pub mod chip;
pub mod flasher;
pub mod layout;

pub use chip::ChipFamily;
pub use flasher::{
    ProgramOptions, ProgramSummary, Progress, erase_all, erase_page, erase_range, padded_crc,
    program_image, verify_crc,
};
pub use layout::{FlashLayout, ProgramPlan, padded_len};
