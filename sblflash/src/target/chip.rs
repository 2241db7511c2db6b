//! Chip family presets.

use std::fmt;

use crate::error::{Error, Result};
use crate::target::layout::FlashLayout;

/// Supported chip families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ChipFamily {
    /// CC2640/CC2650 (128 KiB flash, 4 KiB pages).
    #[default]
    Cc26x0,
    /// CC1310/CC1350 (128 KiB flash, 4 KiB pages).
    Cc13x0,
    /// CC2652 (352 KiB flash, 8 KiB pages).
    Cc26x2,
    /// CC1312/CC1352 (352 KiB flash, 8 KiB pages).
    Cc13x2,
    /// Geometry given explicitly.
    Custom,
}

impl ChipFamily {
    /// All families, in the order they are listed to users.
    pub const ALL: [Self; 5] = [
        Self::Cc26x0,
        Self::Cc13x0,
        Self::Cc26x2,
        Self::Cc13x2,
        Self::Custom,
    ];

    /// Flash size and page size of the preset, `None` for [`Self::Custom`].
    #[must_use]
    pub fn geometry(&self) -> Option<(u32, u32)> {
        match self {
            Self::Cc26x0 | Self::Cc13x0 => Some((128 * 1024, 4 * 1024)),
            Self::Cc26x2 | Self::Cc13x2 => Some((352 * 1024, 8 * 1024)),
            Self::Custom => None,
        }
    }

    /// Build a layout, letting explicit sizes override the preset.
    pub fn layout(&self, flash_size: Option<u32>, page_size: Option<u32>) -> Result<FlashLayout> {
        let preset = self.geometry();
        let flash_size = flash_size
            .or(preset.map(|(f, _)| f))
            .ok_or_else(|| Error::InvalidArgument(format!("{self} requires a flash size")))?;
        let page_size = page_size
            .or(preset.map(|(_, p)| p))
            .ok_or_else(|| Error::InvalidArgument(format!("{self} requires a page size")))?;
        FlashLayout::new(flash_size, page_size)
    }

    /// Get the chip family from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "cc26x0" | "cc2640" | "cc2650" => Some(Self::Cc26x0),
            "cc13x0" | "cc1310" | "cc1350" => Some(Self::Cc13x0),
            "cc26x2" | "cc2652" => Some(Self::Cc26x2),
            "cc13x2" | "cc1312" | "cc1352" => Some(Self::Cc13x2),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cc26x0 => "cc26x0",
            Self::Cc13x0 => "cc13x0",
            Self::Cc26x2 => "cc26x2",
            Self::Cc13x2 => "cc13x2",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cc26x0 => write!(f, "CC26x0"),
            Self::Cc13x0 => write!(f, "CC13x0"),
            Self::Cc26x2 => write!(f, "CC26x2"),
            Self::Cc13x2 => write!(f, "CC13x2"),
            Self::Custom => write!(f, "custom"),
        }
    }
}
