//! Bank container and the bank-format interface
//!
//! A bank holds the melodic and percussion instrument lists. Formats that can
//! fill or write a bank implement [`BankFormat`]; everything they don't
//! support falls back to [`FmError::Unimplemented`].

use crate::instrument::Instrument;
use crate::{FmError, Result};
use bitflags::bitflags;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Instrument bank
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FmBank {
    /// Melodic instruments
    pub melodic: Vec<Instrument>,
    /// Percussion instruments
    pub percussion: Vec<Instrument>,
}

impl FmBank {
    /// Drop all instruments
    pub fn reset(&mut self) {
        self.melodic.clear();
        self.percussion.clear();
    }
}

bitflags! {
    /// What a bank format can do
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FormatCaps: u8 {
        /// Can read whole banks
        const IMPORT = 0x01;
        /// Can write whole banks
        const EXPORT = 0x02;
        /// Can read single instruments
        const IMPORT_INST = 0x04;
        /// Can write single instruments
        const EXPORT_INST = 0x08;
    }
}

/// Identifier of a bank format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BankFormatId {
    /// Format not known
    Unknown,
    /// VGM register-trace importer
    VgmImporter,
}

/// A bank file format
pub trait BankFormat {
    /// Whether this format recognizes the file from its path and first 4 bytes
    fn detect(&self, _path: &Path, _magic: &[u8; 4]) -> bool {
        false
    }

    /// Load a bank from `path` into `bank`
    fn load_file(&self, _path: &Path, _bank: &mut FmBank) -> Result<()> {
        Err(FmError::Unimplemented("bank loading"))
    }

    /// Save `bank` to `path`
    fn save_file(&self, _path: &Path, _bank: &FmBank) -> Result<()> {
        Err(FmError::Unimplemented("bank saving"))
    }

    /// Load a single instrument; returns the instrument and its drum flag
    fn load_instrument(&self, _path: &Path) -> Result<(Instrument, bool)> {
        Err(FmError::Unimplemented("instrument loading"))
    }

    /// Save a single instrument
    fn save_instrument(&self, _path: &Path, _ins: &Instrument, _is_drum: bool) -> Result<()> {
        Err(FmError::Unimplemented("instrument saving"))
    }

    /// Supported operations
    fn caps(&self) -> FormatCaps {
        FormatCaps::empty()
    }

    /// Human readable format name
    fn name(&self) -> &str {
        "Unknown format"
    }

    /// Name of the module implementing the format
    fn module_name(&self) -> &str {
        self.name()
    }

    /// File dialog extension mask
    fn extension_mask(&self) -> &str {
        "*.*"
    }

    /// Format identifier
    fn id(&self) -> BankFormatId {
        BankFormatId::Unknown
    }
}

/// All bank formats compiled into this crate
pub fn registered_formats() -> Vec<Box<dyn BankFormat>> {
    #[allow(unused_mut)]
    let mut formats: Vec<Box<dyn BankFormat>> = Vec::new();
    #[cfg(feature = "vgm-import")]
    formats.push(Box::new(crate::vgm_import::VgmImporter::default()));
    formats
}

/// Pick the registered format that recognizes the file at `path`
pub fn detect_bank_format(path: &Path) -> Result<Box<dyn BankFormat>> {
    let mut file =
        File::open(path).map_err(|e| FmError::NoFile(format!("{}: {}", path.display(), e)))?;
    let mut magic = [0u8; 4];
    // Short files simply match nothing
    let mut filled = 0;
    while filled < magic.len() {
        let n = file.read(&mut magic[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    registered_formats()
        .into_iter()
        .find(|format| format.detect(path, &magic))
        .ok_or_else(|| FmError::UnsupportedFormat(path.display().to_string()))
}
