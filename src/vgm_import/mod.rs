//! VGM register-trace importer
//!
//! Walks the command stream of a `.vgm` file, feeds FM register writes to one
//! tracker per chip family and collects every instrument the music keys on.
//!
//! Handled commands:
//!
//! | Opcode      | Meaning                         | Action                    |
//! |-------------|---------------------------------|---------------------------|
//! | 0x52 / 0x53 | YM2612 port 0 / 1 write         | YM2612 tracker            |
//! | 0x54        | YM2151 write                    | YM2151 tracker            |
//! | 0x56 / 0x57 | YM2608 port 0 / 1 write         | YM2608 tracker            |
//! | 0x61        | wait n samples (2-byte operand) | epoch analysis            |
//! | 0x62, 0x63  | wait 735 / 882 samples          | epoch analysis            |
//! | 0x70..0x7F  | wait 1..16 samples              | epoch analysis            |
//! | 0x66        | end of sound data               | stop                      |
//! | 0x67        | data block                      | skip                      |
//! | 0x4F, 0x50  | PSG writes                      | skip 1 byte               |
//! | 0x80        | YM2612 DAC write + wait         | skip 1 byte               |
//! | 0xE0        | PCM seek                        | skip 4 bytes              |
//!
//! Anything else is ignored byte by byte.

use std::path::Path;

use crate::bank::{BankFormat, BankFormatId, FmBank, FormatCaps};
use crate::config::ImportOptions;
use crate::instrument::Instrument;
use crate::tracker::{CaptureSink, ChipTracker, OpnTracker, Ym2151Tracker};
use crate::{FmError, Result};

mod cursor;
pub mod header;

use cursor::ByteCursor;
pub use header::{parse_header, VgmHeader, VGM_MAGIC};

/// Result of importing one trace
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VgmImport {
    /// Captured instruments in capture order
    pub instruments: Vec<Instrument>,
    /// Key-on edges seen across all chips
    pub key_ons: usize,
    /// Register writes forwarded to trackers
    pub register_writes: usize,
    /// Whether an end-of-data command was reached
    pub reached_end: bool,
}

/// `.vgm` importer
#[derive(Debug, Clone, Default)]
pub struct VgmImporter {
    options: ImportOptions,
}

impl VgmImporter {
    /// Importer with custom capture options
    pub fn new(options: ImportOptions) -> Self {
        VgmImporter { options }
    }

    /// Capture options in use
    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Decode an in-memory VGM file
    ///
    /// # Errors
    ///
    /// Returns [`FmError::BadFormat`] when the signature is missing. Any other
    /// damage ends the command loop early and keeps what was captured so far.
    pub fn import_bytes(&self, data: &[u8]) -> Result<VgmImport> {
        let header = parse_header(data)?;
        log::debug!(
            "VGM version {:x}, data at 0x{:X}",
            header.version,
            header.data_start
        );

        let sink = CaptureSink::shared(self.options.clone());
        let mut ym2612 = OpnTracker::ym2612(sink.clone());
        let mut ym2608 = OpnTracker::ym2608(sink.clone());
        let mut ym2151 = Ym2151Tracker::new(sink.clone());

        let mut cursor = ByteCursor::new(data, header.data_start);
        let mut register_writes = 0;
        let mut reached_end = false;

        while let Some(cmd) = cursor.read_u8() {
            match cmd {
                0x52 | 0x53 | 0x54 | 0x56 | 0x57 => {
                    let Some((reg, value)) = cursor.read_pair() else {
                        break;
                    };
                    register_writes += 1;
                    match cmd {
                        0x52 => ym2612.pass_reg(0, reg, value),
                        0x53 => ym2612.pass_reg(1, reg, value),
                        0x54 => ym2151.pass_reg(0, reg, value),
                        0x56 => ym2608.pass_reg(0, reg, value),
                        _ => ym2608.pass_reg(1, reg, value),
                    }
                }
                0x61 | 0x62 | 0x63 | 0x70..=0x7F => {
                    if cmd == 0x61 {
                        cursor.skip(2);
                    }
                    ym2612.analyze_epoch();
                    ym2608.analyze_epoch();
                    ym2151.analyze_epoch();
                }
                0x66 => {
                    reached_end = true;
                    break;
                }
                0x67 => {
                    cursor.skip(2);
                    let Some(len) = cursor.read_u32_le() else {
                        break;
                    };
                    log::trace!("skipping {len}-byte data block");
                    cursor.skip(len as usize);
                }
                0x4F | 0x50 | 0x80 => cursor.skip(1),
                0xE0 => cursor.skip(4),
                _ => log::trace!(
                    "ignoring opcode 0x{cmd:02X} at 0x{:X}",
                    cursor.position() - 1
                ),
            }
        }

        if !reached_end {
            log::warn!(
                "VGM stream ended at 0x{:X} without an end command",
                cursor.position()
            );
        }

        ym2612.finish();
        ym2608.finish();
        ym2151.finish();

        let mut sink = sink.borrow_mut();
        let import = VgmImport {
            key_ons: sink.key_on_count(),
            instruments: sink.take_instruments(),
            register_writes,
            reached_end,
        };
        log::info!(
            "imported {} instruments from {} key-ons",
            import.instruments.len(),
            import.key_ons
        );
        Ok(import)
    }
}

impl BankFormat for VgmImporter {
    fn detect(&self, _path: &Path, magic: &[u8; 4]) -> bool {
        header::is_vgm_magic(magic)
    }

    /// Replace the melodic list of `bank` with the instruments found in the trace
    fn load_file(&self, path: &Path, bank: &mut FmBank) -> Result<()> {
        let data = std::fs::read(path)
            .map_err(|e| FmError::NoFile(format!("{}: {}", path.display(), e)))?;
        bank.reset();
        let import = self.import_bytes(&data)?;
        bank.melodic = import.instruments;
        Ok(())
    }

    fn caps(&self) -> FormatCaps {
        FormatCaps::IMPORT
    }

    fn name(&self) -> &str {
        "Video Game Music"
    }

    fn module_name(&self) -> &str {
        "Video Game Music importer"
    }

    fn extension_mask(&self) -> &str {
        "*.vgm"
    }

    fn id(&self) -> BankFormatId {
        BankFormatId::VgmImporter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vgm(commands: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 0x40];
        data[..4].copy_from_slice(&VGM_MAGIC);
        data[0x34..0x38].copy_from_slice(&0x0Cu32.to_le_bytes());
        data.extend_from_slice(commands);
        data
    }

    #[test]
    fn test_empty_stream_yields_nothing() {
        let import = VgmImporter::default().import_bytes(&vgm(&[0x66])).unwrap();
        assert!(import.instruments.is_empty());
        assert!(import.reached_end);
    }

    #[test]
    fn test_bad_magic() {
        let mut data = vgm(&[0x66]);
        data[3] = 0;
        let err = VgmImporter::default().import_bytes(&data).unwrap_err();
        assert!(matches!(err, FmError::BadFormat(_)));
    }

    #[test]
    fn test_skips_unrelated_commands() {
        let commands = [
            0x50, 0x9F, // PSG
            0x67, 0x66, 0x00, 0x03, 0x00, 0x00, 0x00, 0x52, 0x28, 0xF0, // data block hiding a key-on
            0xE0, 0x52, 0x28, 0xF0, 0x00, // PCM seek operand looks like a key-on
            0x80, 0x52, // DAC
            0x52, 0xB0, 0x3A, // FB 7, ALG 2 on ch0
            0x52, 0x28, 0xF0, // key on
            0x62, // wait
            0x66,
        ];
        let import = VgmImporter::default().import_bytes(&vgm(&commands)).unwrap();
        assert_eq!(import.instruments.len(), 1);
        assert_eq!(import.instruments[0].algorithm, 2);
        assert_eq!(import.instruments[0].feedback, 7);
        assert_eq!(import.register_writes, 2);
    }

    #[test]
    fn test_trackers_share_one_ordered_list() {
        let commands = [
            0x54, 0x20, 0x05, // YM2151 ch0 CON 5
            0x54, 0x08, 0x78, // YM2151 ch0 key on
            0x52, 0x28, 0xF1, // YM2612 ch1 key on
            0x57, 0xB2, 0x03, // YM2608 ch5 ALG 3
            0x56, 0x28, 0xF6, // YM2608 ch5 key on
            0x7F, // wait
            0x66,
        ];
        let import = VgmImporter::default().import_bytes(&vgm(&commands)).unwrap();
        let names: Vec<&str> = import.instruments.iter().map(|i| i.name()).collect();
        // Trackers are analyzed YM2612, YM2608, YM2151
        assert_eq!(names, vec!["Ins 1 ch1", "Ins 2 ch5", "Ins 3 ch0"]);
        assert_eq!(import.instruments[1].algorithm, 3);
        assert_eq!(import.instruments[2].algorithm, 5);
    }

    #[test]
    fn test_truncated_stream_keeps_captures() {
        let commands = [0x52, 0x28, 0xF0, 0x52, 0x28];
        let import = VgmImporter::default().import_bytes(&vgm(&commands)).unwrap();
        assert_eq!(import.instruments.len(), 1);
        assert!(!import.reached_end);
    }

    #[test]
    fn test_format_metadata() {
        let importer = VgmImporter::default();
        assert_eq!(importer.caps(), FormatCaps::IMPORT);
        assert_eq!(importer.name(), "Video Game Music");
        assert_eq!(importer.extension_mask(), "*.vgm");
        assert_eq!(importer.id(), BankFormatId::VgmImporter);
        assert!(importer.detect(Path::new("a.vgm"), b"Vgm "));
        assert!(!importer.detect(Path::new("a.vgm"), b"Vgz "));
    }
}
