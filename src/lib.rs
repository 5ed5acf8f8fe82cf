//! OPN2 / OPN / OPM synthesis toolkit
//!
//! Two subsystems built around one idea: an FM chip is driven by a sequence of
//! discrete `(port, register, value)` writes, and its state can be rebuilt or
//! driven deterministically from that sequence.
//!
//! - **Realtime dispatch**: a control thread and a MIDI input queue typed
//!   messages into lock-free single-producer/single-consumer byte rings; the
//!   audio callback drains them, applies them to a mutex-guarded
//!   [`Synthesizer`] and renders a block of stereo frames. The audio side never
//!   blocks: when the synthesizer is locked elsewhere the block is silence.
//! - **VGM import**: a VGM register trace is replayed through per-chip state
//!   trackers (YM2612, YM2608, YM2151) that cut a new [`Instrument`] every time
//!   a channel keys on.
//!
//! # Crate feature flags
//! - `vgm-import` (default): VGM trace importer and chip trackers (`tracker`, `vgm_import`)
//! - `realtime` (default): ring buffer, message codec and dispatch engine (`realtime`)
//! - `streaming` (opt-in): rodio output for a [`realtime::RealtimeRenderer`]
//! - `softsynth` (opt-in): experimental, non-bit-accurate FM backend
//!
//! # Quick start
//! ## Import instruments from a VGM file
//! ```no_run
//! # #[cfg(feature = "vgm-import")]
//! # {
//! use opn2kit::{BankFormat, FmBank, VgmImporter};
//! let mut bank = FmBank::default();
//! VgmImporter::default()
//!     .load_file(std::path::Path::new("song.vgm"), &mut bank)
//!     .unwrap();
//! for ins in &bank.melodic {
//!     println!("{} alg={} fb={}", ins.name(), ins.algorithm, ins.feedback);
//! }
//! # }
//! ```
//!
//! ## Drive a synthesizer from a control thread
//! ```no_run
//! # #[cfg(feature = "realtime")]
//! # {
//! use opn2kit::realtime::RealtimeGenerator;
//! use opn2kit::{EngineConfig, Generator, Instrument};
//! let config = EngineConfig::default();
//! let (control, mut renderer) =
//!     RealtimeGenerator::build(Generator::with_null_chip(config.sample_rate), &config).unwrap();
//! control.change_patch(&Instrument::default(), false);
//! control.change_note(60);
//! control.play_note();
//! let mut frames = vec![0i16; 2 * 512];
//! renderer.generate(&mut frames, 512);
//! # }
//! ```

#![warn(missing_docs)]

pub mod bank;
pub mod config;
pub mod instrument;
pub mod synth;

#[cfg(feature = "realtime")]
pub mod realtime;
#[cfg(feature = "streaming")]
pub mod streaming;
#[cfg(feature = "vgm-import")]
pub mod tracker;
#[cfg(feature = "vgm-import")]
pub mod vgm_import;

/// Stable result codes for bank-format operations
///
/// Mirrors the error taxonomy for consumers that report a numeric code
/// instead of a typed error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// Operation succeeded
    Ok = 0,
    /// Source could not be opened
    NoFile = 1,
    /// Magic mismatch or structurally invalid header
    BadFormat = 2,
    /// Operation not supported by this backend or format
    Unimplemented = 3,
    /// Target format cannot be inferred
    UnsupportedFormat = 4,
    /// Anything else
    Unknown = 5,
}

/// Error types for import, configuration and control operations
#[derive(thiserror::Error, Debug)]
pub enum FmError {
    /// Source file could not be opened or read
    #[error("Cannot open file: {0}")]
    NoFile(String),

    /// Magic mismatch or structurally invalid header
    #[error("Bad format: {0}")]
    BadFormat(String),

    /// Operation not supported by the given backend or format
    #[error("Not implemented: {0}")]
    Unimplemented(&'static str),

    /// Target format cannot be inferred
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Catch-all
    #[error("{0}")]
    Unknown(String),
}

impl FmError {
    /// Result code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            FmError::NoFile(_) => ErrorCode::NoFile,
            FmError::BadFormat(_) => ErrorCode::BadFormat,
            FmError::Unimplemented(_) => ErrorCode::Unimplemented,
            FmError::UnsupportedFormat(_) => ErrorCode::UnsupportedFormat,
            FmError::Io(_) | FmError::ConfigError(_) | FmError::Unknown(_) => ErrorCode::Unknown,
        }
    }
}

impl From<String> for FmError {
    /// Converts a String into `FmError::Unknown`.
    ///
    /// Prefer the specific variants (`BadFormat`, `ConfigError`, ...) where the
    /// failure kind is known; this conversion is for the catch-all case.
    fn from(msg: String) -> Self {
        FmError::Unknown(msg)
    }
}

impl From<&str> for FmError {
    /// Converts a string slice into `FmError::Unknown`.
    fn from(msg: &str) -> Self {
        FmError::Unknown(msg.to_string())
    }
}

/// Result type for library operations
pub type Result<T> = std::result::Result<T, FmError>;

// Public API exports
pub use bank::{detect_bank_format, BankFormat, BankFormatId, FmBank, FormatCaps};
pub use config::{EngineConfig, ImportOptions};
pub use instrument::{Instrument, Operator};
pub use synth::{ChipType, ChordType, DebugInfo, FmChip, Generator, NullChip, Synthesizer};

#[cfg(feature = "realtime")]
pub use realtime::{RealtimeControl, RealtimeGenerator, RealtimeRenderer, RingBuffer};
#[cfg(feature = "streaming")]
pub use streaming::AudioDevice;
#[cfg(feature = "softsynth")]
pub use synth::softsynth::SoftFm;
#[cfg(feature = "vgm-import")]
pub use vgm_import::VgmImporter;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(FmError::NoFile("x".into()).code(), ErrorCode::NoFile);
        assert_eq!(FmError::BadFormat("x".into()).code(), ErrorCode::BadFormat);
        assert_eq!(
            FmError::Unimplemented("save").code(),
            ErrorCode::Unimplemented
        );
        assert_eq!(FmError::from("boom").code(), ErrorCode::Unknown);
    }

    #[test]
    fn test_error_display() {
        let err = FmError::BadFormat("magic".into());
        assert_eq!(err.to_string(), "Bad format: magic");
    }
}
