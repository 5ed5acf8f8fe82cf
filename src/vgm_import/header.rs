//! VGM header parsing

use nom::bytes::complete::{tag, take};
use nom::number::complete::le_u32;
use nom::sequence::tuple;
use nom::IResult;

use crate::{FmError, Result};

/// File signature "Vgm "
pub const VGM_MAGIC: [u8; 4] = [0x56, 0x67, 0x6D, 0x20];

/// Position of the relative data offset field
pub const DATA_OFFSET_FIELD: usize = 0x34;

/// Where command data starts in files whose offset field is 0 or the 0x0C sentinel
pub const LEGACY_DATA_START: usize = 0x40;

const LEGACY_OFFSET_SENTINEL: u32 = 0x0C;

/// Fields of the VGM header used by the importer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VgmHeader {
    /// Relative end-of-file offset
    pub eof_offset: u32,
    /// BCD version number (0x0150 = 1.50)
    pub version: u32,
    /// Absolute position of the first command byte
    pub data_start: usize,
}

fn magic(input: &[u8]) -> IResult<&[u8], &[u8]> {
    tag(&VGM_MAGIC[..])(input)
}

fn eof_and_version(input: &[u8]) -> IResult<&[u8], (u32, u32)> {
    tuple((le_u32, le_u32))(input)
}

fn data_offset(input: &[u8]) -> IResult<&[u8], u32> {
    let (input, _) = take(DATA_OFFSET_FIELD)(input)?;
    le_u32(input)
}

/// Parse the header at the start of `data`
///
/// Only the signature is mandatory. Truncated headers fall back to version 0
/// and the legacy data start.
pub fn parse_header(data: &[u8]) -> Result<VgmHeader> {
    let (rest, _) = magic(data).map_err(|_| FmError::BadFormat("missing Vgm signature".into()))?;
    let (eof_offset, version) = eof_and_version(rest).map_or((0, 0), |(_, fields)| fields);

    let data_start = match data_offset(data) {
        Ok((_, 0)) | Ok((_, LEGACY_OFFSET_SENTINEL)) | Err(_) => LEGACY_DATA_START,
        Ok((_, offset)) => DATA_OFFSET_FIELD + offset as usize,
    };

    Ok(VgmHeader {
        eof_offset,
        version,
        data_start,
    })
}

/// Whether `magic` is the VGM signature
pub fn is_vgm_magic(magic: &[u8; 4]) -> bool {
    *magic == VGM_MAGIC
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with_offset(offset: u32) -> Vec<u8> {
        let mut data = vec![0u8; 0x80];
        data[..4].copy_from_slice(&VGM_MAGIC);
        data[4..8].copy_from_slice(&0x7Cu32.to_le_bytes());
        data[8..12].copy_from_slice(&0x0151u32.to_le_bytes());
        data[0x34..0x38].copy_from_slice(&offset.to_le_bytes());
        data
    }

    #[test]
    fn test_legacy_sentinel_maps_to_0x40() {
        let header = parse_header(&header_with_offset(0x0C)).unwrap();
        assert_eq!(header.data_start, 0x40);
        assert_eq!(header.version, 0x0151);
        assert_eq!(header.eof_offset, 0x7C);
    }

    #[test]
    fn test_relative_data_offset() {
        let header = parse_header(&header_with_offset(0x4C)).unwrap();
        assert_eq!(header.data_start, 0x80);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut data = header_with_offset(0x0C);
        data[0] = b'X';
        assert!(matches!(parse_header(&data), Err(FmError::BadFormat(_))));
        assert!(matches!(parse_header(b"Vg"), Err(FmError::BadFormat(_))));
    }

    #[test]
    fn test_magic_only_file() {
        let header = parse_header(&VGM_MAGIC).unwrap();
        assert_eq!(header.data_start, LEGACY_DATA_START);
        assert_eq!(header.version, 0);
    }
}
