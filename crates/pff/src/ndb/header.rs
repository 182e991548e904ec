//! ## File header
//!
//! The first bytes of a container identify the variant and anchor the two
//! indexes. Magic, content type, version, and encryption byte must be
//! recognized; checksum and sentinel problems are tolerated and recorded so
//! that damaged evidence files still open.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Seek, SeekFrom};
use tracing::warn;

use super::{root::*, ContentType, NdbCryptMethod, NdbError, NdbResult, NdbVersion};
use crate::{crc::compute_crc, io_handle::FileHandle};

/// `dwMagic`
const HEADER_MAGIC: u32 = u32::from_le_bytes(*b"!BDN");

/// `bSentinel`
const HEADER_SENTINEL: u8 = 0x80;

/// Number of leading checksummed bytes covered by `dwCRCPartial`.
const PARTIAL_CRC_SIZE: usize = 471;

pub const ANSI_HEADER_SIZE: u64 = 548;
pub const UNICODE_HEADER_SIZE: u64 = 564;

pub trait Header: Sized {
    type Root: Root;

    fn read(handle: &FileHandle) -> NdbResult<Self>;
    fn version(&self) -> NdbVersion;
    fn content_type(&self) -> ContentType;
    fn crypt_method(&self) -> NdbCryptMethod;
    fn root(&self) -> &Self::Root;

    /// Whether tolerated damage (checksum or sentinel mismatch) was seen
    /// while reading.
    fn is_corrupted(&self) -> bool;
}

fn read_header_bytes(handle: &FileHandle, size: u64) -> NdbResult<Vec<u8>> {
    if handle.size() < size {
        return Err(NdbError::TruncatedHeader(handle.size()));
    }

    let mut buffer = vec![0_u8; size as usize];
    handle.read_exact_at(0, &mut buffer).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            NdbError::TruncatedHeader(handle.size())
        } else {
            NdbError::Io(err)
        }
    })?;
    Ok(buffer)
}

pub struct UnicodeHeader {
    version: NdbVersion,
    content_type: ContentType,
    crypt_method: NdbCryptMethod,
    root: UnicodeRoot,
    corrupted: bool,
}

impl Header for UnicodeHeader {
    type Root = UnicodeRoot;

    fn read(handle: &FileHandle) -> NdbResult<Self> {
        let buffer = read_header_bytes(handle, UNICODE_HEADER_SIZE)?;
        let mut corrupted = false;

        // dwMagic
        let magic = u32::from_le_bytes(buffer[..4].try_into().unwrap_or_default());
        if magic != HEADER_MAGIC {
            return Err(NdbError::InvalidHeaderMagicValue(magic));
        }

        // dwCRCPartial
        let crc_partial = u32::from_le_bytes(buffer[4..8].try_into().unwrap_or_default());
        let crc_data = &buffer[8..524];
        if crc_partial != compute_crc(0, &crc_data[..PARTIAL_CRC_SIZE]) {
            warn!(
                name: "PffHeaderPartialCrcMismatch",
                stored = crc_partial,
                "HEADER dwCRCPartial mismatch"
            );
            corrupted = true;
        }

        let mut cursor = Cursor::new(crc_data);

        // wMagicClient
        let content_type = ContentType::try_from(cursor.read_u16::<LittleEndian>()?)?;

        // wVer
        let version = NdbVersion::try_from(cursor.read_u16::<LittleEndian>()?)?;
        if version == NdbVersion::Ansi {
            return Err(NdbError::UnexpectedVersion(version as u16));
        }

        // wVerClient, bPlatformCreate, bPlatformAccess: not enforced
        let _ = cursor.read_u16::<LittleEndian>()?;
        let _ = cursor.read_u8()?;
        let _ = cursor.read_u8()?;

        // dwReserved1, dwReserved2
        let _ = cursor.read_u32::<LittleEndian>()?;
        let _ = cursor.read_u32::<LittleEndian>()?;

        // bidUnused, bidNextP
        let _ = cursor.read_u64::<LittleEndian>()?;
        let _ = cursor.read_u64::<LittleEndian>()?;

        // dwUnique
        let _ = cursor.read_u32::<LittleEndian>()?;

        // rgnid
        cursor.seek(SeekFrom::Current(128))?;

        // qwUnused
        let _ = cursor.read_u64::<LittleEndian>()?;

        // root
        let root = UnicodeRoot::read(&mut cursor)?;

        // dwAlign
        let _ = cursor.read_u32::<LittleEndian>()?;

        // rgbFM, rgbFP
        cursor.seek(SeekFrom::Current(256))?;

        // bSentinel
        let sentinel = cursor.read_u8()?;
        if sentinel != HEADER_SENTINEL {
            warn!(
                name: "PffHeaderSentinelMismatch",
                sentinel,
                "HEADER bSentinel mismatch"
            );
            corrupted = true;
        }

        // bCryptMethod
        let crypt_method = NdbCryptMethod::try_from(cursor.read_u8()?)?;

        // dwCRCFull
        let crc_full = u32::from_le_bytes(buffer[524..528].try_into().unwrap_or_default());
        if crc_full != compute_crc(0, crc_data) {
            warn!(
                name: "PffHeaderFullCrcMismatch",
                stored = crc_full,
                "HEADER dwCRCFull mismatch"
            );
            corrupted = true;
        }

        Ok(Self {
            version,
            content_type,
            crypt_method,
            root,
            corrupted,
        })
    }

    fn version(&self) -> NdbVersion {
        self.version
    }

    fn content_type(&self) -> ContentType {
        self.content_type
    }

    fn crypt_method(&self) -> NdbCryptMethod {
        self.crypt_method
    }

    fn root(&self) -> &UnicodeRoot {
        &self.root
    }

    fn is_corrupted(&self) -> bool {
        self.corrupted
    }
}

pub struct AnsiHeader {
    content_type: ContentType,
    crypt_method: NdbCryptMethod,
    root: AnsiRoot,
    corrupted: bool,
}

impl Header for AnsiHeader {
    type Root = AnsiRoot;

    fn read(handle: &FileHandle) -> NdbResult<Self> {
        let buffer = read_header_bytes(handle, ANSI_HEADER_SIZE)?;
        let mut corrupted = false;

        // dwMagic
        let magic = u32::from_le_bytes(buffer[..4].try_into().unwrap_or_default());
        if magic != HEADER_MAGIC {
            return Err(NdbError::InvalidHeaderMagicValue(magic));
        }

        // dwCRCPartial
        let crc_partial = u32::from_le_bytes(buffer[4..8].try_into().unwrap_or_default());
        let crc_data = &buffer[8..512];
        if crc_partial != compute_crc(0, &crc_data[..PARTIAL_CRC_SIZE]) {
            warn!(
                name: "PffHeaderPartialCrcMismatch",
                stored = crc_partial,
                "HEADER dwCRCPartial mismatch"
            );
            corrupted = true;
        }

        let mut cursor = Cursor::new(crc_data);

        // wMagicClient
        let content_type = ContentType::try_from(cursor.read_u16::<LittleEndian>()?)?;

        // wVer
        let version = NdbVersion::try_from(cursor.read_u16::<LittleEndian>()?)?;
        if version != NdbVersion::Ansi {
            return Err(NdbError::UnexpectedVersion(version as u16));
        }

        // wVerClient, bPlatformCreate, bPlatformAccess: not enforced
        let _ = cursor.read_u16::<LittleEndian>()?;
        let _ = cursor.read_u8()?;
        let _ = cursor.read_u8()?;

        // dwReserved1, dwReserved2
        let _ = cursor.read_u32::<LittleEndian>()?;
        let _ = cursor.read_u32::<LittleEndian>()?;

        // bidNextB, bidNextP
        let _ = cursor.read_u32::<LittleEndian>()?;
        let _ = cursor.read_u32::<LittleEndian>()?;

        // dwUnique
        let _ = cursor.read_u32::<LittleEndian>()?;

        // rgnid
        cursor.seek(SeekFrom::Current(128))?;

        // root
        let root = AnsiRoot::read(&mut cursor)?;

        // rgbFM, rgbFP
        cursor.seek(SeekFrom::Current(256))?;

        // bSentinel
        let sentinel = cursor.read_u8()?;
        if sentinel != HEADER_SENTINEL {
            warn!(
                name: "PffHeaderSentinelMismatch",
                sentinel,
                "HEADER bSentinel mismatch"
            );
            corrupted = true;
        }

        // bCryptMethod
        let crypt_method = NdbCryptMethod::try_from(cursor.read_u8()?)?;

        Ok(Self {
            content_type,
            crypt_method,
            root,
            corrupted,
        })
    }

    fn version(&self) -> NdbVersion {
        NdbVersion::Ansi
    }

    fn content_type(&self) -> ContentType {
        self.content_type
    }

    fn crypt_method(&self) -> NdbCryptMethod {
        self.crypt_method
    }

    fn root(&self) -> &AnsiRoot {
        &self.root
    }

    fn is_corrupted(&self) -> bool {
        self.corrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_value() {
        assert_eq!(HEADER_MAGIC, 0x4E444221);
    }
}
