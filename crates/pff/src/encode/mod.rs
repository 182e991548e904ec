//! ## Block de-obfuscation
//!
//! The two encryption modes a container may declare, plus the permutation
//! tables they share. Both routines operate in place, are length-preserving,
//! and are keyed by a 32-bit value derived from the data identifier of the
//! block being decoded. Mode [`NdbCryptMethod::None`] leaves the buffer
//! untouched.
//!
//! `TABLE_R` and `TABLE_I` are mutually inverse permutations of the byte
//! range; `TABLE_S` is an involution. The compressible codec relies on both
//! properties to make a single routine serve encode and decode.

use crate::ndb::{NdbCryptMethod, NdbError, NdbResult};

pub mod compressible;
pub mod high;

const TABLE_R: [u8; 256] = [
    0x36, 0x9C, 0x6B, 0x7B, 0x7F, 0xF1, 0x5C, 0x92, 0x71, 0x69, 0xC2, 0x31, 0x65, 0xD3, 0x2F, 0x17,
    0x2A, 0x3F, 0x02, 0x5A, 0xE7, 0xE3, 0xED, 0x30, 0x8B, 0xEC, 0x23, 0x86, 0xFF, 0x00, 0xF2, 0x20,
    0xB7, 0x66, 0xB9, 0x75, 0xDD, 0x22, 0x47, 0x84, 0xD8, 0x27, 0x68, 0xBC, 0x56, 0xAF, 0x12, 0xA2,
    0x61, 0xAC, 0xB4, 0x38, 0x01, 0x6A, 0x91, 0xEA, 0xA9, 0xFA, 0x3A, 0x4B, 0x8D, 0x11, 0x76, 0xBE,
    0x2E, 0x5F, 0x7C, 0x44, 0xA6, 0x03, 0xC5, 0xE1, 0x4F, 0x32, 0xFB, 0x78, 0x3E, 0xC7, 0xA1, 0x0E,
    0x83, 0x59, 0x99, 0x4A, 0x70, 0x16, 0x0F, 0x8A, 0x14, 0x55, 0x45, 0x40, 0xFE, 0xBA, 0xDB, 0xCA,
    0xBF, 0xAB, 0x80, 0x62, 0x15, 0xF9, 0xF6, 0x46, 0x3B, 0xE4, 0xC1, 0xB8, 0xD6, 0xA0, 0x5D, 0xD2,
    0x58, 0x67, 0xA8, 0x5B, 0x9E, 0xAE, 0xC4, 0xA4, 0xC0, 0xB1, 0xF7, 0x07, 0x24, 0xD4, 0xC3, 0xFC,
    0x1C, 0x0B, 0x82, 0x2B, 0xEF, 0xA5, 0xBB, 0x34, 0x57, 0xDF, 0x13, 0x06, 0x89, 0x09, 0x90, 0x87,
    0x49, 0x4D, 0x60, 0xA3, 0x25, 0x9F, 0x7D, 0x6E, 0x1A, 0xD0, 0x4E, 0x41, 0x4C, 0x9D, 0x21, 0x9B,
    0xD1, 0xB5, 0x05, 0x1E, 0x2C, 0x6C, 0x79, 0x29, 0x53, 0xD5, 0xCE, 0x18, 0xC6, 0x5E, 0x52, 0xDA,
    0x10, 0x3C, 0x8E, 0x96, 0x95, 0x39, 0xF3, 0x74, 0x9A, 0x8C, 0xEB, 0x42, 0x28, 0x37, 0x48, 0x19,
    0xCB, 0xF0, 0xCD, 0x98, 0xB0, 0x81, 0x6F, 0x33, 0x1F, 0xC9, 0x43, 0x7E, 0x1B, 0xE9, 0x64, 0xEE,
    0x51, 0x54, 0x93, 0x0C, 0xA7, 0x08, 0xB2, 0xD7, 0xF5, 0xFD, 0x77, 0xE2, 0x26, 0x7A, 0xCF, 0x04,
    0x50, 0xE5, 0x1D, 0x0A, 0xE8, 0x3D, 0xF4, 0xCC, 0xDE, 0x88, 0x63, 0x6D, 0xB6, 0xE6, 0x0D, 0xC8,
    0x35, 0x94, 0x2D, 0xAA, 0xE0, 0x73, 0x8F, 0xBD, 0x85, 0x72, 0xAD, 0xDC, 0xF8, 0x97, 0xD9, 0xB3,
];

const TABLE_I: [u8; 256] = [
    0x1D, 0x34, 0x12, 0x45, 0xDF, 0xA2, 0x8B, 0x7B, 0xD5, 0x8D, 0xE3, 0x81, 0xD3, 0xEE, 0x4F, 0x56,
    0xB0, 0x3D, 0x2E, 0x8A, 0x58, 0x64, 0x55, 0x0F, 0xAB, 0xBF, 0x98, 0xCC, 0x80, 0xE2, 0xA3, 0xC8,
    0x1F, 0x9E, 0x25, 0x1A, 0x7C, 0x94, 0xDC, 0x29, 0xBC, 0xA7, 0x10, 0x83, 0xA4, 0xF2, 0x40, 0x0E,
    0x17, 0x0B, 0x49, 0xC7, 0x87, 0xF0, 0x00, 0xBD, 0x33, 0xB5, 0x3A, 0x68, 0xB1, 0xE5, 0x4C, 0x11,
    0x5B, 0x9B, 0xBB, 0xCA, 0x43, 0x5A, 0x67, 0x26, 0xBE, 0x90, 0x53, 0x3B, 0x9C, 0x91, 0x9A, 0x48,
    0xE0, 0xD0, 0xAE, 0xA8, 0xD1, 0x59, 0x2C, 0x88, 0x70, 0x51, 0x13, 0x73, 0x06, 0x6E, 0xAD, 0x41,
    0x92, 0x30, 0x63, 0xEA, 0xCE, 0x0C, 0x21, 0x71, 0x2A, 0x09, 0x35, 0x02, 0xA5, 0xEB, 0x97, 0xC6,
    0x54, 0x08, 0xF9, 0xF5, 0xB7, 0x23, 0x3E, 0xDA, 0x4B, 0xA6, 0xDD, 0x03, 0x42, 0x96, 0xCB, 0x04,
    0x62, 0xC5, 0x82, 0x50, 0x27, 0xF8, 0x1B, 0x8F, 0xE9, 0x8C, 0x57, 0x18, 0xB9, 0x3C, 0xB2, 0xF6,
    0x8E, 0x36, 0x07, 0xD2, 0xF1, 0xB4, 0xB3, 0xFD, 0xC3, 0x52, 0xB8, 0x9F, 0x01, 0x9D, 0x74, 0x95,
    0x6D, 0x4E, 0x2F, 0x93, 0x77, 0x85, 0x44, 0xD4, 0x72, 0x38, 0xF3, 0x61, 0x31, 0xFA, 0x75, 0x2D,
    0xC4, 0x79, 0xD6, 0xFF, 0x32, 0xA1, 0xEC, 0x20, 0x6B, 0x22, 0x5D, 0x86, 0x2B, 0xF7, 0x3F, 0x60,
    0x78, 0x6A, 0x0A, 0x7E, 0x76, 0x46, 0xAC, 0x4D, 0xEF, 0xC9, 0x5F, 0xC0, 0xE7, 0xC2, 0xAA, 0xDE,
    0x99, 0xA0, 0x6F, 0x0D, 0x7D, 0xA9, 0x6C, 0xD7, 0x28, 0xFE, 0xAF, 0x5E, 0xFB, 0x24, 0xE8, 0x89,
    0xF4, 0x47, 0xDB, 0x15, 0x69, 0xE1, 0xED, 0x14, 0xE4, 0xCD, 0x37, 0xBA, 0x19, 0x16, 0xCF, 0x84,
    0xC1, 0x05, 0x1E, 0xB6, 0xE6, 0xD8, 0x66, 0x7A, 0xFC, 0x65, 0x39, 0x4A, 0x7F, 0xD9, 0x5C, 0x1C,
];

const TABLE_S: [u8; 256] = [
    0x9D, 0x47, 0xE4, 0x1C, 0xEB, 0x4D, 0x99, 0xD9, 0x2A, 0xF4, 0x77, 0xCB, 0x0E, 0x6D, 0x0C, 0x9A,
    0x86, 0xE5, 0xA5, 0x52, 0x89, 0x57, 0x17, 0x16, 0x70, 0xA0, 0xD2, 0xE8, 0x03, 0x5C, 0x3D, 0xB8,
    0x5A, 0x3E, 0x41, 0x4A, 0x63, 0xCA, 0x94, 0x74, 0x46, 0xB7, 0x08, 0x48, 0xB0, 0xCE, 0xC8, 0x82,
    0x34, 0xEF, 0xFA, 0xBA, 0x30, 0x9F, 0x93, 0x40, 0x55, 0xC0, 0xC7, 0x5F, 0x9E, 0x1E, 0x21, 0x45,
    0x37, 0x22, 0x59, 0x92, 0xF7, 0x3F, 0x28, 0x01, 0x2B, 0xFE, 0x23, 0x9C, 0x78, 0x05, 0x91, 0x79,
    0xC5, 0xA6, 0x13, 0xA3, 0xBC, 0x38, 0xC4, 0x15, 0xF8, 0x42, 0x20, 0xB9, 0x1D, 0xE3, 0x95, 0x3B,
    0x6E, 0x8C, 0xC6, 0x24, 0xE2, 0x69, 0xAA, 0xA1, 0xCD, 0x65, 0xC9, 0x73, 0xA2, 0x0D, 0x60, 0x71,
    0x18, 0x6F, 0xFD, 0x6B, 0x27, 0x97, 0xE6, 0x0A, 0x4C, 0x4F, 0xFB, 0xDF, 0x88, 0xF0, 0x81, 0xDC,
    0xBF, 0x7E, 0x2F, 0x84, 0x83, 0xAC, 0x10, 0xF3, 0x7C, 0x14, 0xC1, 0xE1, 0x61, 0xEC, 0x8F, 0x8E,
    0xE9, 0x4E, 0x43, 0x36, 0x26, 0x5E, 0xD0, 0x75, 0xA7, 0x06, 0x0F, 0xD7, 0x4B, 0x00, 0x3C, 0x35,
    0x19, 0x67, 0x6C, 0x53, 0xDE, 0x12, 0x51, 0x98, 0xD3, 0xB2, 0x66, 0xD8, 0x85, 0xDA, 0xD1, 0xF6,
    0x2C, 0xBD, 0xA9, 0xB6, 0xBB, 0xEE, 0xB3, 0x29, 0x1F, 0x5B, 0x33, 0xB4, 0x54, 0xB1, 0xC3, 0x80,
    0x39, 0x8A, 0xF2, 0xBE, 0x56, 0x50, 0x62, 0x3A, 0x2E, 0x6A, 0x25, 0x0B, 0xF1, 0x68, 0x2D, 0xD4,
    0x96, 0xAE, 0x1A, 0xA8, 0xCF, 0xF9, 0xFC, 0x9B, 0xAB, 0x07, 0xAD, 0xFF, 0x7F, 0xE0, 0xA4, 0x7B,
    0xDD, 0x8B, 0x64, 0x5D, 0x02, 0x11, 0x76, 0xF5, 0x1B, 0x90, 0xED, 0x04, 0x8D, 0xEA, 0xB5, 0x31,
    0x7D, 0xCC, 0xC2, 0x87, 0x09, 0xE7, 0xAF, 0x44, 0x58, 0xD5, 0x32, 0x7A, 0xD6, 0x72, 0x49, 0xDB,
];

fn table_r() -> &'static [u8; 256] {
    &TABLE_R
}

fn table_s() -> &'static [u8; 256] {
    &TABLE_S
}

fn table_i() -> &'static [u8; 256] {
    &TABLE_I
}

/// Fold the two halves of a key into the 16-bit rotor both codecs start
/// from.
fn fold_key(key: u32) -> u16 {
    (key ^ (key >> 16)) as u16
}

/// Decode `data` in place according to `method`, returning the number of
/// bytes processed.
pub fn decrypt(method: NdbCryptMethod, key: u32, data: &mut [u8]) -> NdbResult<usize> {
    if data.len() > i32::MAX as usize {
        return Err(NdbError::BufferSizeOutOfBounds(data.len()));
    }

    match method {
        NdbCryptMethod::None => {}
        NdbCryptMethod::Compressible => compressible::encode_decode_buffer(data, key),
        NdbCryptMethod::High => high::decode_buffer(data, key),
    }

    Ok(data.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_are_permutations() {
        let mut seen_r = [false; 256];
        let mut seen_s = [false; 256];
        for index in 0..256 {
            seen_r[usize::from(TABLE_R[index])] = true;
            seen_s[usize::from(TABLE_S[index])] = true;
        }
        assert!(seen_r.iter().all(|seen| *seen));
        assert!(seen_s.iter().all(|seen| *seen));
    }

    #[test]
    fn test_r_and_i_are_inverse() {
        for value in 0..=255_u8 {
            assert_eq!(TABLE_I[usize::from(TABLE_R[usize::from(value)])], value);
            assert_eq!(TABLE_R[usize::from(TABLE_I[usize::from(value)])], value);
        }
    }

    #[test]
    fn test_s_is_an_involution() {
        for value in 0..=255_u8 {
            assert_eq!(TABLE_S[usize::from(TABLE_S[usize::from(value)])], value);
        }
    }

    #[test]
    fn test_none_leaves_buffer_unchanged() {
        let mut data = b"Hello, World!".to_vec();
        let processed = decrypt(NdbCryptMethod::None, 0x1234_5678, &mut data).unwrap();
        assert_eq!(processed, data.len());
        assert_eq!(&data, b"Hello, World!");
    }
}
