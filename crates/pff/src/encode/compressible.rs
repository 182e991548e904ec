//! ## Compressible encoding
//!
//! Each byte is mixed with the two rotating key bytes and driven through the
//! substitution tables. The pass structure is symmetric around the
//! involution table, so the same routine encodes and decodes.

use super::*;

/// Encode/decode a data block buffer in place.
pub fn encode_decode_buffer(data: &mut [u8], key: u32) {
    let r_table = table_r();
    let s_table = table_s();
    let i_table = table_i();

    let mut key = fold_key(key);

    for b in data.iter_mut() {
        let low_key = key as u8;
        let high_key = (key >> 8) as u8;

        *b = (*b).wrapping_add(low_key);
        *b = r_table[usize::from(*b)];
        *b = (*b).wrapping_add(high_key);
        *b = s_table[usize::from(*b)];
        *b = (*b).wrapping_sub(high_key);
        *b = i_table[usize::from(*b)];
        *b = (*b).wrapping_sub(low_key);

        key = key.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"Hello, World!";
    const KEY: u32 = 0x1234_5678;

    #[test]
    fn test_encode_buffer() {
        let mut data = SAMPLE.to_vec();
        encode_decode_buffer(&mut data, KEY);
        assert_ne!(SAMPLE, &data);
    }

    #[test]
    fn test_decode_buffer() {
        let mut data = SAMPLE.to_vec();
        encode_decode_buffer(&mut data, KEY);
        encode_decode_buffer(&mut data, KEY);
        assert_eq!(SAMPLE, &data);
    }

    #[test]
    fn test_key_changes_output() {
        let mut first = SAMPLE.to_vec();
        let mut second = SAMPLE.to_vec();
        encode_decode_buffer(&mut first, KEY);
        encode_decode_buffer(&mut second, KEY.wrapping_add(1));
        assert_ne!(first, second);
    }
}
