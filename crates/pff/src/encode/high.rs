//! ## High encoding
//!
//! Three passes per byte: a keyed substitution, a nibble swap mixed with
//! both key bytes, and a second keyed substitution. Decoding applies the
//! exact inverse of each pass in reverse order.

use super::*;

fn nibble_swap(b: u8) -> u8 {
    b.rotate_left(4)
}

/// Encode a data block buffer in place.
pub fn encode_buffer(data: &mut [u8], key: u32) {
    let r_table = table_r();

    let mut key = fold_key(key);

    for b in data.iter_mut() {
        let low_key = key as u8;
        let high_key = (key >> 8) as u8;

        *b = r_table[usize::from((*b).wrapping_add(low_key))];
        *b = nibble_swap(*b) ^ (low_key ^ high_key);
        *b = r_table[usize::from((*b).wrapping_add(high_key))];

        key = key.wrapping_add(1);
    }
}

/// Decode a data block buffer in place.
pub fn decode_buffer(data: &mut [u8], key: u32) {
    let i_table = table_i();

    let mut key = fold_key(key);

    for b in data.iter_mut() {
        let low_key = key as u8;
        let high_key = (key >> 8) as u8;

        *b = i_table[usize::from(*b)].wrapping_sub(high_key);
        *b = nibble_swap(*b ^ (low_key ^ high_key));
        *b = i_table[usize::from(*b)].wrapping_sub(low_key);

        key = key.wrapping_add(1);
    }
}
