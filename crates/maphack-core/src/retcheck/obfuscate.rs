//! The host's return-address obfuscation, reproduced bit-for-bit.
//!
//! Table entries are 32-bit image offsets pushed through a nibble
//! substitution and a handful of xor/add rounds. One round constant is not
//! fixed: it lives in the host's constant block and is read at install time.

/// Byte offset of the variable round constant within the constant block.
pub const CONSTANT_OFFSET: usize = 0xC6;

const XOR_IN: u32 = 0x95BE_951C;
const XOR_MID: u32 = 0x7F8A_A577;
const ROUND_ADD: u32 = 0x0023_CC70;

pub(crate) const SBOX_30: [u8; 16] = [
    0x05, 0x01, 0x0D, 0x09, 0x04, 0x02, 0x0B, 0x03, 0x0A, 0x07, 0x0C, 0x0E, 0x00, 0x06, 0x08, 0x0F,
];

pub(crate) const SBOX_10: [u8; 16] = [
    0x0C, 0x01, 0x05, 0x07, 0x04, 0x00, 0x0D, 0x09, 0x0E, 0x03, 0x08, 0x06, 0x0A, 0x02, 0x0B, 0x0F,
];

fn apply_sbox(value: u32, sbox: &[u8; 16]) -> u32 {
    let mut result = 0u32;
    for i in 0..4 {
        let byte = ((value >> (i * 8)) & 0xFF) as u8;
        let low = sbox[(byte & 0xF) as usize];
        let high = sbox[(byte >> 4) as usize];
        result |= u32::from(low | (high << 4)) << (i * 8);
    }
    result
}

/// Obfuscate a return address against `image_base` into a table entry.
pub fn obfuscate(retaddr: u64, image_base: u64, constant: u32) -> u32 {
    let offset = retaddr.wrapping_sub(image_base) as u32;
    let v = apply_sbox(offset ^ XOR_IN, &SBOX_30);
    let v = ROUND_ADD.wrapping_add(v) ^ XOR_MID;
    let v = (v ^ constant).wrapping_sub(ROUND_ADD);
    apply_sbox(v, &SBOX_10) ^ XOR_IN
}

/// Recover the image offset encoded in a table entry.
pub fn deobfuscate(obfuscated: u32, constant: u32) -> u32 {
    let v = apply_sbox(obfuscated ^ XOR_IN, &SBOX_30);
    let v = v.wrapping_add(ROUND_ADD) ^ constant;
    let v = (v ^ XOR_MID).wrapping_sub(ROUND_ADD);
    apply_sbox(v, &SBOX_10) ^ XOR_IN
}

/// The two s-boxes must invert each other; checked once at install.
pub(crate) fn sboxes_are_inverse() -> bool {
    (0..16).all(|i| SBOX_10[SBOX_30[i] as usize] as usize == i)
        && (0..16).all(|i| SBOX_30[SBOX_10[i] as usize] as usize == i)
}
