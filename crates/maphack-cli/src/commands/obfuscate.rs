//! Return-address obfuscation calculator.

use anyhow::Result;

use maphack_core::retcheck::{deobfuscate, obfuscate};

use super::parse_hex;

pub fn run_obfuscate(retaddr: &str, base: &str, constant: &str) -> Result<()> {
    let retaddr = parse_hex(retaddr)?;
    let base = parse_hex(base)?;
    let constant = parse_hex(constant)? as u32;

    let value = obfuscate(retaddr, base, constant);
    println!("retaddr:    {retaddr:#x}");
    println!("offset:     {:#x}", retaddr.wrapping_sub(base));
    println!("obfuscated: {value:#010x}");
    Ok(())
}

pub fn run_deobfuscate(value: &str, constant: &str) -> Result<()> {
    let value = parse_hex(value)? as u32;
    let constant = parse_hex(constant)? as u32;

    let offset = deobfuscate(value, constant);
    println!("obfuscated: {value:#010x}");
    println!("offset:     {offset:#x}");
    Ok(())
}
