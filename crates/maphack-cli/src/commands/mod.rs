pub mod cache;
pub mod obfuscate;
pub mod scan;

use anyhow::{Context, Result};

/// Parse a hex value with or without a `0x` prefix.
pub fn parse_hex(text: &str) -> Result<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16).with_context(|| format!("not a hex value: {text}"))
}
