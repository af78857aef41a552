use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A single token of a byte pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchByte {
    /// Matches exactly this byte.
    Literal(u8),
    /// Matches any byte.
    Wildcard,
    /// Matches any byte and marks the first byte of the 4-byte capture
    /// window.
    CaptureStart,
}

impl MatchByte {
    #[inline]
    pub fn matches(self, byte: u8) -> bool {
        match self {
            MatchByte::Literal(b) => b == byte,
            MatchByte::Wildcard | MatchByte::CaptureStart => true,
        }
    }
}

/// A parsed byte pattern.
///
/// The textual form is whitespace-separated tokens: a two-digit hex byte,
/// `?` for a wildcard, or `^` for a wildcard that additionally starts the
/// 4-byte little-endian capture window. Exactly one `^` is required and the
/// window it opens must fit inside the pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    tokens: Vec<MatchByte>,
    capture_offset: usize,
}

impl Pattern {
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |message: &str| Error::InvalidPattern {
            pattern: text.to_owned(),
            message: message.to_owned(),
        };

        let mut tokens = Vec::new();
        let mut capture_offset = None;
        for token in text.split_ascii_whitespace() {
            match token {
                "?" => tokens.push(MatchByte::Wildcard),
                "^" => {
                    if capture_offset.replace(tokens.len()).is_some() {
                        return Err(invalid("more than one capture marker"));
                    }
                    tokens.push(MatchByte::CaptureStart);
                }
                _ => {
                    if token.len() != 2 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
                        return Err(invalid("expected a two-digit hex byte, `?` or `^`"));
                    }
                    let byte = u8::from_str_radix(token, 16)
                        .map_err(|_| invalid("expected a two-digit hex byte, `?` or `^`"))?;
                    tokens.push(MatchByte::Literal(byte));
                }
            }
        }

        if tokens.is_empty() {
            return Err(invalid("empty pattern"));
        }
        let capture_offset = capture_offset.ok_or_else(|| invalid("missing capture marker"))?;
        if capture_offset + 4 > tokens.len() {
            return Err(invalid("capture window overruns the pattern"));
        }

        Ok(Self {
            tokens,
            capture_offset,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Byte offset of the start of the capture window within a match.
    #[inline]
    pub fn capture_offset(&self) -> usize {
        self.capture_offset
    }

    #[inline]
    pub fn matches_at(&self, haystack: &[u8], at: usize) -> bool {
        let Some(window) = at
            .checked_add(self.tokens.len())
            .and_then(|end| haystack.get(at..end))
        else {
            return false;
        };
        window
            .iter()
            .zip(&self.tokens)
            .all(|(byte, token)| token.matches(*byte))
    }

    /// Offsets of every match within `haystack`, in ascending order.
    pub fn find_all_in(&self, haystack: &[u8]) -> Vec<usize> {
        let mut matches = Vec::new();
        if haystack.len() < self.tokens.len() {
            return matches;
        }
        let last = haystack.len() - self.tokens.len();

        // Anchor the search on the first literal byte so memchr can skip
        // ahead instead of testing every position.
        let anchor = self
            .tokens
            .iter()
            .position(|t| matches!(t, MatchByte::Literal(_)));
        match anchor {
            Some(skip) => {
                let MatchByte::Literal(byte) = self.tokens[skip] else {
                    unreachable!()
                };
                for found in memchr::memchr_iter(byte, haystack) {
                    let Some(start) = found.checked_sub(skip) else {
                        continue;
                    };
                    if start > last {
                        break;
                    }
                    if self.matches_at(haystack, start) {
                        matches.push(start);
                    }
                }
            }
            None => {
                for start in 0..=last {
                    if self.matches_at(haystack, start) {
                        matches.push(start);
                    }
                }
            }
        }
        matches
    }

    /// The 4-byte little-endian capture of a match starting at `at`.
    pub fn capture(&self, haystack: &[u8], at: usize) -> Option<i32> {
        let start = at + self.capture_offset;
        let bytes = haystack.get(start..start + 4)?;
        Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match token {
                MatchByte::Literal(b) => write!(f, "{b:02X}")?,
                MatchByte::Wildcard => f.write_str("?")?,
                MatchByte::CaptureStart => f.write_str("^")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let p = Pattern::parse("48 8B 05 ^ ? ? ? C3").unwrap();
        assert_eq!(p.len(), 8);
        assert_eq!(p.capture_offset(), 3);
    }

    #[test]
    fn test_parse_rejects_missing_capture() {
        assert!(Pattern::parse("48 8B 05").is_err());
    }

    #[test]
    fn test_parse_rejects_double_capture() {
        assert!(Pattern::parse("48 ^ ? ? ? ^ ? ? ?").is_err());
    }

    #[test]
    fn test_parse_rejects_overrunning_capture() {
        assert!(Pattern::parse("48 8B ^ ? ?").is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Pattern::parse("").is_err());
        assert!(Pattern::parse("GG ^ ? ? ?").is_err());
        assert!(Pattern::parse("4 ^ ? ? ?").is_err());
        assert!(Pattern::parse("488B ^ ? ? ?").is_err());
    }

    #[test]
    fn test_find_all_matches_and_captures() {
        let p = Pattern::parse("48 8B 05 ^ ? ? ?").unwrap();
        let mut data = vec![0u8; 64];
        data[10..13].copy_from_slice(&[0x48, 0x8B, 0x05]);
        data[13..17].copy_from_slice(&0x1234_5678_i32.to_le_bytes());
        data[40..43].copy_from_slice(&[0x48, 0x8B, 0x05]);
        data[43..47].copy_from_slice(&(-8_i32).to_le_bytes());

        let found = p.find_all_in(&data);
        assert_eq!(found, vec![10, 40]);
        assert_eq!(p.capture(&data, 10), Some(0x1234_5678));
        assert_eq!(p.capture(&data, 40), Some(-8));
    }

    #[test]
    fn test_find_all_with_leading_wildcards() {
        let p = Pattern::parse("? ? E8 ^ ? ? ?").unwrap();
        let mut data = vec![0u8; 32];
        data[5] = 0xE8;
        assert_eq!(p.find_all_in(&data), vec![3]);
    }

    #[test]
    fn test_find_all_no_literals() {
        let p = Pattern::parse("? ^ ? ? ?").unwrap();
        let data = [0u8; 8];
        assert_eq!(p.find_all_in(&data), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_find_all_is_deterministic() {
        let p = Pattern::parse("CC ^ ? ? ?").unwrap();
        let data = [0xCCu8; 16];
        assert_eq!(p.find_all_in(&data), p.find_all_in(&data));
    }

    #[test]
    fn test_display_round_trip() {
        let text = "48 8B 05 ^ ? ? ? C3";
        let p = Pattern::parse(text).unwrap();
        assert_eq!(p.to_string(), text);
    }
}
