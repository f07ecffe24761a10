//! Wildcard byte-pattern scanning.
//!
//! Patterns are hex strings in which every `..` pair matches any byte, e.g.
//! `"554889e5....ec28"`. Matching is anchored on the fixed prefix: the
//! scanner substring-searches for the concrete bytes before the first
//! wildcard, then verifies the rest of the pattern in place at each hit.
//!
//! After every anchor hit the cursor advances past the anchor only, not
//! past the whole pattern, so results are non-overlapping at anchor
//! granularity. A pattern whose wildcard tail contains another copy of its
//! own anchor can therefore shadow an overlapping match. The builtin
//! patterns have long, non-self-repeating prologues, so the behavior is
//! kept as is rather than paying for overlap-sensitive search on
//! megabyte-scale slices.

pub mod library;

use memchr::memmem;

use crate::error::{Error, Result};

/// Two-character token matching any byte.
pub const WILDCARD: &str = "..";

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        _ => None,
    }
}

/// A parsed wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    tokens: Vec<Option<u8>>,
    anchor: Vec<u8>,
}

impl Signature {
    /// Parse a hex pattern string. Case-insensitive; spaces are ignored.
    pub fn parse(pattern: &str) -> Result<Self> {
        let normalized: String = pattern.to_ascii_lowercase().split_whitespace().collect();
        if normalized.is_empty() {
            return Err(Error::InvalidPattern("pattern is empty".to_string()));
        }
        if normalized.len() % 2 != 0 {
            return Err(Error::InvalidPattern(format!(
                "odd number of nibbles in {pattern:?}"
            )));
        }

        let mut tokens = Vec::with_capacity(normalized.len() / 2);
        for pair in normalized.as_bytes().chunks_exact(2) {
            if pair == WILDCARD.as_bytes() {
                tokens.push(None);
                continue;
            }
            let (Some(high), Some(low)) = (hex_value(pair[0]), hex_value(pair[1])) else {
                return Err(Error::InvalidPattern(format!(
                    "invalid byte {:?} in {pattern:?}",
                    String::from_utf8_lossy(pair)
                )));
            };
            tokens.push(Some((high << 4) | low));
        }

        let anchor = tokens.iter().map_while(|token| *token).collect();
        Ok(Self { tokens, anchor })
    }

    /// Pattern length in bytes.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Length of the fixed prefix used for the substring search.
    pub fn anchor_len(&self) -> usize {
        self.anchor.len()
    }

    /// The parsed nibble-pairs; `None` marks a wildcard position.
    pub fn tokens(&self) -> &[Option<u8>] {
        &self.tokens
    }

    /// Check the full pattern against `data` at `pos`. Wildcard positions
    /// are unconstrained; a pattern running past the end never matches.
    pub fn matches_at(&self, data: &[u8], pos: usize) -> bool {
        let Some(window) = data.get(pos..pos + self.tokens.len()) else {
            return false;
        };
        self.tokens
            .iter()
            .zip(window)
            .all(|(token, byte)| token.is_none_or(|expected| expected == *byte))
    }
}

/// Find all anchor-granular matches of `signature` in `data`, as offsets
/// from the start of `data`.
pub fn scan(data: &[u8], signature: &Signature) -> Vec<usize> {
    let mut matches = Vec::new();

    if signature.anchor.is_empty() {
        // No fixed prefix to anchor on; verify every offset.
        for pos in 0..data.len() {
            if signature.matches_at(data, pos) {
                matches.push(pos);
            }
        }
        return matches;
    }

    let finder = memmem::Finder::new(&signature.anchor);
    let mut cursor = 0usize;
    while cursor < data.len() {
        let Some(index) = finder.find(&data[cursor..]) else {
            break;
        };
        let pos = cursor + index;
        if signature.matches_at(data, pos) {
            matches.push(pos);
        }
        // Advance past the anchor, not the whole pattern: see module docs.
        cursor = pos + signature.anchor.len();
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic noise for wildcard positions.
    pub(crate) fn fill_noise(buf: &mut [u8], mut seed: u32) {
        for byte in buf.iter_mut() {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            *byte = (seed >> 24) as u8;
        }
    }

    /// Render a signature into bytes, with noise at wildcard positions.
    pub(crate) fn materialize(signature: &Signature, seed: u32) -> Vec<u8> {
        let mut noise = vec![0u8; signature.len()];
        fill_noise(&mut noise, seed);
        signature
            .tokens
            .iter()
            .zip(noise)
            .map(|(token, fallback)| token.unwrap_or(fallback))
            .collect()
    }

    #[test]
    fn test_parse_pattern_with_wildcards() {
        let signature = Signature::parse("5548 89E5 .. 41 ..57").unwrap();
        assert_eq!(signature.len(), 6);
        assert_eq!(signature.anchor_len(), 4);
        assert_eq!(signature.tokens[0], Some(0x55));
        assert_eq!(signature.tokens[4], None);
        assert_eq!(signature.tokens[5], Some(0x57));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Signature::parse("").is_err());
        assert!(Signature::parse("554").is_err());
        assert!(Signature::parse("55zz").is_err());
    }

    #[test]
    fn test_no_wildcard_pattern_anchor_is_whole_pattern() {
        let signature = Signature::parse("deadbeef").unwrap();
        assert_eq!(signature.anchor_len(), signature.len());
    }

    #[test]
    fn test_scan_is_deterministic() {
        let signature = Signature::parse("aa..cc").unwrap();
        let mut data = vec![0u8; 512];
        fill_noise(&mut data, 7);
        data[100] = 0xAA;
        data[102] = 0xCC;

        let first = scan(&data, &signature);
        let second = scan(&data, &signature);
        assert_eq!(first, second);
    }

    #[test]
    fn test_exact_pattern_matches_reference_search() {
        let signature = Signature::parse("0102").unwrap();
        let data = [0x01, 0x02, 0x00, 0x01, 0x02, 0x01, 0x01, 0x02];

        let reference: Vec<usize> = (0..data.len())
            .filter(|&pos| data[pos..].starts_with(&[0x01, 0x02]))
            .collect();
        // Anchor-granular scanning agrees with exact search here because
        // the needle cannot overlap itself.
        assert_eq!(scan(&data, &signature), reference);
        assert_eq!(scan(&data, &signature), vec![0, 3, 6]);
    }

    #[test]
    fn test_self_overlapping_needle_is_anchor_granular() {
        let signature = Signature::parse("ffff").unwrap();
        let data = [0xFF, 0xFF, 0xFF];
        // Exact search would also report offset 1; the cursor has already
        // moved past the anchor.
        assert_eq!(scan(&data, &signature), vec![0]);
    }

    #[test]
    fn test_wildcard_positions_are_unconstrained() {
        let signature = Signature::parse("aa..bb").unwrap();
        for filler in [0x00u8, 0x7F, 0xAA, 0xFF] {
            let data = [0x11, 0xAA, filler, 0xBB, 0x22];
            assert_eq!(scan(&data, &signature), vec![1], "filler {filler:#x}");
        }
    }

    #[test]
    fn test_concrete_positions_must_match() {
        let signature = Signature::parse("aa..bb").unwrap();
        let data = [0xAA, 0x00, 0xBC];
        assert!(scan(&data, &signature).is_empty());
    }

    #[test]
    fn test_injected_pattern_round_trip() {
        let signature = Signature::parse(
            "554889e54157415641554154534883ec28..89..48897dd04c8b3d",
        )
        .unwrap();
        let mut data = vec![0u8; 4096];
        let offset = 0x4C7;
        let rendered = materialize(&signature, 99);
        data[offset..offset + rendered.len()].copy_from_slice(&rendered);

        let matches = scan(&data, &signature);
        assert!(matches.contains(&offset));
    }

    #[test]
    fn test_pattern_truncated_at_end_of_slice_does_not_match() {
        let signature = Signature::parse("aabb..dd").unwrap();
        let data = [0xAA, 0xBB, 0xCC];
        assert!(scan(&data, &signature).is_empty());
    }

    #[test]
    fn test_leading_wildcard_degrades_to_exhaustive_scan() {
        let signature = Signature::parse("..bb").unwrap();
        let data = [0xBB, 0xBB, 0x00, 0xBB];
        assert_eq!(scan(&data, &signature), vec![0, 2]);
    }

    #[test]
    fn test_all_builtin_patterns_parse() {
        for arch in ["x86_64", "arm64e"] {
            let patterns = library::builtin_patterns(arch).unwrap();
            assert_eq!(patterns.len(), library::PATTERN_LABELS.len());
            for (label, pattern) in patterns {
                let signature = Signature::parse(pattern)
                    .unwrap_or_else(|e| panic!("{arch}/{label}: {e}"));
                assert!(signature.anchor_len() >= 5, "{arch}/{label} anchor too short");
            }
        }
    }
}
