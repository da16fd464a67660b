//! Window/stride unit extraction.
//!
//! Tokenization is total and deterministic: the same value and
//! [`WindowConfig`] always produce the same unit sequence. Every unit is
//! a contiguous substring of the value, which is what lets the executor
//! treat dictionary hits as structurally sound candidates.

use crate::index::types::{Unit, WindowConfig};
use std::borrow::Cow;

/// Case-fold a value according to the index configuration.
pub fn fold<'a>(value: &'a [u8], config: &WindowConfig) -> Cow<'a, [u8]> {
    if config.case_insensitive && value.iter().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(value.to_ascii_lowercase())
    } else {
        Cow::Borrowed(value)
    }
}

/// Extract all indexable units of a column value with their byte offsets.
///
/// Values shorter than the window are emitted whole at offset 0 so short
/// values stay searchable. The empty value yields no units. For strides
/// greater than 1 an extra window anchored at the end is emitted when the
/// aligned windows would leave tail bytes uncovered.
pub fn tokenize(value: &[u8], config: &WindowConfig) -> Vec<(Unit, u32)> {
    let folded = fold(value, config);
    let value = folded.as_ref();
    let len = value.len();
    let window = config.window_len as usize;
    let stride = config.stride as usize;

    if len == 0 {
        return Vec::new();
    }
    if len < window {
        return vec![(value.to_vec(), 0)];
    }

    let mut units = Vec::with_capacity(len / stride + 2);
    let mut offset = 0;
    while offset + window <= len {
        units.push((value[offset..offset + window].to_vec(), offset as u32));
        offset += stride;
    }

    // Tail coverage: the last aligned window may stop short of the end.
    let last_covered = offset - stride + window;
    if last_covered < len {
        units.push(((value[len - window..]).to_vec(), (len - window) as u32));
    }

    units
}

/// The full windows of a pattern starting at `first`, stepping by the
/// index stride. Used by the planner to derive required units for one
/// alignment phase; offsets are pattern-relative.
pub fn pattern_windows(pattern: &[u8], first: u32, config: &WindowConfig) -> Vec<(Unit, u32)> {
    let window = config.window_len as usize;
    let stride = config.stride as usize;
    let mut out = Vec::new();
    let mut offset = first as usize;
    while offset + window <= pattern.len() {
        out.push((pattern[offset..offset + window].to_vec(), offset as u32));
        offset += stride;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(window_len: u32, stride: u32) -> WindowConfig {
        WindowConfig {
            window_len,
            stride,
            ..Default::default()
        }
    }

    fn units(value: &str, cfg: &WindowConfig) -> Vec<(String, u32)> {
        tokenize(value.as_bytes(), cfg)
            .into_iter()
            .map(|(u, o)| (String::from_utf8(u).unwrap(), o))
            .collect()
    }

    #[test]
    fn test_tokenize_banana() {
        let got = units("banana", &config(3, 1));
        assert_eq!(
            got,
            vec![
                ("ban".to_string(), 0),
                ("ana".to_string(), 1),
                ("nan".to_string(), 2),
                ("ana".to_string(), 3),
            ]
        );
    }

    #[test]
    fn test_tokenize_empty_and_short() {
        let cfg = config(3, 1);
        assert!(units("", &cfg).is_empty());
        assert_eq!(units("ab", &cfg), vec![("ab".to_string(), 0)]);
        assert_eq!(units("abc", &cfg), vec![("abc".to_string(), 0)]);
    }

    #[test]
    fn test_tokenize_stride_tail_coverage() {
        // window 4, stride 3 over 10 bytes: aligned windows at 0, 3, 6
        // cover bytes 0..10, no tail window needed.
        let got = units("abcdefghij", &config(4, 3));
        assert_eq!(got.iter().map(|(_, o)| *o).collect::<Vec<_>>(), vec![0, 3, 6]);

        // 9 bytes: aligned windows at 0 and 3 cover 0..7; tail window
        // anchored at 5 covers the rest.
        let got = units("abcdefghi", &config(4, 3));
        assert_eq!(got.iter().map(|(_, o)| *o).collect::<Vec<_>>(), vec![0, 3, 5]);
        assert_eq!(got.last().unwrap().0, "fghi");
    }

    #[test]
    fn test_tokenize_deterministic() {
        let cfg = config(3, 2);
        assert_eq!(units("determinism", &cfg), units("determinism", &cfg));
    }

    #[test]
    fn test_tokenize_case_folding() {
        let cfg = WindowConfig {
            case_insensitive: true,
            ..config(3, 1)
        };
        assert_eq!(units("BaNaNa", &cfg), units("banana", &cfg));
        assert_eq!(units("MIX", &cfg), vec![("mix".to_string(), 0)]);
    }

    #[test]
    fn test_pattern_windows_phases() {
        let cfg = config(3, 2);
        let p = b"abcdefg";
        // Phase 0: windows at 0, 2, 4; phase 1: windows at 1, 3.
        let phase0 = pattern_windows(p, 0, &cfg);
        assert_eq!(phase0.iter().map(|(_, o)| *o).collect::<Vec<_>>(), vec![0, 2, 4]);
        let phase1 = pattern_windows(p, 1, &cfg);
        assert_eq!(phase1.iter().map(|(_, o)| *o).collect::<Vec<_>>(), vec![1, 3]);
    }
}
