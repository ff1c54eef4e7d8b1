//! Deterministic test payloads.
//!
//! Both peers regenerate the same bytes from a `PayloadSpec`, so the receiver
//! can check integrity without any shared state.

use std::fmt;
use std::str::FromStr;

use log::error;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::error::{RegressError, Result};

pub const DEFAULT_PAYLOAD_SIZE: usize = 4096;

// Prime period keeps the counter out of step with power-of-two buffers
const COUNTER_PERIOD: usize = 251;
// Bytes of context shown on each side of a mismatch
const DIFF_WINDOW: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Byte `i` is `i % 251`
    Counter,
    /// Bytes from a `StdRng` seeded with the value
    Seeded(u64),
}

impl FromStr for Pattern {
    type Err = RegressError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("counter") {
            return Ok(Pattern::Counter);
        }
        match s.strip_prefix("seed:") {
            Some(seed) => seed
                .parse::<u64>()
                .map(Pattern::Seeded)
                .map_err(|e| RegressError::Config(format!("Invalid seed '{}': {}", seed, e))),
            None => Err(RegressError::Config(format!(
                "Unknown payload pattern '{}' (expected 'counter' or 'seed:<n>')",
                s
            ))),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Counter => write!(f, "counter"),
            Pattern::Seeded(seed) => write!(f, "seed:{}", seed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadSpec {
    pub size: usize,
    pub pattern: Pattern,
}

impl Default for PayloadSpec {
    fn default() -> Self {
        PayloadSpec {
            size: DEFAULT_PAYLOAD_SIZE,
            pattern: Pattern::Counter,
        }
    }
}

impl PayloadSpec {
    pub fn new(size: usize, pattern: Pattern) -> Self {
        PayloadSpec { size, pattern }
    }

    pub fn generate(&self) -> Vec<u8> {
        match self.pattern {
            Pattern::Counter => (0..self.size).map(|i| (i % COUNTER_PERIOD) as u8).collect(),
            Pattern::Seeded(seed) => {
                let mut buf = vec![0u8; self.size];
                StdRng::seed_from_u64(seed).fill_bytes(&mut buf);
                buf
            }
        }
    }
}

/// Offset of the first byte where `expected` and `actual` differ. A length
/// difference counts as a difference at the end of the shorter slice.
pub fn first_mismatch(expected: &[u8], actual: &[u8]) -> Option<usize> {
    let common = expected.len().min(actual.len());
    expected[..common]
        .iter()
        .zip(&actual[..common])
        .position(|(a, b)| a != b)
        .or(if expected.len() != actual.len() {
            Some(common)
        } else {
            None
        })
}

/// Byte-for-byte comparison. On mismatch the surrounding bytes of both sides
/// are logged in hex.
pub fn verify(expected: &[u8], actual: &[u8]) -> Result<()> {
    match first_mismatch(expected, actual) {
        None => Ok(()),
        Some(offset) => {
            error!(
                "Payload mismatch at offset {}: expected [{}], got [{}]",
                offset,
                hex_window(expected, offset),
                hex_window(actual, offset)
            );
            Err(RegressError::DataMismatch {
                offset,
                expected_len: expected.len(),
                actual_len: actual.len(),
            })
        }
    }
}

fn hex_window(buf: &[u8], offset: usize) -> String {
    let start = offset.saturating_sub(DIFF_WINDOW).min(buf.len());
    let end = (offset + DIFF_WINDOW).min(buf.len());
    hex::encode(&buf[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_wraps_at_period() {
        let payload = PayloadSpec::new(600, Pattern::Counter).generate();
        assert_eq!(payload.len(), 600);
        assert_eq!(payload[0], 0);
        assert_eq!(payload[250], 250);
        assert_eq!(payload[251], 0);
        assert_eq!(payload[503], 1);
    }

    #[test]
    fn seeded_pattern_is_deterministic() {
        let a = PayloadSpec::new(1024, Pattern::Seeded(42)).generate();
        let b = PayloadSpec::new(1024, Pattern::Seeded(42)).generate();
        let c = PayloadSpec::new(1024, Pattern::Seeded(43)).generate();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn parses_patterns() {
        assert_eq!("counter".parse::<Pattern>().unwrap(), Pattern::Counter);
        assert_eq!("seed:7".parse::<Pattern>().unwrap(), Pattern::Seeded(7));
        assert!("seed:x".parse::<Pattern>().is_err());
        assert!("random".parse::<Pattern>().is_err());
        assert_eq!(Pattern::Seeded(9).to_string(), "seed:9");
    }

    #[test]
    fn detects_single_bit_flip() {
        let expected = PayloadSpec::default().generate();
        let mut actual = expected.clone();
        actual[1234] ^= 0x01;

        assert_eq!(first_mismatch(&expected, &actual), Some(1234));
        match verify(&expected, &actual) {
            Err(RegressError::DataMismatch { offset, .. }) => assert_eq!(offset, 1234),
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn length_difference_is_a_mismatch() {
        let expected = vec![1u8, 2, 3, 4];
        assert_eq!(first_mismatch(&expected, &expected[..3]), Some(3));
        assert_eq!(first_mismatch(&expected[..3], &expected), Some(3));
        assert_eq!(first_mismatch(&expected, &expected), None);
        assert!(verify(&[], &[]).is_ok());
    }
}
