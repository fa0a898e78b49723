// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! UTF-8 boundary guard: holds back incomplete multi-byte sequences between
//! chunks so downstream consumers only ever see valid UTF-8. Malformed bytes
//! become U+FFFD.

use super::{FilterStats, OutputFilter, UTF8_GUARD};

const REPLACEMENT: &str = "\u{fffd}";

pub struct Utf8GuardFilter {
    pending: Vec<u8>,
    stats: FilterStats,
}

impl Utf8GuardFilter {
    pub fn new() -> Self {
        Self { pending: Vec::new(), stats: FilterStats::new(UTF8_GUARD) }
    }
}

impl Default for Utf8GuardFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFilter for Utf8GuardFilter {
    fn write(&mut self, data: &[u8]) -> Vec<u8> {
        self.stats.in_bytes += data.len() as u64;

        let input: Vec<u8> = if self.pending.is_empty() {
            data.to_vec()
        } else {
            let mut joined = std::mem::take(&mut self.pending);
            joined.extend_from_slice(data);
            joined
        };

        let mut out = Vec::with_capacity(input.len());
        let mut rest = &input[..];
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.extend_from_slice(valid.as_bytes());
                    break;
                }
                Err(err) => {
                    let valid_len = err.valid_up_to();
                    out.extend_from_slice(&rest[..valid_len]);
                    match err.error_len() {
                        // Possibly a rune split across chunks: hold it back.
                        None => {
                            self.pending = rest[valid_len..].to_vec();
                            break;
                        }
                        Some(bad) => {
                            out.extend_from_slice(REPLACEMENT.as_bytes());
                            self.stats.dropped_bytes += bad as u64;
                            rest = &rest[valid_len + bad..];
                        }
                    }
                }
            }
        }

        self.stats.out_bytes += out.len() as u64;
        out
    }

    fn flush(&mut self) -> Vec<u8> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        self.stats.dropped_bytes += self.pending.len() as u64;
        self.pending.clear();
        self.stats.out_bytes += REPLACEMENT.len() as u64;
        REPLACEMENT.as_bytes().to_vec()
    }

    fn resize(&mut self, _cols: u16, _rows: u16) {}

    fn reset(&mut self) {
        self.pending.clear();
        self.stats = FilterStats::new(UTF8_GUARD);
    }

    fn stats(&self) -> FilterStats {
        self.stats.clone()
    }
}

#[cfg(test)]
#[path = "utf8_tests.rs"]
mod tests;
