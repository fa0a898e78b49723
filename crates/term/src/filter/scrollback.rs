// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scrollback reducer: a minimal VT emulator that turns full-screen TUI churn
//! into a line-oriented transcript. Lines are emitted when they scroll out of
//! the region (and on flush), deduplicated by a recent-hash LRU. Lossy on
//! purpose: cursor art, redraws, and status chrome collapse to stable text.

use std::collections::{HashSet, VecDeque};

use super::{FilterStats, OutputFilter, SCROLLBACK_VT};

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;
const DEDUP_CAPACITY: usize = 256;
const TAB_STOP: usize = 8;

/// FNV-1a 64-bit.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Recently-emitted line hashes, bounded FIFO eviction.
struct DedupLru {
    seen: HashSet<u64>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl DedupLru {
    fn new(capacity: usize) -> Self {
        Self { seen: HashSet::new(), order: VecDeque::new(), capacity }
    }

    /// True when the hash was not seen recently (and is now recorded).
    fn insert(&mut self, hash: u64) -> bool {
        if self.seen.contains(&hash) {
            return false;
        }
        self.seen.insert(hash);
        self.order.push_back(hash);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Parse {
    Text,
    Escape,
    Csi(Vec<u8>),
    StringSeq { bel_terminates: bool, saw_esc: bool },
}

pub struct ScrollbackVtFilter {
    cols: usize,
    rows: usize,
    grid: Vec<Vec<char>>,
    row: usize,
    col: usize,
    /// Scroll region, inclusive.
    top: usize,
    bottom: usize,
    saved: Option<(usize, usize)>,
    parse: Parse,
    utf8_pending: Vec<u8>,
    dedup: DedupLru,
    stats: FilterStats,
}

impl ScrollbackVtFilter {
    pub fn new(cols: u16, rows: u16) -> Self {
        let cols = (cols as usize).max(1);
        let rows = (rows as usize).max(1);
        Self {
            cols,
            rows,
            grid: vec![vec![' '; cols]; rows],
            row: 0,
            col: 0,
            top: 0,
            bottom: rows - 1,
            saved: None,
            parse: Parse::Text,
            utf8_pending: Vec::new(),
            dedup: DedupLru::new(DEDUP_CAPACITY),
            stats: FilterStats::new(SCROLLBACK_VT),
        }
    }

    fn reinit(&mut self, cols: usize, rows: usize) {
        self.cols = cols.max(1);
        self.rows = rows.max(1);
        self.grid = vec![vec![' '; self.cols]; self.rows];
        self.row = 0;
        self.col = 0;
        self.top = 0;
        self.bottom = self.rows - 1;
        self.saved = None;
        self.parse = Parse::Text;
        self.utf8_pending.clear();
        self.dedup.clear();
    }

    fn trimmed_line(&self, row: usize) -> String {
        let mut line: String = self.grid[row].iter().collect();
        while line.ends_with(' ') {
            line.pop();
        }
        line
    }

    /// Emit one line if non-empty and not recently emitted.
    fn emit_line(&mut self, out: &mut Vec<u8>, line: &str) {
        if line.is_empty() {
            return;
        }
        let hash = fnv1a(line.as_bytes());
        if self.dedup.insert(hash) {
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        } else {
            self.stats.dropped_bytes += line.len() as u64 + 1;
        }
    }

    /// Shift the scroll region up one row, emitting the evicted top line.
    fn scroll_up(&mut self, out: &mut Vec<u8>) {
        let evicted = self.trimmed_line(self.top);
        self.emit_line(out, &evicted);
        self.grid.remove(self.top);
        self.grid.insert(self.bottom, vec![' '; self.cols]);
    }

    fn line_feed(&mut self, out: &mut Vec<u8>) {
        if self.row == self.bottom {
            self.scroll_up(out);
        } else if self.row + 1 < self.rows {
            self.row += 1;
        }
    }

    fn put_char(&mut self, out: &mut Vec<u8>, ch: char) {
        if self.col >= self.cols {
            self.col = 0;
            self.line_feed(out);
        }
        self.grid[self.row][self.col] = ch;
        self.col += 1;
    }

    fn finish_pending_rune(&mut self, out: &mut Vec<u8>) {
        if !self.utf8_pending.is_empty() {
            self.utf8_pending.clear();
            self.put_char(out, '\u{fffd}');
        }
    }

    fn text_byte(&mut self, out: &mut Vec<u8>, byte: u8) {
        if byte >= 0x80 {
            self.utf8_pending.push(byte);
            match std::str::from_utf8(&self.utf8_pending) {
                Ok(s) => {
                    if let Some(ch) = s.chars().next() {
                        self.utf8_pending.clear();
                        self.put_char(out, ch);
                    }
                }
                Err(err) => {
                    if err.error_len().is_some() {
                        self.utf8_pending.clear();
                        self.put_char(out, '\u{fffd}');
                    }
                    // else: still a prefix of a valid rune, keep buffering
                }
            }
            return;
        }

        self.finish_pending_rune(out);
        match byte {
            ESC => self.parse = Parse::Escape,
            b'\n' => self.line_feed(out),
            b'\r' => self.col = 0,
            b'\t' => {
                let next = ((self.col / TAB_STOP) + 1) * TAB_STOP;
                self.col = next.min(self.cols.saturating_sub(1));
            }
            0x08 => self.col = self.col.saturating_sub(1),
            0x00..=0x1f | 0x7f => {}
            _ => self.put_char(out, byte as char),
        }
    }

    fn csi_dispatch(&mut self, params_raw: &[u8], final_byte: u8) {
        let params: Vec<usize> = params_raw
            .split(|&b| b == b';')
            .map(|p| {
                std::str::from_utf8(p).ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(0)
            })
            .collect();
        let p = |i: usize, default: usize| -> usize {
            match params.get(i) {
                Some(&0) | None => default,
                Some(&v) => v,
            }
        };

        match final_byte {
            b'A' => {
                let n = p(0, 1);
                let floor = if self.row >= self.top { self.top } else { 0 };
                self.row = self.row.saturating_sub(n).max(floor);
            }
            b'B' => {
                let n = p(0, 1);
                let ceil = if self.row <= self.bottom { self.bottom } else { self.rows - 1 };
                self.row = (self.row + n).min(ceil);
            }
            b'C' => self.col = (self.col + p(0, 1)).min(self.cols - 1),
            b'D' => self.col = self.col.saturating_sub(p(0, 1)),
            b'H' | b'f' => {
                self.row = p(0, 1).saturating_sub(1).min(self.rows - 1);
                self.col = p(1, 1).saturating_sub(1).min(self.cols - 1);
            }
            b'J' => {
                let mode = params.first().copied().unwrap_or(0);
                match mode {
                    0 => {
                        self.clear_line_range(self.row, self.col, self.cols);
                        for r in self.row + 1..self.rows {
                            self.clear_line_range(r, 0, self.cols);
                        }
                    }
                    1 => {
                        for r in 0..self.row {
                            self.clear_line_range(r, 0, self.cols);
                        }
                        self.clear_line_range(self.row, 0, self.col + 1);
                    }
                    _ => {
                        for r in 0..self.rows {
                            self.clear_line_range(r, 0, self.cols);
                        }
                    }
                }
            }
            b'K' => {
                let mode = params.first().copied().unwrap_or(0);
                match mode {
                    0 => self.clear_line_range(self.row, self.col, self.cols),
                    1 => self.clear_line_range(self.row, 0, (self.col + 1).min(self.cols)),
                    _ => self.clear_line_range(self.row, 0, self.cols),
                }
            }
            b'r' => {
                let new_top = p(0, 1).saturating_sub(1).min(self.rows - 1);
                let new_bottom = p(1, self.rows).saturating_sub(1).min(self.rows - 1);
                if new_top < new_bottom {
                    self.top = new_top;
                    self.bottom = new_bottom;
                    self.row = 0;
                    self.col = 0;
                }
            }
            b's' => self.saved = Some((self.row, self.col)),
            b'u' => {
                if let Some((row, col)) = self.saved {
                    self.row = row.min(self.rows - 1);
                    self.col = col.min(self.cols - 1);
                }
            }
            _ => {}
        }
    }

    fn clear_line_range(&mut self, row: usize, from: usize, to: usize) {
        for cell in &mut self.grid[row][from.min(self.cols)..to.min(self.cols)] {
            *cell = ' ';
        }
    }
}

impl OutputFilter for ScrollbackVtFilter {
    fn write(&mut self, data: &[u8]) -> Vec<u8> {
        self.stats.in_bytes += data.len() as u64;
        let mut out = Vec::new();

        for &byte in data {
            match std::mem::replace(&mut self.parse, Parse::Text) {
                Parse::Text => {
                    self.parse = Parse::Text;
                    self.text_byte(&mut out, byte);
                }
                Parse::Escape => match byte {
                    b'[' => self.parse = Parse::Csi(Vec::new()),
                    b']' => {
                        self.parse = Parse::StringSeq { bel_terminates: true, saw_esc: false }
                    }
                    b'P' | b'^' | b'_' => {
                        self.parse = Parse::StringSeq { bel_terminates: false, saw_esc: false }
                    }
                    b'7' => {
                        self.saved = Some((self.row, self.col));
                        self.parse = Parse::Text;
                    }
                    b'8' => {
                        if let Some((row, col)) = self.saved {
                            self.row = row.min(self.rows - 1);
                            self.col = col.min(self.cols - 1);
                        }
                        self.parse = Parse::Text;
                    }
                    _ => self.parse = Parse::Text,
                },
                Parse::Csi(mut buf) => {
                    if (0x40..=0x7e).contains(&byte) {
                        self.csi_dispatch(&buf, byte);
                        self.parse = Parse::Text;
                    } else if buf.len() < 64 {
                        buf.push(byte);
                        self.parse = Parse::Csi(buf);
                    } else {
                        // Runaway sequence: bail back to text.
                        self.parse = Parse::Text;
                    }
                }
                Parse::StringSeq { bel_terminates, saw_esc } => {
                    if (saw_esc && byte == b'\\') || (bel_terminates && byte == BEL) {
                        self.parse = Parse::Text;
                    } else {
                        self.parse =
                            Parse::StringSeq { bel_terminates, saw_esc: byte == ESC };
                    }
                }
            }
        }

        self.stats.out_bytes += out.len() as u64;
        out
    }

    fn flush(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        for row in self.top..=self.bottom {
            let line = self.trimmed_line(row);
            self.emit_line(&mut out, &line);
        }
        self.stats.out_bytes += out.len() as u64;
        out
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        self.reinit(cols as usize, rows as usize);
    }

    fn reset(&mut self) {
        let (cols, rows) = (self.cols, self.rows);
        self.reinit(cols, rows);
        self.stats = FilterStats::new(SCROLLBACK_VT);
    }

    fn stats(&self) -> FilterStats {
        self.stats.clone()
    }
}

#[cfg(test)]
#[path = "scrollback_tests.rs"]
mod tests;
