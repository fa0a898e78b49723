// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming output filters and the per-session chain.
//!
//! Filters are stateful transducers over the PTY byte stream. A chain pipes
//! each filter's output into the next; flush output is forwarded through the
//! rest of the chain so downstream state (e.g. the UTF-8 guard) still applies.

pub mod ansi;
pub mod codex;
pub mod scrollback;
pub mod utf8;

pub use ansi::AnsiStripFilter;
pub use codex::CodexTuiFilter;
pub use scrollback::ScrollbackVtFilter;
pub use utf8::Utf8GuardFilter;

use tracing::warn;

use crate::agent::{AgentProfile, SessionInterface};

/// Canonical filter names used in profiles and the environment override.
pub const ANSI_STRIP: &str = "ansi-strip";
pub const UTF8_GUARD: &str = "utf8-guard";
pub const SCROLLBACK_VT: &str = "scrollback-vt";
pub const CODEX_TUI: &str = "codex-tui";

/// Environment knobs controlling filter resolution.
pub const ENV_OUTPUT_FILTERS: &str = "GESTALT_TERMINAL_OUTPUT_FILTERS";
pub const ENV_OUTPUT_FILTERS_DISABLE: &str = "GESTALT_TERMINAL_OUTPUT_FILTERS_DISABLE";

/// Byte counters every filter maintains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterStats {
    pub filter_name: &'static str,
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub dropped_bytes: u64,
}

impl FilterStats {
    pub fn new(filter_name: &'static str) -> Self {
        Self { filter_name, in_bytes: 0, out_bytes: 0, dropped_bytes: 0 }
    }
}

/// A stateful streaming transducer over output bytes.
pub trait OutputFilter: Send {
    fn write(&mut self, data: &[u8]) -> Vec<u8>;
    fn flush(&mut self) -> Vec<u8>;
    fn resize(&mut self, cols: u16, rows: u16);
    fn reset(&mut self);
    fn stats(&self) -> FilterStats;
}

/// Ordered pipeline of filters.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn OutputFilter>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Box<dyn OutputFilter>>) -> Self {
        Self { filters }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run a chunk through every filter in order. Empty intermediate output
    /// short-circuits the rest of the chain.
    pub fn write(&mut self, data: &[u8]) -> Vec<u8> {
        if self.filters.is_empty() {
            return data.to_vec();
        }
        let mut current = data.to_vec();
        for filter in &mut self.filters {
            if current.is_empty() {
                return current;
            }
            current = filter.write(&current);
        }
        current
    }

    /// Flush each filter, forwarding its flushed segment through the filters
    /// after it.
    pub fn flush(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        for i in 0..self.filters.len() {
            let mut segment = self.filters[i].flush();
            for later in &mut self.filters[i + 1..] {
                if segment.is_empty() {
                    break;
                }
                segment = later.write(&segment);
            }
            out.extend_from_slice(&segment);
        }
        out
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        for filter in &mut self.filters {
            filter.resize(cols, rows);
        }
    }

    pub fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
    }

    pub fn stats(&self) -> Vec<FilterStats> {
        self.filters.iter().map(|f| f.stats()).collect()
    }
}

/// Environment overrides, captured once at resolution time so tests can
/// inject values without touching the process environment.
#[derive(Debug, Clone, Default)]
pub struct FilterEnv {
    pub disable: bool,
    pub filters: Option<String>,
}

impl FilterEnv {
    /// Read the `GESTALT_TERMINAL_OUTPUT_FILTERS*` knobs.
    pub fn from_process() -> Self {
        let disable = std::env::var(ENV_OUTPUT_FILTERS_DISABLE)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let filters = std::env::var(ENV_OUTPUT_FILTERS).ok().filter(|v| !v.trim().is_empty());
        Self { disable, filters }
    }
}

/// Decide which filters a session gets, in order of precedence: disable knob,
/// environment list, profile list, profile single, interface, CLI type.
pub fn resolve_filter_names(
    profile: Option<&AgentProfile>,
    interface: SessionInterface,
    env: &FilterEnv,
) -> Vec<String> {
    if env.disable {
        return vec![];
    }
    if let Some(list) = &env.filters {
        return split_names(list);
    }
    if let Some(profile) = profile {
        if !profile.output_filters.is_empty() {
            return profile.output_filters.clone();
        }
        if let Some(single) = &profile.output_filter {
            return vec![single.clone()];
        }
    }
    if interface != SessionInterface::Cli {
        return vec![];
    }
    if profile.is_some_and(|p| p.is_cli_type("codex")) {
        return vec![SCROLLBACK_VT.to_owned(), ANSI_STRIP.to_owned(), UTF8_GUARD.to_owned()];
    }
    vec![ANSI_STRIP.to_owned(), UTF8_GUARD.to_owned()]
}

fn split_names(list: &str) -> Vec<String> {
    list.split(',').map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()).collect()
}

/// Instantiate a chain from resolved names. Unknown names are skipped with a
/// warning so one bad profile entry cannot kill the stream.
pub fn build_chain(names: &[String], cols: u16, rows: u16) -> FilterChain {
    let mut filters: Vec<Box<dyn OutputFilter>> = Vec::new();
    for name in names {
        match name.to_ascii_lowercase().as_str() {
            ANSI_STRIP => filters.push(Box::new(AnsiStripFilter::new())),
            UTF8_GUARD => filters.push(Box::new(Utf8GuardFilter::new())),
            SCROLLBACK_VT => filters.push(Box::new(ScrollbackVtFilter::new(cols, rows))),
            CODEX_TUI => filters.push(Box::new(CodexTuiFilter::new())),
            other => warn!(filter = other, "unknown output filter, skipping"),
        }
    }
    FilterChain::new(filters)
}

#[cfg(test)]
#[path = "chain_tests.rs"]
mod tests;
