//! Configuration file reader.
//!
//! One directive per line, whitespace-tokenised, `#` starts a comment
//! line. Directives the daemon does not recognise are offered to the
//! scoring modules by name (`<module> k <float>` sets a multiplier,
//! anything else reaches the module's `configure`); directives nobody
//! claims are ignored — that is deliberate, so one file can configure
//! modules the running binary does not carry.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

/// Default statistics retention, days.
pub const DEFAULT_KEEP_STAT: u32 = 365;

/// Default kernel-queue capacity.
pub const DEFAULT_NFQLEN: u32 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't open config file '{path}': {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("'packets' (shaping buffer capacity) is not set")]
    PacketsNotSet,
}

/// A directive addressed to a scoring module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDirective {
    pub module: String,
    pub p1: String,
    pub p2: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// NFQUEUE queue id.
    pub queue: u16,
    /// Release budget in bytes/sec; 0 blocks everything, `u64::MAX`
    /// disables shaping.
    pub limit: u64,
    /// Shaping buffer capacity (slots).
    pub packets: usize,
    /// Kernel-side queue capacity.
    pub nfqlen: u32,
    /// Enable per-second statistics.
    pub stat: bool,
    /// Directory for statistics day files.
    pub statdir: PathBuf,
    /// Statistics retention in days.
    pub keep_stat: u32,
    /// Enable per-module weight series.
    pub wchart: bool,
    /// Directives forwarded to the module chain, in file order.
    pub module_directives: Vec<ModuleDirective>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let mut config = Config {
            queue: 0,
            limit: 0,
            packets: 0,
            nfqlen: 0,
            stat: false,
            statdir: PathBuf::new(),
            keep_stat: 0,
            wchart: false,
            module_directives: Vec::new(),
        };

        for line in text.lines() {
            let mut tokens = line.split_whitespace();
            let (Some(cmd), Some(p1)) = (tokens.next(), tokens.next()) else {
                continue;
            };
            if cmd.starts_with('#') {
                continue;
            }
            let p2 = tokens.next().unwrap_or("");

            match cmd {
                "queue" => config.queue = p1.parse().unwrap_or(0),
                "limit" => {
                    config.limit = if p1 == "no" { u64::MAX } else { parse_rate(p1) };
                }
                "packets" => config.packets = p1.parse().unwrap_or(0),
                "nfqlen" => {
                    config.nfqlen = p1.parse().unwrap_or(0);
                    if config.nfqlen == 0 {
                        warn!(value = p1, fallback = DEFAULT_NFQLEN, "strange 'nfqlen' value");
                    }
                }
                "stat" => config.stat = p1 == "yes",
                "statdir" => config.statdir = PathBuf::from(p1),
                "keepstat" => {
                    config.keep_stat = p1.parse().unwrap_or(0);
                    if config.keep_stat == 0 {
                        warn!(value = p1, fallback = DEFAULT_KEEP_STAT, "strange 'keepstat' value");
                    }
                }
                "wchart" => config.wchart = p1 == "yes",
                module => config.module_directives.push(ModuleDirective {
                    module: module.to_string(),
                    p1: p1.to_string(),
                    p2: p2.to_string(),
                }),
            }
        }

        if config.packets == 0 {
            return Err(ConfigError::PacketsNotSet);
        }
        if config.nfqlen == 0 {
            config.nfqlen = DEFAULT_NFQLEN;
        }
        if config.keep_stat == 0 {
            config.keep_stat = DEFAULT_KEEP_STAT;
        }

        Ok(config)
    }
}

/// Parse a rate given in bits/sec with optional decimal `k`/`m`/`g`
/// suffix, returning bytes/sec. Garbage parses to 0, which the caller
/// treats as "block everything" (with a warning, not an abort).
pub fn parse_rate(s: &str) -> u64 {
    if s.is_empty() {
        return 0;
    }

    let last = s.chars().last().unwrap_or('0');
    let (digits, mult): (&str, u64) = if last.is_ascii_digit() {
        (s, 1)
    } else {
        let head = &s[..s.len() - last.len_utf8()];
        match last.to_ascii_lowercase() {
            'k' => (head, 1000),
            'm' => (head, 1000 * 1000),
            'g' => (head, 1000 * 1000 * 1000),
            _ => (head, 0),
        }
    };

    let bits: u64 = digits.parse().unwrap_or(0);
    bits.saturating_mul(mult) / 8
}
