use std::{env, str::FromStr};

use crate::image::DEFAULT_MAX_SCAN_PAGES;

pub const ENV_MAX_SCAN_PAGES: &str = "MALLOCPROBE_MAX_SCAN_PAGES";
pub const ENV_FORMAT: &str = "MALLOCPROBE_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// `{"libc_version": 2.31,"main_arena_offset": 0x1ebb80,"tcache_enable": true}`
    #[default]
    Compact,
    /// Strict JSON with the version and offset as strings.
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(OutputFormat::Compact),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// How many pages below the anchor the image scan may look.
    pub max_scan_pages: usize,
    pub format: OutputFormat,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_scan_pages: DEFAULT_MAX_SCAN_PAGES,
            format: OutputFormat::default(),
        }
    }
}

impl ProbeConfig {
    /// Defaults, overridden by `MALLOCPROBE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`ProbeConfig::from_env`], reading variables through `lookup`.
    /// Unparseable values keep the default and are reported with `warn!`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_MAX_SCAN_PAGES) {
            match raw.trim().parse::<usize>() {
                Ok(pages) if pages > 0 => config.max_scan_pages = pages,
                _ => log::warn!("ignoring {ENV_MAX_SCAN_PAGES}={raw:?}, expected a positive integer"),
            }
        }
        if let Some(raw) = lookup(ENV_FORMAT) {
            match raw.parse() {
                Ok(format) => config.format = format,
                Err(err) => log::warn!("ignoring {ENV_FORMAT}: {err}"),
            }
        }
        config
    }
}
