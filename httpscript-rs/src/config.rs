//! Evaluation limits and the `httpscript` configuration file.
//!
//! The file is a flat list of `key = value` settings:
//!
//! | Key                          | Meaning                                  |
//! |------------------------------|------------------------------------------|
//! | `timeout_ms`                 | per-run deadline in milliseconds         |
//! | `memory_limit`               | interpreter memory cap in bytes (0 = off)|
//! | `instruction_check_interval` | VM instructions between deadline checks  |
//! | `workers`                    | script pool size                         |
//! | `scripts`                    | directory scripts are loaded from        |
//! | `base_url`                   | base URL for the HTTP client             |
//! | `mock`                       | JSON route table for the mock client     |
//! | Lines starting with `#`/`;`  | comment, ignored                         |
//!
//! Every key can also be set from the environment as `HTTPSCRIPT_<KEY>`
//! (upper-cased), which takes precedence over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "HTTPSCRIPT_";

// ── EvalConfig ────────────────────────────────────────────────────────────────

/// Limits applied to a single script run.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Wall-clock deadline for the whole run, awaiting included.
    pub timeout: Duration,
    /// Maximum interpreter memory in bytes.
    pub memory_limit: Option<usize>,
    /// Number of VM instructions between deadline checks.
    pub instruction_check_interval: u32,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            memory_limit: Some(64 * 1024 * 1024),
            instruction_check_interval: 10_000,
        }
    }
}

// ── ConfigError ───────────────────────────────────────────────────────────────

/// A non-fatal error encountered while reading settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("line {line}: {message}")]
    Line { line: usize, message: String },
    #[error("{var}: {message}")]
    Env { var: String, message: String },
    #[error("{flag}: {message}")]
    Flag { flag: String, message: String },
}

// ── Config ────────────────────────────────────────────────────────────────────

/// Resolved settings for the harness and the binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub eval: EvalConfig,
    pub workers: usize,
    pub script_dir: Option<PathBuf>,
    pub base_url: Option<String>,
    pub mock_routes: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            eval: EvalConfig::default(),
            workers: std::thread::available_parallelism().map_or(1, |n| n.get()),
            script_dir: None,
            base_url: None,
            mock_routes: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string on top of the defaults.
    ///
    /// Bad lines are reported and skipped; the rest still apply.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let errors = config.apply_str(s);
        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Apply settings from a config string to `self`.
    pub fn apply_str(&mut self, s: &str) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        for (i, raw) in s.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let result = match line.split_once('=') {
                Some((key, value)) => self.set(key.trim(), unquote(value.trim())),
                None => Err(format!("expected `key = value`, got '{line}'")),
            };
            if let Err(message) = result {
                errors.push(ConfigError::Line { line: i + 1, message });
            }
        }
        errors
    }

    /// Apply `HTTPSCRIPT_*` overrides from `vars` (normally `std::env::vars()`).
    pub fn apply_env<I>(&mut self, vars: I) -> Vec<ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut errors = Vec::new();
        for (var, value) in vars {
            let Some(key) = var.strip_prefix(ENV_PREFIX) else { continue };
            let key = key.to_ascii_lowercase();
            if let Err(message) = self.set(&key, &value) {
                errors.push(ConfigError::Env { var, message });
            }
        }
        errors
    }

    /// Set a single key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "timeout_ms" => {
                let ms = parse_num::<u64>(key, value)?;
                if ms == 0 {
                    return Err("timeout_ms must be greater than 0".to_owned());
                }
                self.eval.timeout = Duration::from_millis(ms);
            }
            "memory_limit" => {
                let bytes = parse_num::<usize>(key, value)?;
                self.eval.memory_limit = (bytes > 0).then_some(bytes);
            }
            "instruction_check_interval" => {
                let n = parse_num::<u32>(key, value)?;
                if n == 0 {
                    return Err("instruction_check_interval must be greater than 0".to_owned());
                }
                self.eval.instruction_check_interval = n;
            }
            "workers" => {
                let n = parse_num::<usize>(key, value)?;
                if n == 0 {
                    return Err("workers must be greater than 0".to_owned());
                }
                self.workers = n;
            }
            "scripts" => self.script_dir = non_empty(value).map(PathBuf::from),
            "base_url" => self.base_url = non_empty(value).map(str::to_owned),
            "mock" => self.mock_routes = non_empty(value).map(PathBuf::from),
            _ => return Err(format!("unknown setting '{key}'")),
        }
        Ok(())
    }
}

/// Default config file location (`~/.config/httpscript/config` on Linux).
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "httpscript").map(|d| d.config_dir().join("config"))
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("invalid value for {key}: '{value}'"))
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

/// Strip one pair of matching double quotes.
fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .unwrap_or(s)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
