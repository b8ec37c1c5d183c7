//! Command-line argument parsing.
//!
//! Usage:
//!   httpscript [OPTIONS] <SCRIPT>...
//!   httpscript --demo [OPTIONS] [<SCRIPT>...]
//!   httpscript --list

use std::path::PathBuf;

use clap::Parser;

use crate::config::{default_config_path, Config, ConfigError};

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "httpscript",
    version,
    about = "Run Lua scripts against an HTTP client and print their results as JSON"
)]
pub struct Cli {
    /// Scripts to run (names resolved by the loader, `.lua` optional).
    pub scripts: Vec<String>,

    /// Directory scripts are loaded from.
    #[arg(short = 'd', long = "scripts", value_name = "DIR")]
    pub script_dir: Option<PathBuf>,

    /// Use the demo scripts and routes built into the binary.
    #[arg(long)]
    pub demo: bool,

    /// List the built-in demo scripts and exit.
    #[arg(long)]
    pub list: bool,

    /// Base URL the client resolves script paths against.
    #[arg(short = 'u', long, value_name = "URL", conflicts_with = "mock")]
    pub base_url: Option<String>,

    /// JSON route table served by the mock client instead of the network.
    #[arg(short = 'm', long, value_name = "FILE")]
    pub mock: Option<PathBuf>,

    /// Per-script deadline in milliseconds.
    #[arg(short = 't', long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Number of script worker threads.
    #[arg(short = 'j', long, value_name = "N")]
    pub workers: Option<usize>,

    /// Config file (default: the per-user config, if present).
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Pretty-print result JSON.
    #[arg(long)]
    pub pretty: bool,
}

/// Which config file to read.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigFile {
    /// `--config <file>`: must exist.
    Explicit(PathBuf),
    /// The per-user default, read only if it exists.
    Default(PathBuf),
    /// No config file.
    Skip,
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse a slice of argument strings, without the program name (exposed for
/// testing).
pub fn parse_argv(argv: &[String]) -> Result<Cli, clap::Error> {
    Cli::try_parse_from(std::iter::once("httpscript".to_owned()).chain(argv.iter().cloned()))
}

impl Cli {
    /// Check combinations clap cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.list {
            return Ok(());
        }
        if self.scripts.is_empty() && !self.demo {
            return Err("no scripts given (pass script names, or --demo)".to_owned());
        }
        Ok(())
    }

    pub fn config_file(&self) -> ConfigFile {
        match (&self.config, default_config_path()) {
            (Some(path), _) => ConfigFile::Explicit(path.clone()),
            (None, Some(path)) if path.exists() => ConfigFile::Default(path),
            _ => ConfigFile::Skip,
        }
    }

    /// Override `config` with whatever was given on the command line.
    pub fn apply_to(&self, config: &mut Config) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        {
            let mut set = |key: &str, value: String| {
                if let Err(message) = config.set(key, &value) {
                    errors.push(ConfigError::Flag {
                        flag: format!("--{}", key.replace('_', "-")),
                        message,
                    });
                }
            };
            if let Some(ms) = self.timeout_ms {
                set("timeout_ms", ms.to_string());
            }
            if let Some(n) = self.workers {
                set("workers", n.to_string());
            }
            if let Some(dir) = &self.script_dir {
                set("scripts", dir.display().to_string());
            }
            if let Some(url) = &self.base_url {
                set("base_url", url.clone());
            }
            if let Some(mock) = &self.mock {
                set("mock", mock.display().to_string());
            }
        }
        // a transport chosen on the command line replaces the configured one
        if self.base_url.is_some() {
            config.mock_routes = None;
        }
        if self.mock.is_some() {
            config.base_url = None;
        }
        errors
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|&s| s.to_owned()).collect()
    }

    #[test]
    fn scripts_positional() {
        let a = parse_argv(&argv(&["one", "two.lua"])).unwrap();
        assert_eq!(a.scripts, vec!["one", "two.lua"]);
        assert!(a.validate().is_ok());
    }

    #[test]
    fn no_scripts_needs_demo_or_list() {
        assert!(parse_argv(&argv(&[])).unwrap().validate().is_err());
        assert!(parse_argv(&argv(&["--demo"])).unwrap().validate().is_ok());
        assert!(parse_argv(&argv(&["--list"])).unwrap().validate().is_ok());
    }

    #[test]
    fn short_flags() {
        let a = parse_argv(&argv(&["-d", "dir", "-t", "250", "-j", "4", "-u", "http://h", "s"]))
            .unwrap();
        assert_eq!(a.script_dir, Some(PathBuf::from("dir")));
        assert_eq!(a.timeout_ms, Some(250));
        assert_eq!(a.workers, Some(4));
        assert_eq!(a.base_url.as_deref(), Some("http://h"));
    }

    #[test]
    fn base_url_conflicts_with_mock() {
        assert!(parse_argv(&argv(&["--base-url", "http://h", "--mock", "r.json", "s"])).is_err());
    }

    #[test]
    fn explicit_config_file() {
        let a = parse_argv(&argv(&["-c", "my.conf", "s"])).unwrap();
        assert_eq!(a.config_file(), ConfigFile::Explicit(PathBuf::from("my.conf")));
    }

    #[test]
    fn cli_overrides_config() {
        let (mut c, _) = Config::load_str("workers = 2\nbase_url = http://file\n");
        let a = parse_argv(&argv(&["-j", "7", "-t", "900", "-m", "routes.json", "s"])).unwrap();
        let errs = a.apply_to(&mut c);
        assert!(errs.is_empty());
        assert_eq!(c.workers, 7);
        assert_eq!(c.eval.timeout, Duration::from_millis(900));
        assert_eq!(c.mock_routes, Some(PathBuf::from("routes.json")));
        assert!(c.base_url.is_none());
    }

    #[test]
    fn cli_invalid_values_reported() {
        let mut c = Config::new();
        let a = parse_argv(&argv(&["-j", "0", "s"])).unwrap();
        let errs = a.apply_to(&mut c);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].to_string().starts_with("--workers:"));
    }
}
