//! Optional TOML configuration, overridden by CLI flags at every layer.
//!
//! Precedence is CLI flag > config file > built-in default, the same
//! ordering `freddiehaddad-oxidized` uses for its own settings layer.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::comparator::Thresholds;
use crate::error::{Result, VerifyError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub thresholds: Thresholds,
    pub timeout_secs: u64,
    pub context_radius: usize,
    pub interpreter_path: Option<PathBuf>,
    pub install_root: Option<PathBuf>,
    pub keep_temp: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            timeout_secs: crate::toolchain::DEFAULT_TIMEOUT_SECS,
            context_radius: 8,
            interpreter_path: None,
            install_root: None,
            keep_temp: false,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(VerifyError::Io)?;
        toml::from_str(&text).map_err(|e| VerifyError::InternalInvariant(format!("bad config: {e}")))
    }

    /// Load `path` if it exists, otherwise fall back to built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            _ => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_builtin_thresholds() {
        let cfg = Config::default();
        assert_eq!(cfg.thresholds.avg_ratio, 0.97);
        assert_eq!(cfg.timeout_secs, 120);
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let cfg = Config::load_or_default(Some(Path::new("/nonexistent/pybc-verify.toml"))).unwrap();
        assert_eq!(cfg.context_radius, 8);
    }

    #[test]
    fn parses_partial_toml_with_serde_default() {
        let toml_text = "timeout_secs = 30\n";
        let cfg: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.timeout_secs, 30);
        assert_eq!(cfg.thresholds.avg_ratio, 0.97);
    }
}
