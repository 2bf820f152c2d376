//! Interpreter discovery and sandboxed recompilation of candidate sources.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{Result, VerifyError};
use crate::version::PyVersion;

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Locates an interpreter matching an artifact's `(major, minor)`.
///
/// Search order:
/// 1. an explicit path supplied by the caller or config;
/// 2. `python{major}.{minor}` resolved on `PATH`;
/// 3. the newest matching patch under a per-user install root
///    (`~/.local/share/uv/python/cpython-{major}.{minor}.*`);
/// 4. fall back to the current interpreter, flagging `VersionMismatch`.
pub struct InterpreterLocator {
    pub explicit_path: Option<PathBuf>,
    pub install_root: Option<PathBuf>,
}

impl Default for InterpreterLocator {
    fn default() -> Self {
        Self {
            explicit_path: None,
            install_root: dirs_uv_python_root(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedInterpreter {
    pub path: PathBuf,
    pub version_mismatch: bool,
}

fn dirs_uv_python_root() -> Option<PathBuf> {
    let home = env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".local/share/uv/python"))
}

impl InterpreterLocator {
    pub fn resolve(&self, version: PyVersion) -> Result<ResolvedInterpreter> {
        if let Some(p) = &self.explicit_path {
            return Ok(ResolvedInterpreter {
                path: p.clone(),
                version_mismatch: false,
            });
        }

        let name = format!("python{}.{}", version.major, version.minor);
        if let Some(on_path) = which(&name) {
            return Ok(ResolvedInterpreter {
                path: on_path,
                version_mismatch: false,
            });
        }

        if let Some(found) = self.newest_patch_under_install_root(version) {
            return Ok(ResolvedInterpreter {
                path: found,
                version_mismatch: false,
            });
        }

        Err(VerifyError::ToolNotFound(format!(
            "no interpreter for CPython {version}; falling back requires an explicit override"
        )))
    }

    /// As `resolve`, but never fails: falls back to the current
    /// interpreter and flags the mismatch instead of erroring.
    pub fn resolve_or_current(&self, version: PyVersion) -> ResolvedInterpreter {
        match self.resolve(version) {
            Ok(r) => r,
            Err(_) => ResolvedInterpreter {
                path: PathBuf::from(env::var("PYBC_VERIFY_PYTHON").unwrap_or_else(|_| "python3".to_string())),
                version_mismatch: true,
            },
        }
    }

    fn newest_patch_under_install_root(&self, version: PyVersion) -> Option<PathBuf> {
        let root = self.install_root.as_ref()?;
        let prefix = format!("cpython-{}.{}.", version.major, version.minor);
        let mut candidates: Vec<(u64, PathBuf)> = Vec::new();
        let entries = std::fs::read_dir(root).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(rest) = name.strip_prefix(&prefix) {
                let patch: u64 = rest.split(['-', '+']).next().and_then(|s| s.parse().ok()).unwrap_or(0);
                let bin = entry.path().join("bin").join(format!("python{}.{}", version.major, version.minor));
                if bin.exists() {
                    candidates.push((patch, bin));
                }
            }
        }
        candidates.sort_by_key(|(patch, _)| *patch);
        candidates.pop().map(|(_, p)| p)
    }
}

fn which(name: &str) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    for dir in env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

pub struct ToolchainAdapter {
    pub locator: InterpreterLocator,
    pub timeout: Duration,
}

impl Default for ToolchainAdapter {
    fn default() -> Self {
        Self {
            locator: InterpreterLocator::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ToolchainAdapter {
    /// Compile `source` to `dest`, preserving `debug_filename` as the
    /// compiled artifact's embedded filename so nested code-object reprs
    /// match the original's shape byte-for-byte.
    pub async fn compile_source(
        &self,
        interpreter: &Path,
        source: &str,
        dest: &Path,
        debug_filename: &str,
    ) -> Result<()> {
        let program = format!(
            "import py_compile, sys\npy_compile.compile(sys.argv[1], cfile=sys.argv[2], dfile=sys.argv[3], doraise=True)\n"
        );

        let src_path = dest.with_extension("src.py");
        tokio::fs::write(&src_path, source)
            .await
            .map_err(VerifyError::Io)?;

        let mut cmd = Command::new(interpreter);
        cmd.arg("-c")
            .arg(&program)
            .arg(&src_path)
            .arg(dest)
            .arg(debug_filename)
            .kill_on_drop(true);

        let run = async {
            let output = cmd.output().await.map_err(VerifyError::Io)?;
            if !output.status.success() {
                return Err(VerifyError::ToolFailure(
                    String::from_utf8_lossy(&output.stderr).to_string(),
                ));
            }
            Ok(())
        };

        match timeout(self.timeout, run).await {
            Ok(res) => res,
            Err(_) => Err(VerifyError::ToolTimeout(self.timeout.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins_over_everything() {
        let locator = InterpreterLocator {
            explicit_path: Some(PathBuf::from("/opt/py/bin/python3.11")),
            install_root: None,
        };
        let resolved = locator.resolve(PyVersion::new(3, 11)).unwrap();
        assert_eq!(resolved.path, PathBuf::from("/opt/py/bin/python3.11"));
        assert!(!resolved.version_mismatch);
    }

    #[test]
    fn missing_interpreter_falls_back_and_flags_mismatch() {
        let locator = InterpreterLocator {
            explicit_path: None,
            install_root: Some(PathBuf::from("/nonexistent/does/not/exist")),
        };
        let resolved = locator.resolve_or_current(PyVersion::new(3, 99));
        assert!(resolved.version_mismatch);
    }
}
