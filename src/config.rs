use anyhow::{bail, Context, Result};
use std::{env, path::PathBuf, time::Duration};

pub const WORKSPACE_ENV: &str = "GRPC_TESTER_WORKSPACE";
pub const TIMEOUT_ENV: &str = "GRPC_TESTER_TIMEOUT";
pub const FIXTURE_DIR: &str = ".grpc-tests";
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub workspace: PathBuf,
    pub timeout: Duration,
}

impl Config {
    /// Flags win over the environment, which wins over the defaults.
    pub fn resolve(workspace: Option<String>, timeout: Option<String>) -> Result<Self> {
        Self::from_sources(
            workspace.or_else(|| env::var(WORKSPACE_ENV).ok()),
            timeout.or_else(|| env::var(TIMEOUT_ENV).ok()),
        )
    }

    pub fn from_sources(workspace: Option<String>, timeout: Option<String>) -> Result<Self> {
        let workspace = match workspace.filter(|w| !w.trim().is_empty()) {
            Some(w) => PathBuf::from(w),
            None => env::current_dir().with_context(|| "Failed to read current directory.")?,
        };
        if !workspace.is_dir() {
            bail!("Open a workspace to save tests: {:?} is not a directory", workspace);
        }
        let secs = match timeout.filter(|t| !t.trim().is_empty()) {
            Some(t) => t
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid timeout: {}", t))?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        if secs == 0 {
            bail!("Timeout must be at least one second.")
        }
        Ok(Self {
            workspace,
            timeout: Duration::from_secs(secs),
        })
    }

    pub fn fixture_dir(&self) -> PathBuf {
        self.workspace.join(FIXTURE_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_five_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            Config::from_sources(Some(dir.path().to_string_lossy().into_owned()), None).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.fixture_dir(), dir.path().join(".grpc-tests"));
    }

    #[test]
    fn rejects_bad_timeouts_and_missing_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Some(dir.path().to_string_lossy().into_owned());
        assert!(Config::from_sources(ws.clone(), Some("0".into())).is_err());
        assert!(Config::from_sources(ws.clone(), Some("-3".into())).is_err());
        assert!(Config::from_sources(ws.clone(), Some("soon".into())).is_err());
        assert_eq!(
            Config::from_sources(ws, Some(" 12 ".into())).unwrap().timeout,
            Duration::from_secs(12)
        );
        let missing = dir.path().join("nope").to_string_lossy().into_owned();
        assert!(Config::from_sources(Some(missing), None).is_err());
    }
}
