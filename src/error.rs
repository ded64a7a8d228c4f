use std::{path::PathBuf, time::Duration};
use thiserror::Error;
use tonic::{Code, Status};

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the core. Sample generation never produces one of
/// these; it falls back to an empty payload instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The schema file could not be read or compiled.
    #[error("Failed to load schema {}: {cause}", .path.display())]
    SchemaLoad { path: PathBuf, cause: String },
    /// The channel did not become ready before the deadline.
    #[error("Connection timeout: {endpoint} not ready within {}s: {cause}", .timeout.as_secs_f64())]
    Connection {
        endpoint: String,
        timeout: Duration,
        cause: String,
    },
    /// The call could not be built or the remote side rejected it.
    #[error("{message}")]
    Invocation { code: Option<Code>, message: String },
    /// Reading, writing or deleting a fixture file failed.
    #[error("Fixture {}: {cause}", .path.display())]
    FixtureIo {
        path: PathBuf,
        cause: std::io::Error,
    },
}

impl Error {
    pub fn invocation(message: impl Into<String>) -> Self {
        Error::Invocation {
            code: None,
            message: message.into(),
        }
    }

    pub fn fixture_io(path: impl Into<PathBuf>, cause: std::io::Error) -> Self {
        Error::FixtureIo {
            path: path.into(),
            cause,
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Invocation {
            code: Some(status.code()),
            message: format!("{:?}: {}", status.code(), status.message()),
        }
    }
}

/// Joins an error with every cause below it. Transport errors put the useful
/// part ("connection refused") a few levels down.
pub(crate) fn chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
