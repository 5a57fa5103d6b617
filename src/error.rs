//! Run errors and process exit codes.

use crate::config::ConfigError;
use std::fmt;
use sync_sql::{BackendError, ConnectionError};

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to connect to the {role} database: {source}")]
    Connect {
        role: &'static str,
        #[source]
        source: ConnectionError,
    },

    #[error("Failed to read template '{template}' from the {role} database: {source}")]
    Read {
        template: String,
        role: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Internal error: {0}")]
    Invariant(String),
}

impl From<BackendError> for SyncError {
    fn from(e: BackendError) -> Self {
        Self::Invariant(e.to_string())
    }
}

impl SyncError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) => ExitCode::Config,
            Self::Connect { .. } | Self::Read { .. } => ExitCode::Backend,
            Self::Invariant(_) => ExitCode::Internal,
        }
    }
}

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Internal = 1,
    Config = 2,
    Backend = 3,
}

impl ExitCode {
    pub const ALL: [ExitCode; 4] = [Self::Success, Self::Internal, Self::Config, Self::Backend];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Success => "run completed",
            Self::Internal => "internal error, an invariant was violated",
            Self::Config => "configuration could not be loaded or validated",
            Self::Backend => "a database could not be reached or read",
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>3}  {}", self.code(), self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let read = SyncError::Read {
            template: "servers".into(),
            role: "source",
            source: BackendError::Invariant("x".into()),
        };
        assert_eq!(read.exit_code(), ExitCode::Backend);
        assert_eq!(
            SyncError::Config(ConfigError::Invalid("bad".into())).exit_code(),
            ExitCode::Config
        );
        let invariant: SyncError = BackendError::Invariant("two value entries".into()).into();
        assert_eq!(invariant.exit_code().code(), 1);
    }

    #[test]
    fn test_exit_code_listing() {
        let listing: Vec<String> = ExitCode::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(listing[0], "  0  run completed");
        assert!(listing[3].starts_with("  3"));
    }
}
