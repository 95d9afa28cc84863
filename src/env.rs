//! Runtime environment detection.
//!
//! `COURIER_ENV` selects how the binary persists credentials:
//!
//! - `test` - file-backed credential storage, never touches the OS keyring
//! - `development` or `dev` - keyring storage, verbose defaults
//! - (anything else or unset) - production

/// Runtime environment for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment - uses file storage instead of the keyring.
    Test,
}

impl Environment {
    /// Detect current environment from `COURIER_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(std::env::var("COURIER_ENV").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("test") => Self::Test,
            Some("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Returns `true` if the OS keyring should be bypassed in favor of a file.
#[must_use]
pub fn should_skip_keyring() -> bool {
    Environment::current().is_test()
}
