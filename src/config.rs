//! Runtime configuration.
//!
//! Values are read from the process environment:
//!
//! - `APP_ENV`: `dev` or `development` selects [`Environment::Development`],
//!   anything else (or unset) selects [`Environment::Production`]
//! - `BCRYPT_COST`: bcrypt cost factor used for password hashing (default 10)
//! - `DATABASE_URL`: connection string used by [`crate::CrudState::connect`]
//!
//! The environment decides whether internal error details reach API clients,
//! so it is stored process-wide by [`init`] and read by the error translator.

use std::sync::OnceLock;

/// Default bcrypt cost factor
pub const DEFAULT_BCRYPT_COST: u32 = 10;

static ENVIRONMENT: OnceLock<Environment> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Self::Development,
            _ => Self::Production,
        }
    }

    #[must_use]
    pub const fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }
}

#[derive(Debug, Clone)]
pub struct CrudConfig {
    pub environment: Environment,
    pub bcrypt_cost: u32,
}

impl Default for CrudConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }
}

impl CrudConfig {
    /// Build a configuration from `APP_ENV` and `BCRYPT_COST`.
    ///
    /// An unparsable `BCRYPT_COST` falls back to the default with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        let environment = std::env::var("APP_ENV")
            .map(|value| Environment::parse(&value))
            .unwrap_or_default();

        let bcrypt_cost = match std::env::var("BCRYPT_COST") {
            Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "Invalid BCRYPT_COST, using default");
                DEFAULT_BCRYPT_COST
            }),
            Err(_) => DEFAULT_BCRYPT_COST,
        };

        Self {
            environment,
            bcrypt_cost,
        }
    }
}

/// Record the process-wide environment. The first call wins.
pub fn init(config: &CrudConfig) {
    if ENVIRONMENT.set(config.environment).is_err() && environment() != config.environment {
        tracing::warn!(
            current = ?environment(),
            requested = ?config.environment,
            "Environment already initialised, keeping current value"
        );
    }
}

/// Environment used by the error translator, `Production` until [`init`] runs.
#[must_use]
pub fn environment() -> Environment {
    ENVIRONMENT.get().copied().unwrap_or_default()
}
