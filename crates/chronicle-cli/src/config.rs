//! Runtime configuration from environment variables.

use crate::error::AppError;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_LOCK_STRIPES: usize = 64;

/// Settings for one CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// PostgreSQL connection string (`DATABASE_URL`).
    pub database_url: String,
    /// Pool size (`DATABASE_MAX_CONNECTIONS`).
    pub max_connections: u32,
    /// Per-aggregate lock stripes (`LOCK_STRIPES`).
    pub lock_stripes: usize,
    /// Whether the snapshot cache is enabled (`SNAPSHOT_CACHE`).
    pub snapshot_cache: bool,
}

impl Config {
    /// Reads the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` is missing or a value
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.is_empty())
            .ok_or_else(|| AppError::Config("DATABASE_URL environment variable must be set".into()))?;

        let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw.parse().map_err(|e| {
                AppError::Config(format!("DATABASE_MAX_CONNECTIONS must be a valid u32: {e}"))
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let lock_stripes = match lookup("LOCK_STRIPES") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(0) => return Err(AppError::Config("LOCK_STRIPES must be positive".into())),
                Ok(stripes) => stripes,
                Err(e) => {
                    return Err(AppError::Config(format!(
                        "LOCK_STRIPES must be a valid usize: {e}"
                    )));
                }
            },
            None => DEFAULT_LOCK_STRIPES,
        };

        let snapshot_cache = match lookup("SNAPSHOT_CACHE").as_deref() {
            None | Some("on" | "true" | "1") => true,
            Some("off" | "false" | "0") => false,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "SNAPSHOT_CACHE must be on or off, got {other}"
                )));
            }
        };

        Ok(Self {
            database_url,
            max_connections,
            lock_stripes,
            snapshot_cache,
        })
    }
}
