use std::time::Duration;

use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields except the JWT secret have defaults suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// JWT token configuration.
    pub jwt: JwtConfig,
    /// PostgreSQL URL. `None` runs with the in-memory store and ledger.
    pub database_url: Option<String>,
    /// Out-of-process worker service. `None` runs workers in-process.
    pub worker_url: Option<String>,
    /// Generation backend base URL for in-process workers.
    pub backend_url: String,
    /// Per-step backend timeout in seconds (default: `120`).
    pub backend_timeout_secs: u64,
    /// Jobs still active after this many seconds are failed and refunded
    /// by the reconciliation sweep (default: `900`).
    pub job_max_duration_secs: u64,
    /// Interval between reconciliation sweeps in seconds (default: `60`).
    pub sweep_interval_secs: u64,
    /// Finished jobs are purged after this many hours (default: `24`).
    pub job_retention_hours: u64,
    /// Interval between WebSocket pings in seconds (default: `30`).
    pub ws_heartbeat_secs: u64,
    /// Credits granted to unseen users in in-memory mode (default: `0`).
    pub starting_balance: i64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                    |
    /// |-------------------------|----------------------------|
    /// | `HOST`                  | `0.0.0.0`                  |
    /// | `PORT`                  | `3000`                     |
    /// | `CORS_ORIGINS`          | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                       |
    /// | `DATABASE_URL`          | -- (in-memory mode)        |
    /// | `WORKER_URL`            | -- (in-process worker)     |
    /// | `BACKEND_URL`           | `http://localhost:8188`    |
    /// | `BACKEND_TIMEOUT_SECS`  | `120`                      |
    /// | `JOB_MAX_DURATION_SECS` | `900`                      |
    /// | `SWEEP_INTERVAL_SECS`   | `60`                       |
    /// | `JOB_RETENTION_HOURS`   | `24`                       |
    /// | `WS_HEARTBEAT_SECS`     | `30`                       |
    /// | `STARTING_BALANCE`      | `0`                        |
    ///
    /// # Panics
    ///
    /// On a malformed value, or a zero `BACKEND_TIMEOUT_SECS`,
    /// `JOB_MAX_DURATION_SECS`, `SWEEP_INTERVAL_SECS` or `WS_HEARTBEAT_SECS`.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let backend_url =
            std::env::var("BACKEND_URL").unwrap_or_else(|_| "http://localhost:8188".into());

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 30),
            jwt: JwtConfig::from_env(),
            database_url: non_empty_var("DATABASE_URL"),
            worker_url: non_empty_var("WORKER_URL"),
            backend_url,
            backend_timeout_secs: nonzero_env_or("BACKEND_TIMEOUT_SECS", 120),
            job_max_duration_secs: nonzero_env_or("JOB_MAX_DURATION_SECS", 900),
            sweep_interval_secs: nonzero_env_or("SWEEP_INTERVAL_SECS", 60),
            job_retention_hours: env_or("JOB_RETENTION_HOURS", 24),
            ws_heartbeat_secs: nonzero_env_or("WS_HEARTBEAT_SECS", 30),
            starting_balance: env_or("STARTING_BALANCE", 0),
        }
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn job_max_duration(&self) -> Duration {
        Duration::from_secs(self.job_max_duration_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_hours * 3600)
    }

    pub fn ws_heartbeat(&self) -> Duration {
        Duration::from_secs(self.ws_heartbeat_secs)
    }
}

/// Parse `name` or fall back to `default`. Panics on a malformed value.
fn env_or<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be a valid {}: {e}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}

/// Like [`env_or`] for durations that drive `tokio::time::interval` or a
/// timeout, where zero would panic inside a detached task or fail every
/// call.
fn nonzero_env_or(name: &str, default: u64) -> u64 {
    require_nonzero(name, env_or(name, default))
}

fn require_nonzero(name: &str, value: u64) -> u64 {
    assert!(value > 0, "{name} must be greater than zero");
    value
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_interval_is_kept() {
        assert_eq!(require_nonzero("SWEEP_INTERVAL_SECS", 60), 60);
    }

    #[test]
    #[should_panic(expected = "SWEEP_INTERVAL_SECS must be greater than zero")]
    fn zero_interval_is_rejected_at_startup() {
        require_nonzero("SWEEP_INTERVAL_SECS", 0);
    }

    #[test]
    fn unset_variable_falls_back_to_default() {
        assert_eq!(nonzero_env_or("ATELIER_TEST_UNSET_INTERVAL_SECS", 30), 30);
    }
}
