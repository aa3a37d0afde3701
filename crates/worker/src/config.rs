use std::time::Duration;

/// Worker service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3100`).
    pub port: u16,
    /// PostgreSQL URL shared with the API (required).
    pub database_url: String,
    /// Generation backend base URL (default: `http://localhost:8188`).
    pub backend_url: String,
    /// Per-step backend timeout in seconds (default: `120`).
    pub backend_timeout_secs: u64,
    /// How long shutdown waits for in-flight jobs, in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `WORKER_HOST`           | `0.0.0.0`               |
    /// | `WORKER_PORT`           | `3100`                  |
    /// | `DATABASE_URL`          | -- (required)           |
    /// | `BACKEND_URL`           | `http://localhost:8188` |
    /// | `BACKEND_TIMEOUT_SECS`  | `120`                   |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                    |
    ///
    /// # Panics
    ///
    /// Panics if `DATABASE_URL` is missing or a numeric variable does not
    /// parse.
    pub fn from_env() -> Self {
        let host = std::env::var("WORKER_HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("WORKER_PORT")
            .unwrap_or_else(|_| "3100".into())
            .parse()
            .expect("WORKER_PORT must be a valid u16");

        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let backend_url =
            std::env::var("BACKEND_URL").unwrap_or_else(|_| "http://localhost:8188".into());

        let backend_timeout_secs: u64 = std::env::var("BACKEND_TIMEOUT_SECS")
            .unwrap_or_else(|_| "120".into())
            .parse()
            .expect("BACKEND_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        Self {
            host,
            port,
            database_url,
            backend_url,
            backend_timeout_secs,
            shutdown_timeout_secs,
        }
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
