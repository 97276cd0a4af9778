use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub api_version: String,
    pub live: LiveConfig,
}

/// Knobs of the per-connection update pump.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Outbound updates buffered per session before it counts as a slow consumer.
    pub queue_capacity: usize,
    pub write_timeout: Duration,
    /// Rounds of the optimistic active-subscriber cleanup.
    pub max_cleanup_attempts: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        LiveConfig {
            queue_capacity: 16,
            write_timeout: Duration::from_secs(5),
            max_cleanup_attempts: 10,
        }
    }
}

impl Config {
    /// Reads `.env` and the process environment.
    pub fn from_env() -> anyhow::Result<Config> {
        dotenv::dotenv().ok();

        let mut live = LiveConfig::default();
        if let Ok(secs) = dotenv::var("WS_WRITE_TIMEOUT_SECS") {
            let secs = secs
                .parse()
                .with_context(|| format!("WS_WRITE_TIMEOUT_SECS={secs} is not a number of seconds"))?;
            live.write_timeout = Duration::from_secs(secs);
        }

        let port = var_or("PORT", "8080");
        Ok(Config {
            database_url: var_or("DATABASE_URL", "sqlite://spaces.db"),
            host: var_or("HOST", "0.0.0.0"),
            port: port.parse().with_context(|| format!("PORT={port} is not a port"))?,
            api_version: var_or("API_VERSION", "v1"),
            live,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn var_or(name: &str, default: &str) -> String {
    dotenv::var(name).unwrap_or_else(|_| default.to_owned())
}
