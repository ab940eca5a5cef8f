const JWT_SECRET_PLACEHOLDER: &str = "CHANGE_ME_RATEWATCH_JWT_SECRET";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// HMAC secret for HS256 access tokens.
    pub jwt_secret: String,
    /// Raw events and rollups older than this are purged.
    /// Set via RATEWATCH_RETENTION_DAYS. Default: 90.
    pub retention_days: i64,
    /// Set via RATEWATCH_ROLLUP_INTERVAL_SECS. Default: 300.
    pub rollup_interval_secs: u64,
    /// Base URL the dashboard client talks to.
    pub api_url: String,
    pub access_token: Option<String>,
}

impl Config {
    pub fn is_placeholder_secret(&self) -> bool {
        self.jwt_secret == JWT_SECRET_PLACEHOLDER
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: "postgres://localhost/ratewatch".into(),
            jwt_secret: JWT_SECRET_PLACEHOLDER.into(),
            retention_days: 90,
            rollup_interval_secs: 300,
            api_url: "http://localhost:8080".into(),
            access_token: None,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let defaults = Config::default();

    let jwt_secret =
        std::env::var("RATEWATCH_JWT_SECRET").unwrap_or_else(|_| JWT_SECRET_PLACEHOLDER.into());

    if jwt_secret == JWT_SECRET_PLACEHOLDER {
        let env_mode = std::env::var("RATEWATCH_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "RATEWATCH_JWT_SECRET is still the insecure placeholder. \
                 Set a real signing secret before running in production."
            );
        }
        tracing::warn!("RATEWATCH_JWT_SECRET is not set, using insecure placeholder");
    }

    Ok(Config {
        port: env_parse("PORT").unwrap_or(defaults.port),
        database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
        jwt_secret,
        retention_days: env_parse("RATEWATCH_RETENTION_DAYS")
            .filter(|d: &i64| *d > 0)
            .unwrap_or(defaults.retention_days),
        rollup_interval_secs: env_parse("RATEWATCH_ROLLUP_INTERVAL_SECS")
            .filter(|s: &u64| *s > 0)
            .unwrap_or(defaults.rollup_interval_secs),
        api_url: std::env::var("RATEWATCH_API_URL").unwrap_or(defaults.api_url),
        access_token: std::env::var("RATEWATCH_ACCESS_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.retention_days, 90);
        assert_eq!(cfg.rollup_interval_secs, 300);
        assert!(cfg.is_placeholder_secret());
        assert!(cfg.access_token.is_none());
    }

    #[test]
    fn test_env_parse_ignores_garbage() {
        assert_eq!(env_parse::<u16>("RATEWATCH_TEST_UNSET_VARIABLE"), None);
    }
}
