//! Configuration management for the API server
//!
//! Loaded once at startup from environment variables (and a `.env` file if
//! present). Any invalid value aborts startup.
//!
//! # Environment Variables
//!
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `API_HOST` / `API_PORT`: bind address (default `0.0.0.0:8080`)
//! - `CORS_ORIGINS`: comma-separated origins, `*` for any (default `*`)
//! - `PRODUCTION`: enables HSTS and `Secure` cookies (default `false`)
//! - `PUBLIC_URL`: base URL used in emailed links
//! - `JWT_SECRET` / `REFRESH_TOKEN_SECRET`: distinct signing secrets, each
//!   at least 32 characters (required)
//! - `ACCESS_TOKEN_TTL_MINUTES` / `REFRESH_TOKEN_TTL_DAYS`: token lifetimes
//! - `SMTP_*`, `MAIL_FROM`: outgoing mail; without `SMTP_HOST` mail is logged
//! - `STORAGE_BACKEND`: `local`, `cloudinary` or `disabled`
//!
//! # Example
//!
//! ```no_run
//! use taskhive_api::config::Config;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! println!("Server will listen on {}", config.bind_address());
//! # Ok(())
//! # }
//! ```

use anyhow::{bail, Context};
use chrono::Duration;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use taskhive_shared::auth::jwt::TokenKeys;
use taskhive_shared::mail::SmtpSettings;
use taskhive_shared::storage::CloudinaryConfig;

/// Minimum length of each token signing secret
pub const MIN_SECRET_LENGTH: usize = 32;

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,

    /// SMTP settings; `None` means mail is only logged
    pub smtp: Option<SmtpSettings>,

    pub storage: StorageConfig,
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,

    /// Production mode (HSTS, `Secure` cookies)
    pub production: bool,

    /// Externally reachable base URL, without trailing slash
    pub public_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Secret for access tokens
    ///
    /// IMPORTANT: keep secret, at least 32 bytes.
    /// Generate with: `openssl rand -hex 32`
    pub access_secret: String,

    /// Secret for refresh tokens; must differ from `access_secret`
    pub refresh_secret: String,

    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
}

impl JwtConfig {
    pub fn token_keys(&self) -> TokenKeys {
        TokenKeys {
            access_secret: self.access_secret.clone(),
            refresh_secret: self.refresh_secret.clone(),
            access_ttl: Duration::minutes(self.access_ttl_minutes),
            refresh_ttl: Duration::days(self.refresh_ttl_days),
        }
    }
}

/// Attachment storage backend
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Files on local disk, served by this server under `/uploads`
    Local {
        dir: PathBuf,
        public_base_url: String,
    },
    Cloudinary(CloudinaryConfig),
    Disabled,
}

fn parse_var<T>(vars: &HashMap<String, String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(default),
    }
}

fn required(vars: &HashMap<String, String>, key: &str) -> anyhow::Result<String> {
    vars.get(key)
        .cloned()
        .with_context(|| format!("{} environment variable is required", key))
}

fn parse_bool(vars: &HashMap<String, String>, key: &str, default: bool) -> anyhow::Result<bool> {
    match vars.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => bail!("{} must be a boolean, got {:?}", key, v),
    }
}

impl Config {
    /// Loads configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or any value is
    /// invalid.
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        Self::from_vars(env::vars().collect())
    }

    /// Builds configuration from an explicit variable map
    ///
    /// Empty values are treated as unset.
    pub fn from_vars(vars: HashMap<String, String>) -> anyhow::Result<Self> {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();

        let public_url = vars
            .get("PUBLIC_URL")
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| "http://localhost:8080".to_string());

        let api = ApiConfig {
            host: vars.get("API_HOST").cloned().unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_var(&vars, "API_PORT", 8080u16)?,
            cors_origins: vars
                .get("CORS_ORIGINS")
                .map(|s| s.as_str())
                .unwrap_or("*")
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            production: parse_bool(&vars, "PRODUCTION", false)?,
            public_url,
        };

        let database = DatabaseConfig {
            url: required(&vars, "DATABASE_URL")?,
            max_connections: parse_var(&vars, "DATABASE_MAX_CONNECTIONS", 10u32)?,
        };

        let jwt = JwtConfig {
            access_secret: required(&vars, "JWT_SECRET")?,
            refresh_secret: required(&vars, "REFRESH_TOKEN_SECRET")?,
            access_ttl_minutes: parse_var(&vars, "ACCESS_TOKEN_TTL_MINUTES", 1440i64)?,
            refresh_ttl_days: parse_var(&vars, "REFRESH_TOKEN_TTL_DAYS", 7i64)?,
        };

        if jwt.access_secret.len() < MIN_SECRET_LENGTH {
            bail!("JWT_SECRET must be at least {} characters long", MIN_SECRET_LENGTH);
        }
        if jwt.refresh_secret.len() < MIN_SECRET_LENGTH {
            bail!("REFRESH_TOKEN_SECRET must be at least {} characters long", MIN_SECRET_LENGTH);
        }
        if jwt.access_secret == jwt.refresh_secret {
            bail!("REFRESH_TOKEN_SECRET must differ from JWT_SECRET");
        }
        if jwt.access_ttl_minutes <= 0 || jwt.refresh_ttl_days <= 0 {
            bail!("Token lifetimes must be positive");
        }

        let smtp = match vars.get("SMTP_HOST") {
            Some(host) => Some(SmtpSettings {
                host: host.clone(),
                port: parse_var(&vars, "SMTP_PORT", 587u16)?,
                username: vars.get("SMTP_USERNAME").cloned(),
                password: vars.get("SMTP_PASSWORD").cloned(),
                starttls: parse_bool(&vars, "SMTP_STARTTLS", true)?,
                from_address: vars
                    .get("MAIL_FROM")
                    .cloned()
                    .unwrap_or_else(|| "TaskHive <no-reply@taskhive.dev>".to_string()),
            }),
            None => None,
        };

        let backend = vars
            .get("STORAGE_BACKEND")
            .map(|b| b.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "local".to_string());

        let storage = match backend.as_str() {
            "local" => StorageConfig::Local {
                dir: vars
                    .get("STORAGE_LOCAL_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./uploads")),
                public_base_url: vars
                    .get("STORAGE_PUBLIC_BASE_URL")
                    .cloned()
                    .unwrap_or_else(|| format!("{}/uploads", api.public_url)),
            },
            "cloudinary" => StorageConfig::Cloudinary(CloudinaryConfig {
                cloud_name: required(&vars, "CLOUDINARY_CLOUD_NAME")?,
                api_key: required(&vars, "CLOUDINARY_API_KEY")?,
                api_secret: required(&vars, "CLOUDINARY_API_SECRET")?,
            }),
            "disabled" => StorageConfig::Disabled,
            other => bail!("STORAGE_BACKEND must be local, cloudinary or disabled, got {:?}", other),
        };

        Ok(Self {
            api,
            database,
            jwt,
            smtp,
            storage,
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    /// Link emailed to confirm an address
    pub fn verification_url(&self, token: &str) -> String {
        format!("{}/api/v1/users/verify/{}", self.api.public_url, token)
    }

    /// Link emailed to reset a password
    pub fn password_reset_url(&self, token: &str) -> String {
        format!("{}/api/v1/users/reset-password/{}", self.api.public_url, token)
    }
}
