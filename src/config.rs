use std::{collections::HashMap, env, fs};

use crate::error::{ServiceError, ServiceResult};
use crate::security::RoleRegistry;

/// AppConfig
///
/// Holds the application's entire configuration state. Immutable once loaded
/// and pulled into handlers through `FromRef`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Controls the local identity bypass and log format.
    pub env: Env,
    // HS256 secret for issuing and validating bearer tokens.
    pub jwt_secret: String,
    // Lifetime of issued tokens, in seconds.
    pub token_ttl_secs: u64,
    pub bind_addr: String,
    // Optional JSON file overriding the built-in role definitions.
    pub roles_file: Option<String>,
    // Bootstrap administrator, created at startup when both are present.
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub hashing: HashingConfig,
}

/// Env
///
/// Switches between developer conveniences (header bypass, pretty logs) and
/// hardened production behaviour.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

/// HashingConfig
///
/// Argon2id cost parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct HashingConfig {
    pub memory_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl HashingConfig {
    /// OWASP-recommended baseline for Argon2id.
    pub fn production() -> Self {
        Self {
            memory_kib: 19 * 1024,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl Default for HashingConfig {
    /// Cheap profile used by tests and `AppConfig::default()`.
    fn default() -> Self {
        Self {
            memory_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

impl Default for AppConfig {
    /// Safe, non-panicking instance for test setup; needs no environment.
    fn default() -> Self {
        Self {
            env: Env::Local,
            jwt_secret: "super-secure-test-secret-value-local".to_string(),
            token_ttl_secs: 3600,
            bind_addr: "127.0.0.1:3000".to_string(),
            roles_file: None,
            admin_email: None,
            admin_password: None,
            hashing: HashingConfig::default(),
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads every parameter from the environment and fails fast.
    ///
    /// # Panics
    /// Panics if `JWT_SECRET` is missing in production, or if a numeric
    /// variable is set but does not parse.
    pub fn load() -> Self {
        let env_str = env::var("APP_ENV").unwrap_or_else(|_| "local".to_string());
        let env = match env_str.as_str() {
            "production" => Env::Production,
            _ => Env::Local,
        };

        let jwt_secret = match env {
            Env::Production => {
                env::var("JWT_SECRET").expect("FATAL: JWT_SECRET must be set in production.")
            }
            // Local fallback; never acceptable outside a developer machine.
            Env::Local => env::var("JWT_SECRET")
                .unwrap_or_else(|_| "super-secure-test-secret-value-local".to_string()),
        };

        let production_hashing = HashingConfig::production();
        let hashing = HashingConfig {
            memory_kib: numeric_var("ARGON2_MEMORY_KIB", production_hashing.memory_kib),
            time_cost: numeric_var("ARGON2_TIME_COST", production_hashing.time_cost),
            parallelism: numeric_var("ARGON2_PARALLELISM", production_hashing.parallelism),
        };

        Self {
            jwt_secret,
            token_ttl_secs: numeric_var("TOKEN_TTL_SECS", 3600),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            roles_file: env::var("ROLES_FILE").ok(),
            admin_email: env::var("ADMIN_EMAIL").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
            hashing,
            env,
        }
    }

    /// role_registry
    ///
    /// Built-in roles, or the definitions in `roles_file` when configured.
    /// Unknown authority names are an error, so a typo cannot silently grant
    /// no access.
    pub fn role_registry(&self) -> ServiceResult<RoleRegistry> {
        let Some(path) = &self.roles_file else {
            return Ok(RoleRegistry::default());
        };

        let raw = fs::read_to_string(path)
            .map_err(|e| ServiceError::validation(format!("cannot read roles file {path}: {e}")))?;
        let definitions: HashMap<String, Vec<String>> = serde_json::from_str(&raw)
            .map_err(|e| ServiceError::validation(format!("malformed roles file {path}: {e}")))?;

        RoleRegistry::from_definitions(definitions)
    }
}

fn numeric_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("FATAL: {name} must be numeric, got `{raw}`")),
        Err(_) => default,
    }
}
