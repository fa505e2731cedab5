use serial_test::serial;
use std::{env, fs, panic};
use user_policy::{
    AppConfig, ServiceError,
    config::{Env, HashingConfig},
    security::{Authority, ROLE_USER},
};

// --- Setup/Teardown Utilities ---

/// Utility to run a test function and restore environment variables afterward
fn run_with_env<T, R>(test: T, cleanup_vars: Vec<&'static str>) -> R
where
    T: FnOnce() -> R + panic::UnwindSafe,
{
    let originals: Vec<(String, Option<String>)> = cleanup_vars
        .iter()
        .map(|&var| (var.to_string(), env::var(var).ok()))
        .collect();

    let result = panic::catch_unwind(test);

    for (key, original_value) in originals.into_iter().rev() {
        unsafe {
            if let Some(val) = original_value {
                env::set_var(&key, val);
            } else {
                env::remove_var(&key);
            }
        }
    }

    match result {
        Ok(value) => value,
        Err(e) => panic::resume_unwind(e),
    }
}

const CONFIG_VARS: [&str; 10] = [
    "APP_ENV",
    "JWT_SECRET",
    "TOKEN_TTL_SECS",
    "BIND_ADDR",
    "ROLES_FILE",
    "ADMIN_EMAIL",
    "ADMIN_PASSWORD",
    "ARGON2_MEMORY_KIB",
    "ARGON2_TIME_COST",
    "ARGON2_PARALLELISM",
];

fn clear_config_vars() {
    unsafe {
        for var in CONFIG_VARS {
            env::remove_var(var);
        }
    }
}

// --- Tests ---

#[test]
#[serial]
fn test_app_config_production_fail_fast() {
    let result = run_with_env(
        || {
            panic::catch_unwind(|| {
                clear_config_vars();
                unsafe {
                    env::set_var("APP_ENV", "production");
                }
                // JWT_SECRET is missing
                AppConfig::load()
            })
        },
        CONFIG_VARS.to_vec(),
    );

    assert!(
        result.is_err(),
        "Production config loading should panic without JWT_SECRET"
    );
}

#[test]
#[serial]
fn test_app_config_production_with_secret() {
    let config = run_with_env(
        || {
            clear_config_vars();
            unsafe {
                env::set_var("APP_ENV", "production");
                env::set_var("JWT_SECRET", "prod-secret");
                env::set_var("TOKEN_TTL_SECS", "900");
            }
            AppConfig::load()
        },
        CONFIG_VARS.to_vec(),
    );

    assert_eq!(config.env, Env::Production);
    assert_eq!(config.jwt_secret, "prod-secret");
    assert_eq!(config.token_ttl_secs, 900);
    assert_eq!(config.hashing, HashingConfig::production());
}

#[test]
#[serial]
fn test_app_config_local_env_defaults() {
    let config = run_with_env(
        || {
            clear_config_vars();
            unsafe {
                env::set_var("APP_ENV", "local");
            }
            AppConfig::load()
        },
        CONFIG_VARS.to_vec(),
    );

    assert_eq!(config.env, Env::Local);
    assert_eq!(config.jwt_secret, "super-secure-test-secret-value-local");
    assert_eq!(config.token_ttl_secs, 3600);
    assert_eq!(config.bind_addr, "0.0.0.0:3000");
    assert!(config.roles_file.is_none());
    assert!(config.admin_email.is_none());
}

#[test]
#[serial]
fn test_app_config_rejects_non_numeric_ttl() {
    let result = run_with_env(
        || {
            panic::catch_unwind(|| {
                clear_config_vars();
                unsafe {
                    env::set_var("TOKEN_TTL_SECS", "one hour");
                }
                AppConfig::load()
            })
        },
        CONFIG_VARS.to_vec(),
    );

    assert!(result.is_err());
}

#[test]
fn test_default_registry_when_no_roles_file() {
    let registry = AppConfig::default().role_registry().unwrap();
    let user = registry.get(ROLE_USER).unwrap();
    assert!(user.authorities.contains(&Authority::UserReadSelf));
    assert!(!user.authorities.contains(&Authority::UserReadAll));
}

#[test]
fn test_roles_file_is_loaded() {
    let path = env::temp_dir().join(format!("user-policy-roles-{}.json", std::process::id()));
    fs::write(
        &path,
        r#"{
            "ADMIN": ["USER_DELETE", "USER_READ_ALL"],
            "EMPLOYEE": ["USER_READ_ALL"],
            "USER": ["USER_READ_SELF"],
            "AUDITOR": ["USER_READ_ALL"]
        }"#,
    )
    .unwrap();

    let config = AppConfig {
        roles_file: Some(path.to_string_lossy().into_owned()),
        ..AppConfig::default()
    };
    let registry = config.role_registry().unwrap();
    fs::remove_file(&path).ok();

    assert_eq!(registry.roles().len(), 4);
    assert!(registry.get("AUDITOR").is_some());
}

#[test]
fn test_roles_file_with_unknown_authority_is_rejected() {
    let path = env::temp_dir().join(format!("user-policy-typo-{}.json", std::process::id()));
    fs::write(
        &path,
        r#"{ "ADMIN": ["USER_DELTE"], "EMPLOYEE": [], "USER": [] }"#,
    )
    .unwrap();

    let config = AppConfig {
        roles_file: Some(path.to_string_lossy().into_owned()),
        ..AppConfig::default()
    };
    let result = config.role_registry();
    fs::remove_file(&path).ok();

    assert!(matches!(result, Err(ServiceError::ValidationFailed { .. })));
}

#[test]
fn test_missing_roles_file_is_an_error() {
    let config = AppConfig {
        roles_file: Some("/definitely/not/here/roles.json".to_string()),
        ..AppConfig::default()
    };
    assert!(config.role_registry().is_err());
}
