//! Resolved app configuration: stored YAML plus secret overrides from the
//! environment.
//!
//! The three target secrets (host, user, identity file) can be injected at
//! deploy time without ever being written to the registry:
//!
//! | Variable                   | Field                    |
//! |----------------------------|--------------------------|
//! | `STAGEHAND_HOST`           | `target.host`            |
//! | `STAGEHAND_USER`           | `target.user`            |
//! | `STAGEHAND_IDENTITY_FILE`  | `target.identity_file`   |

use std::path::{Path, PathBuf};

use crate::error::RegistryError;
use crate::registry;
use crate::types::{AppConfig, AppName};

pub const ENV_HOST: &str = "STAGEHAND_HOST";
pub const ENV_USER: &str = "STAGEHAND_USER";
pub const ENV_IDENTITY_FILE: &str = "STAGEHAND_IDENTITY_FILE";

/// Apply overrides using an arbitrary lookup (tests pass a closure over a map).
///
/// Empty values are ignored.
pub fn apply_overrides_with(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(host) = get(ENV_HOST) {
        config.target.host = Some(host);
    }
    if let Some(user) = get(ENV_USER) {
        config.target.user = Some(user);
    }
    if let Some(identity) = get(ENV_IDENTITY_FILE) {
        config.target.identity_file = Some(PathBuf::from(identity));
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(config: &mut AppConfig) {
    apply_overrides_with(config, |key| std::env::var(key).ok());
}

/// Load `app`, apply environment overrides, and validate.
pub fn load_resolved_at(home: &Path, app: &AppName) -> Result<AppConfig, RegistryError> {
    let mut config = registry::load_app_at(home, app)?;
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::types::TargetConfig;

    fn config() -> AppConfig {
        let mut cfg = AppConfig::new(
            AppName::from("flask_app"),
            PathBuf::from("/src/flask_app"),
            TargetConfig::local(PathBuf::from("/srv/flask_app")),
        );
        cfg.target.host = Some("stored-host".to_string());
        cfg
    }

    #[test]
    fn overrides_replace_secrets() {
        let env: HashMap<&str, &str> = [
            (ENV_HOST, "10.0.0.5"),
            (ENV_USER, "deploy"),
            (ENV_IDENTITY_FILE, "/keys/deploy.pem"),
        ]
        .into_iter()
        .collect();

        let mut cfg = config();
        apply_overrides_with(&mut cfg, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.target.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(cfg.target.user.as_deref(), Some("deploy"));
        assert_eq!(
            cfg.target.identity_file,
            Some(PathBuf::from("/keys/deploy.pem"))
        );
    }

    #[test]
    fn empty_override_keeps_stored_value() {
        let mut cfg = config();
        apply_overrides_with(&mut cfg, |k| (k == ENV_HOST).then(|| "  ".to_string()));
        assert_eq!(cfg.target.host.as_deref(), Some("stored-host"));
        assert!(cfg.target.user.is_none());
    }
}
