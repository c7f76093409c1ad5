//! Per-app YAML registry.
//!
//! # Storage layout
//!
//! ```text
//! ~/.stagehand/
//!   apps/
//!     <app>.yaml          (one file per app: mode 0600, dir mode 0700)
//! ```
//!
//! # API pattern
//!
//! Every function takes an explicit `home` (`fn_at(home: &Path, …)`). Binaries
//! resolve it once with [`home`]; tests pass a `TempDir`.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::RegistryError;
use crate::types::{AppConfig, AppName};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.stagehand/`: pure, no I/O.
pub fn stagehand_root(home: &Path) -> PathBuf {
    home.join(".stagehand")
}

/// `<home>/.stagehand/apps/`
///
/// Creates the directory (mode `0700`) if it does not yet exist.
pub fn apps_dir_at(home: &Path) -> Result<PathBuf, RegistryError> {
    let dir = stagehand_root(home).join("apps");
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

/// `<home>/.stagehand/apps/<app>.yaml`: pure, no I/O.
pub fn app_path_at(home: &Path, app: &AppName) -> PathBuf {
    stagehand_root(home)
        .join("apps")
        .join(format!("{}.yaml", app.0))
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load a single app from `<home>/.stagehand/apps/<app>.yaml`.
///
/// Returns `RegistryError::AppNotFound` if absent,
/// `RegistryError::Parse` (with path + line context) if malformed YAML.
pub fn load_app_at(home: &Path, app: &AppName) -> Result<AppConfig, RegistryError> {
    let path = app_path_at(home, app);
    if !path.exists() {
        return Err(RegistryError::AppNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| RegistryError::Parse { path, source: e })
}

/// Load every registered app, sorted by name.
///
/// Skips files that do not end in `.yaml` (including leftover `.yaml.tmp`).
pub fn list_apps_at(home: &Path) -> Result<Vec<AppConfig>, RegistryError> {
    let dir = stagehand_root(home).join("apps");
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut entries: Vec<_> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut apps = Vec::new();
    for entry in entries {
        let fname = entry.file_name();
        if !fname.to_string_lossy().ends_with(".yaml") {
            continue;
        }
        let contents = std::fs::read_to_string(entry.path())?;
        let app: AppConfig = serde_yaml::from_str(&contents).map_err(|e| RegistryError::Parse {
            path: entry.path(),
            source: e,
        })?;
        apps.push(app);
    }
    Ok(apps)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save an app to `<home>/.stagehand/apps/<app>.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
/// `.tmp` is always in the same directory as the target (same filesystem: no EXDEV).
pub fn save_app_at(home: &Path, app: &AppConfig) -> Result<(), RegistryError> {
    apps_dir_at(home)?;
    let path = app_path_at(home, &app.name);
    let tmp_path = path.with_file_name(format!("{}.yaml.tmp", app.name.0));

    let yaml = serde_yaml::to_string(app)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Stamp `updated_at` and save.
pub fn touch_and_save_at(home: &Path, app: &mut AppConfig) -> Result<(), RegistryError> {
    app.updated_at = Utc::now();
    save_app_at(home, app)
}

// ---------------------------------------------------------------------------
// 4. Register / remove
// ---------------------------------------------------------------------------

/// Register `config` under its name.
///
/// Idempotent: if the app is already registered, the stored config is loaded
/// and returned unchanged.
pub fn register_at(home: &Path, config: AppConfig) -> Result<AppConfig, RegistryError> {
    AppName::parse(&config.name.0)?;
    let path = app_path_at(home, &config.name);
    if path.exists() {
        return load_app_at(home, &config.name);
    }
    save_app_at(home, &config)?;
    Ok(config)
}

/// Remove the app's config file. Deployed releases on the target are untouched.
pub fn remove_app_at(home: &Path, app: &AppName) -> Result<(), RegistryError> {
    let path = app_path_at(home, app);
    if !path.exists() {
        return Err(RegistryError::AppNotFound { path });
    }
    std::fs::remove_file(&path)?;
    Ok(())
}

/// `dirs::home_dir()`, or `HomeNotFound`.
pub fn home() -> Result<PathBuf, RegistryError> {
    dirs::home_dir().ok_or(RegistryError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TargetConfig;
    use tempfile::TempDir;

    fn make_home() -> TempDir {
        TempDir::new().expect("tempdir")
    }

    fn app(name: &str) -> AppConfig {
        let mut cfg = AppConfig::new(
            AppName::from(name),
            PathBuf::from("/src").join(name),
            TargetConfig::local(PathBuf::from("/srv").join(name)),
        );
        cfg.process.command = vec!["sleep".to_string(), "60".to_string()];
        cfg
    }

    #[test]
    fn app_path_is_correct() {
        let home = make_home();
        let path = app_path_at(home.path(), &AppName::from("flask_app"));
        assert!(path.ends_with(".stagehand/apps/flask_app.yaml"));
    }

    #[test]
    fn apps_dir_created_with_perms() {
        let home = make_home();
        let dir = apps_dir_at(home.path()).expect("apps_dir_at");
        assert!(dir.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }

    #[test]
    fn save_and_load_roundtrip() {
        let home = make_home();
        let cfg = app("flask_app");
        save_app_at(home.path(), &cfg).expect("save");
        let loaded = load_app_at(home.path(), &cfg.name).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let home = make_home();
        let cfg = app("flask_app");
        save_app_at(home.path(), &cfg).expect("save");
        let tmp = app_path_at(home.path(), &cfg.name).with_file_name("flask_app.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn load_missing_app_returns_not_found() {
        let home = make_home();
        let err = load_app_at(home.path(), &AppName::from("ghost")).unwrap_err();
        assert!(matches!(err, RegistryError::AppNotFound { .. }));
    }

    #[test]
    fn list_apps_empty_when_nothing_registered() {
        let home = make_home();
        assert!(list_apps_at(home.path()).expect("list").is_empty());
    }

    #[test]
    fn register_is_idempotent() {
        let home = make_home();
        let first = register_at(home.path(), app("flask_app")).expect("first");

        let mut changed = app("flask_app");
        changed.keep_releases = 9;
        let second = register_at(home.path(), changed).expect("second");
        assert_eq!(second.keep_releases, first.keep_releases, "first registration wins");
    }

    #[test]
    fn register_rejects_bad_names() {
        let home = make_home();
        let err = register_at(home.path(), app("../escape")).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName { .. }));
    }

    #[test]
    fn remove_deletes_config() {
        let home = make_home();
        let cfg = register_at(home.path(), app("flask_app")).expect("register");
        remove_app_at(home.path(), &cfg.name).expect("remove");
        assert!(!app_path_at(home.path(), &cfg.name).exists());
        assert!(remove_app_at(home.path(), &cfg.name).is_err());
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(RegistryError::HomeNotFound
            .to_string()
            .contains("home directory"));
    }
}
