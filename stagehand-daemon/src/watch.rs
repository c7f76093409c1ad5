//! Source-tree watching: which app a changed path belongs to, and when a
//! burst of changes has settled enough to deploy.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::time::Instant;

use stagehand_core::types::{AppConfig, AppName};
use stagehand_release::manifest::is_ignored;

use crate::error::DaemonError;

// ---------------------------------------------------------------------------
// Debouncer
// ---------------------------------------------------------------------------

/// Trailing-edge debounce per app: an app is due once `window` has passed
/// since its most recent change.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<AppName, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn touch(&mut self, app: AppName, now: Instant) {
        self.pending.insert(app, now + self.window);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Remove and return every app whose deadline has passed, sorted.
    pub fn take_due(&mut self, now: Instant) -> Vec<AppName> {
        let mut due: Vec<AppName> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(app, _)| app.clone())
            .collect();
        for app in &due {
            self.pending.remove(app);
        }
        due.sort();
        due
    }
}

// ---------------------------------------------------------------------------
// Watched sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct WatchedSource {
    root: PathBuf,
    ignore: Vec<String>,
}

/// Source trees of `auto_deploy` apps currently registered with the watcher.
#[derive(Debug, Default)]
pub struct WatchSet {
    sources: HashMap<AppName, WatchedSource>,
}

impl WatchSet {
    /// App owning `path`, unless the path falls under an ignored name.
    pub fn app_for(&self, path: &Path) -> Option<AppName> {
        self.sources.iter().find_map(|(app, source)| {
            let rel = path.strip_prefix(&source.root).ok()?;
            let ignored = rel
                .components()
                .any(|c| is_ignored(&c.as_os_str().to_string_lossy(), &source.ignore));
            (!ignored).then(|| app.clone())
        })
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Make the watcher match `apps`: watch new auto-deploy sources, unwatch
    /// those that are gone or no longer auto-deploy. A source that cannot be
    /// watched is skipped with a warning.
    pub fn sync<'a>(
        &mut self,
        watcher: &mut RecommendedWatcher,
        apps: impl IntoIterator<Item = &'a AppConfig>,
    ) -> Result<(), DaemonError> {
        let mut desired = HashMap::new();
        for config in apps.into_iter().filter(|c| c.auto_deploy) {
            match std::fs::canonicalize(&config.source) {
                Ok(root) => {
                    desired.insert(
                        config.name.clone(),
                        WatchedSource {
                            root,
                            ignore: config.ignore.clone(),
                        },
                    );
                }
                Err(err) => tracing::warn!(
                    app = %config.name,
                    source = %config.source.display(),
                    error = %err,
                    "cannot watch source tree"
                ),
            }
        }

        let stale: Vec<AppName> = self
            .sources
            .iter()
            .filter(|(app, source)| desired.get(*app).map(|d| &d.root) != Some(&source.root))
            .map(|(app, _)| app.clone())
            .collect();
        for app in stale {
            if let Some(source) = self.sources.remove(&app) {
                let _ = watcher.unwatch(&source.root);
                tracing::info!(app = %app, "stopped watching source tree");
            }
        }

        for (app, source) in desired {
            if let Some(existing) = self.sources.get_mut(&app) {
                existing.ignore = source.ignore;
                continue;
            }
            match watcher.watch(&source.root, RecursiveMode::Recursive) {
                Ok(()) => {
                    tracing::info!(app = %app, source = %source.root.display(), "watching source tree");
                    self.sources.insert(app, source);
                }
                Err(err) => tracing::warn!(app = %app, error = %err, "watch failed"),
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn insert(&mut self, app: &str, root: &str, ignore: &[&str]) {
        self.sources.insert(
            AppName::from(app),
            WatchedSource {
                root: PathBuf::from(root),
                ignore: ignore.iter().map(|s| s.to_string()).collect(),
            },
        );
    }
}

pub fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

pub fn is_registry_yaml(path: &Path, apps_dir: &Path) -> bool {
    path.starts_with(apps_dir)
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn rapid_changes_collapse_into_one_deploy() {
        let mut debouncer = Debouncer::new(Duration::from_secs(2));
        let app = AppName::from("flask_app");

        for _ in 0..5 {
            debouncer.touch(app.clone(), Instant::now());
            advance(Duration::from_millis(500)).await;
            assert!(debouncer.take_due(Instant::now()).is_empty());
        }

        advance(Duration::from_millis(1600)).await;
        assert_eq!(debouncer.take_due(Instant::now()), vec![app]);
        assert!(debouncer.next_deadline().is_none());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn apps_are_debounced_independently() {
        let mut debouncer = Debouncer::new(Duration::from_secs(2));
        debouncer.touch(AppName::from("a"), Instant::now());
        advance(Duration::from_secs(1)).await;
        debouncer.touch(AppName::from("b"), Instant::now());
        advance(Duration::from_secs(1)).await;

        assert_eq!(debouncer.take_due(Instant::now()), vec![AppName::from("a")]);
        advance(Duration::from_secs(1)).await;
        assert_eq!(debouncer.take_due(Instant::now()), vec![AppName::from("b")]);
    }

    #[test]
    fn paths_map_to_owning_app() {
        let mut set = WatchSet::default();
        set.insert("flask_app", "/src/flask_app", &[".git", "*.pyc"]);
        set.insert("api", "/src/api", &[]);

        assert_eq!(
            set.app_for(Path::new("/src/flask_app/app.py")),
            Some(AppName::from("flask_app"))
        );
        assert_eq!(
            set.app_for(Path::new("/src/api/main.py")),
            Some(AppName::from("api"))
        );
        assert_eq!(set.app_for(Path::new("/elsewhere/app.py")), None);
    }

    #[test]
    fn ignored_paths_do_not_trigger() {
        let mut set = WatchSet::default();
        set.insert("flask_app", "/src/flask_app", &[".git", "*.pyc"]);
        assert_eq!(set.app_for(Path::new("/src/flask_app/.git/index")), None);
        assert_eq!(set.app_for(Path::new("/src/flask_app/cache/app.pyc")), None);
    }

    #[test]
    fn registry_yaml_detection() {
        let apps = Path::new("/home/u/.stagehand/apps");
        assert!(is_registry_yaml(&apps.join("flask_app.yaml"), apps));
        assert!(!is_registry_yaml(&apps.join("flask_app.yaml.tmp"), apps));
        assert!(!is_registry_yaml(Path::new("/src/app.yaml"), apps));
    }
}
