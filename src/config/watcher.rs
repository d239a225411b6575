//! Hot reload of the configuration file.
//!
//! The parent directory is watched rather than the file itself: editors
//! and deploy tools usually replace the file, which drops a watch placed
//! on the old inode. Events are filtered down to the configured file name,
//! and only configurations that parse and validate are forwarded.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;

pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end for validated configurations.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching. Dropping the returned handle stops the watch.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let directory = watch_directory(&self.path);
        let file_name = self.path.file_name().map(OsStr::to_os_string);
        let path = self.path.clone();
        let tx = self.update_tx;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches(&event, file_name.as_deref()) => reload(&path, &tx),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Config watch error"),
            },
            Config::default(),
        )?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), directory = %directory.display(), "Config watcher started");
        Ok(watcher)
    }
}

fn watch_directory(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Whether `event` writes or replaces the watched file.
fn touches(event: &Event, file_name: Option<&OsStr>) -> bool {
    let Some(file_name) = file_name else {
        return false;
    };
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event.paths.iter().any(|p| p.file_name() == Some(file_name))
}

fn reload(path: &Path, tx: &mpsc::UnboundedSender<GatewayConfig>) {
    match load_config(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), services = config.services.0.len(), "Configuration reloaded");
            if tx.send(config).is_err() {
                tracing::debug!("Reload receiver closed, dropping configuration");
            }
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Rejected configuration change, keeping current settings");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_only_the_config_file_is_relevant() {
        let name = Some(OsStr::new("gateway.toml"));
        let write = EventKind::Modify(ModifyKind::Data(DataChange::Content));

        assert!(touches(&event(write, "/etc/gateway/gateway.toml"), name));
        assert!(touches(&event(EventKind::Create(CreateKind::File), "/etc/gateway/gateway.toml"), name));
        assert!(!touches(&event(write, "/etc/gateway/other.toml"), name));
        assert!(!touches(&event(EventKind::Remove(RemoveKind::File), "/etc/gateway/gateway.toml"), name));
        assert!(!touches(&event(write, "/etc/gateway/gateway.toml"), None));
    }

    #[test]
    fn test_watch_directory_defaults_to_cwd() {
        assert_eq!(watch_directory(Path::new("gateway.toml")), PathBuf::from("."));
        assert_eq!(watch_directory(Path::new("/etc/gateway/gateway.toml")), PathBuf::from("/etc/gateway"));
    }

    #[test]
    fn test_reload_forwards_valid_and_skips_invalid() {
        let dir = std::env::temp_dir().join(format!("gateway-watch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gateway.toml");
        let (tx, mut rx) = mpsc::unbounded_channel();

        std::fs::write(&path, "[rate_limit]\nmax_requests = 7\n").unwrap();
        reload(&path, &tx);
        assert_eq!(rx.try_recv().unwrap().rate_limit.max_requests, 7);

        std::fs::write(&path, "[rate_limit]\nmax_requests = 0\n").unwrap();
        reload(&path, &tx);
        assert!(rx.try_recv().is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
