use anyhow::Result;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::Engine;

use super::RoutingFile;

/// Watches the configuration file and reconfigures the engine on change.
///
/// A reload that fails to parse or build leaves the running configuration
/// untouched.
pub struct ConfigManager {
    config_path: PathBuf,
    engine: Arc<Engine>,
    _watcher: Option<RecommendedWatcher>,
}

impl ConfigManager {
    pub fn new<P: AsRef<Path>>(config_path: P, engine: Arc<Engine>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            engine,
            _watcher: None,
        }
    }

    /// Start watching for configuration file changes.
    pub fn start_hot_reload(&mut self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(100);

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if let Err(e) = tx.blocking_send(event) {
                        error!("Failed to send file change event: {}", e);
                    }
                }
                Err(e) => error!("File watch error: {}", e),
            },
            NotifyConfig::default().with_poll_interval(Duration::from_secs(1)),
        )?;

        watcher.watch(&self.config_path, RecursiveMode::NonRecursive)?;
        if let Some(parent) = self.config_path.parent() {
            watcher.watch(parent, RecursiveMode::NonRecursive)?;
        }

        info!("Started watching config file: {:?}", self.config_path);

        let config_path = self.config_path.clone();
        let engine = self.engine.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handle_config_change(&event, &config_path, &engine).await;
            }
        });

        self._watcher = Some(watcher);
        Ok(())
    }

    /// Manually reload configuration from file.
    pub async fn reload(&self) -> Result<()> {
        info!("Reloading configuration from {:?}", self.config_path);
        let config = RoutingFile::from_file_with_env(&self.config_path).await?;
        self.engine.reconfigure(&config)?;
        info!("Configuration reloaded successfully");
        Ok(())
    }
}

/// Handle one configuration file change event.
async fn handle_config_change(event: &Event, config_path: &Path, engine: &Arc<Engine>) {
    use notify::EventKind;

    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
        return;
    }

    let config_file_changed = event
        .paths
        .iter()
        .any(|path| path == config_path || (path.is_dir() && config_path.starts_with(path)));
    if !config_file_changed {
        return;
    }

    debug!("Config file change detected: {:?}", event);

    // Small delay so the file write can complete
    tokio::time::sleep(Duration::from_millis(100)).await;

    let reloaded = match RoutingFile::from_file_with_env(config_path).await {
        Ok(config) => engine.reconfigure(&config).map_err(anyhow::Error::from),
        Err(e) => Err(e),
    };
    match reloaded {
        Ok(()) => info!("Configuration hot-reloaded successfully"),
        Err(e) => warn!("Failed to hot-reload configuration (keeping current): {}", e),
    }
}
