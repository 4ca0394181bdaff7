//! Configuration persistence
//!
//! The config file holds the node identity, network settings, and the
//! persisted source/sink descriptors. The [`ConfigBridge`] task folds entity
//! changes back into the file as they happen; the registries never touch the
//! filesystem themselves.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::constants::{DEFAULT_HTTP_PORT, DEFAULT_SESSION_PORT};
use crate::protocol::{SinkDescriptor, SourceDescriptor};
use crate::{Error, Result};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Human-readable node name shown to other peers
    pub name: String,
    /// Stable peer uuid; generated and persisted on first run
    pub uuid: String,
    /// Peers to join at startup, as `host:port` of their HTTP API
    pub auto_connect: Vec<String>,
    pub http: HttpConfig,
    pub transport: TransportConfig,
    pub sources: Vec<SourceDescriptor>,
    pub sinks: Vec<SinkDescriptor>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "mesh-node".to_string(),
            uuid: String::new(),
            auto_connect: Vec::new(),
            http: HttpConfig::default(),
            transport: TransportConfig::default(),
            sources: Vec::new(),
            sinks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_HTTP_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub bind_address: String,
    pub port: u16,
    /// Endpoint other peers should dial; defaults to the bound address
    pub advertise_address: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_SESSION_PORT,
            advertise_address: None,
        }
    }
}

impl AppConfig {
    /// Platform config file location
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "mesh-audio-streamer")
            .ok_or_else(|| Error::Config("cannot determine a config directory".to_string()))?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, falling back to the platform config dir.
    ///
    /// A fresh config generates the stable peer uuid and persists it
    /// immediately so the identity survives restarts.
    pub fn load(path: Option<&Path>) -> Result<(Self, PathBuf)> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            toml::from_str(&raw)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        } else {
            Self::default()
        };
        if config.uuid.is_empty() {
            config.uuid = Uuid::new_v4().to_string();
            config.save(&path)?;
            tracing::info!(uuid = %config.uuid, path = %path.display(), "generated node identity");
        }
        Ok((config, path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, raw)?;
        Ok(())
    }
}

/// Entity changes the registry publishes for persistence
#[derive(Debug, Clone)]
pub enum ConfigEvent {
    SourceAdded(SourceDescriptor),
    SourceUpdated(SourceDescriptor),
    SinkAdded(SinkDescriptor),
    SinkUpdated(SinkDescriptor),
}

/// Folds entity change events back into the config file.
pub struct ConfigBridge {
    config: AppConfig,
    path: PathBuf,
}

impl ConfigBridge {
    pub fn new(config: AppConfig, path: PathBuf) -> Self {
        Self { config, path }
    }

    /// Consume events until the sender side is dropped.
    pub fn spawn(mut self, mut rx: mpsc::UnboundedReceiver<ConfigEvent>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.apply(event);
                if let Err(e) = self.config.save(&self.path) {
                    tracing::warn!("failed to persist descriptor change: {e}");
                }
            }
        })
    }

    fn apply(&mut self, event: ConfigEvent) {
        match event {
            ConfigEvent::SourceAdded(d) | ConfigEvent::SourceUpdated(d) => {
                upsert_source(&mut self.config.sources, d)
            }
            ConfigEvent::SinkAdded(d) | ConfigEvent::SinkUpdated(d) => {
                upsert_sink(&mut self.config.sinks, d)
            }
        }
    }
}

fn upsert_source(list: &mut Vec<SourceDescriptor>, descriptor: SourceDescriptor) {
    match list.iter_mut().find(|d| d.uuid == descriptor.uuid) {
        Some(slot) => *slot = descriptor,
        None => list.push(descriptor),
    }
}

fn upsert_sink(list: &mut Vec<SinkDescriptor>, descriptor: SinkDescriptor) {
    match list.iter_mut().find(|d| d.uuid == descriptor.uuid) {
        Some(slot) => *slot = descriptor,
        None => list.push(descriptor),
    }
}
