use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use backend::{Backend, BackendError, StageDescriptor};
use episode::{CacheHandle, EpisodeId, EpisodeSummary};

use crate::approval::ApprovalMachine;
use crate::catalog::StageCatalog;
use crate::config::StudioConfig;
use crate::registry::StageRegistry;
use crate::session::EpisodeSession;
use crate::{Result, StudioError};

/// Last known reachability of the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum Connectivity {
    #[default]
    Unknown,
    Online,
    Unreachable(String),
}

/// Entry point: stage catalog, episode list, and opening episodes.
pub struct Studio {
    backend: Arc<dyn Backend>,
    cache: CacheHandle,
    registry: StageRegistry,
    config: StudioConfig,
    machine: Option<Arc<ApprovalMachine>>,
    connectivity: Connectivity,
}

impl Studio {
    pub fn new(backend: Arc<dyn Backend>, config: StudioConfig) -> Self {
        Self {
            backend,
            cache: CacheHandle::new(),
            registry: StageRegistry::standard(),
            config,
            machine: None,
            connectivity: Connectivity::Unknown,
        }
    }

    pub fn with_registry(mut self, registry: StageRegistry) -> Self {
        self.registry = registry;
        self.machine = None;
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn cache(&self) -> &CacheHandle {
        &self.cache
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// The unreachable notice only applies while no episode is loaded.
    pub fn is_unreachable(&self) -> bool {
        matches!(self.connectivity, Connectivity::Unreachable(_)) && self.cache.current().is_none()
    }

    pub fn machine(&self) -> Option<&Arc<ApprovalMachine>> {
        self.machine.as_ref()
    }

    fn track<T>(&mut self, result: std::result::Result<T, BackendError>) -> Result<T> {
        match &result {
            Err(err) if err.is_connectivity() => {
                if self.connectivity == Connectivity::Online {
                    warn!(backend = self.backend.name(), %err, "backend unreachable");
                }
                self.connectivity = Connectivity::Unreachable(err.to_string());
            }
            _ => self.connectivity = Connectivity::Online,
        }
        Ok(result?)
    }

    /// Fetch the stage catalog and bind it to registered workflows.
    pub async fn connect(&mut self) -> Result<Arc<ApprovalMachine>> {
        let result = self.backend.list_stages().await;
        let stages: Vec<StageDescriptor> = self.track(result)?;
        let catalog = StageCatalog::new(stages)?;
        let registry = &self.registry;
        let machine = Arc::new(ApprovalMachine::new(catalog, |id| registry.kind_of(id))?);
        info!(
            backend = self.backend.name(),
            stages = machine.catalog().len(),
            "connected"
        );
        self.machine = Some(machine.clone());
        Ok(machine)
    }

    async fn ensure_connected(&mut self) -> Result<Arc<ApprovalMachine>> {
        match &self.machine {
            Some(machine) => Ok(machine.clone()),
            None => self.connect().await,
        }
    }

    pub async fn list_episodes(&mut self) -> Result<Vec<EpisodeSummary>> {
        let result = self.backend.list_episodes().await;
        self.track(result)
    }

    pub async fn create_episode(&mut self, title: &str) -> Result<EpisodeSummary> {
        let result = self.backend.create_episode(title).await;
        let summary = self.track(result)?;
        info!(episode = %summary.id, title = %summary.title, "episode created");
        Ok(summary)
    }

    /// Delete an episode; if it is the one loaded, the cache is cleared too.
    pub async fn delete_episode(&mut self, id: &EpisodeId) -> Result<()> {
        let result = self.backend.delete_episode(id).await;
        self.track(result)?;
        if self.cache.current().is_some_and(|ep| ep.id == *id) {
            self.cache.clear();
        }
        Ok(())
    }

    /// Fetch an episode into the cache and build its stage workflows.
    /// Opening another episode invalidates the previous session.
    pub async fn open(&mut self, id: &EpisodeId) -> Result<EpisodeSession> {
        let machine = self.ensure_connected().await?;
        let result = self.backend.get_episode(id).await;
        let episode = self.track(result)?;
        EpisodeSession::open(
            self.backend.clone(),
            self.cache.clone(),
            machine,
            &self.registry,
            episode,
            &self.config.editor,
        )
    }

    /// Create an episode and open it.
    pub async fn start_episode(&mut self, title: &str) -> Result<EpisodeSession> {
        let summary = self.create_episode(title).await?;
        self.open(&summary.id).await
    }

    pub fn require_machine(&self) -> Result<Arc<ApprovalMachine>> {
        self.machine
            .clone()
            .ok_or_else(|| StudioError::Config("not connected to a backend".into()))
    }
}
