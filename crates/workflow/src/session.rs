//! One opened episode: its cache ticket, approval machine and stage workflows.
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use backend::Backend;
use episode::{CacheHandle, Episode, StageId, StageKind, Ticket};
use timeline::EditorSettings;

use crate::approval::{ApprovalMachine, Position};
use crate::registry::{StageContext, StageRegistry, StageWorkflow};
use crate::stages::{
    ContextWorkflow, ScenesWorkflow, ScriptWorkflow, ThumbnailWorkflow, TimelineWorkflow,
    VoiceWorkflow,
};
use crate::{Result, StudioError};

pub struct EpisodeSession {
    backend: Arc<dyn Backend>,
    cache: CacheHandle,
    ticket: Ticket,
    machine: Arc<ApprovalMachine>,
    workflows: HashMap<StageId, Box<dyn StageWorkflow>>,
    viewing: StageId,
}

/// Bring a fetched record in line with the catalog before it is cached.
///
/// Context approval never reaches the backend, so it is inferred from the
/// current stage; a current stage outside the catalog means the pipeline
/// finished.
pub(crate) fn normalize(machine: &ApprovalMachine, episode: &mut Episode) -> Result<()> {
    let catalog = machine.catalog();
    if catalog.get(&episode.current_stage).is_none() {
        let finished = catalog
            .stages()
            .iter()
            .all(|s| machine.is_approved(episode, &s.id));
        if !finished {
            return Err(StudioError::UnknownStage(episode.current_stage.clone()));
        }
        debug!(stage = %episode.current_stage, "pipeline finished; parking on last stage");
        episode.current_stage = catalog.last().id.clone();
    }
    if let Some(context) = machine.stage_of(StageKind::Context) {
        let before_current = catalog.order_of(context) < catalog.order_of(&episode.current_stage);
        if before_current && !episode.context.approved {
            episode.set_approved(StageKind::Context, true);
        }
    }
    Ok(())
}

impl EpisodeSession {
    pub(crate) fn open(
        backend: Arc<dyn Backend>,
        cache: CacheHandle,
        machine: Arc<ApprovalMachine>,
        registry: &StageRegistry,
        mut episode: Episode,
        settings: &EditorSettings,
    ) -> Result<Self> {
        normalize(&machine, &mut episode)?;
        if let Err(err) = machine.check_consistent(&episode) {
            warn!(episode = %episode.id, %err, "episode approval flags are inconsistent");
        }
        let viewing = episode.current_stage.clone();
        let ticket = cache.load(episode.clone());

        let mut workflows = HashMap::new();
        for stage in machine.catalog().stages() {
            let cx = StageContext::new(backend.clone(), cache.clone(), ticket.clone());
            let mut workflow = registry.build(&stage.id, cx)?;
            workflow.resume(&episode);
            workflows.insert(stage.id.clone(), workflow);
        }

        let mut session = Self {
            backend,
            cache,
            ticket,
            machine,
            workflows,
            viewing,
        };
        if let Ok(timeline) = session.timeline() {
            timeline.set_settings(settings.clone());
        }
        info!(episode = %session.ticket.episode_id(), stage = %session.viewing, "episode opened");
        Ok(session)
    }

    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    pub fn machine(&self) -> &ApprovalMachine {
        &self.machine
    }

    /// The cached episode, as long as this session still owns the cache.
    pub fn episode(&self) -> Result<Arc<Episode>> {
        if !self.cache.is_current(&self.ticket) {
            return Err(StudioError::Stale);
        }
        Ok(self.cache.get()?)
    }

    pub fn position(&self) -> Result<Position> {
        let episode = self.episode()?;
        Ok(self.machine.position(&episode))
    }

    pub fn viewing(&self) -> &StageId {
        &self.viewing
    }

    /// Switch the view to `stage`. Only stages whose predecessors are approved are reachable.
    pub fn view(&mut self, stage: &StageId) -> Result<()> {
        let episode = self.episode()?;
        let kind = self.machine.kind(stage)?;
        if !self.machine.is_reachable(&episode, stage) {
            return Err(StudioError::Incomplete(
                kind,
                "an earlier stage is not approved".into(),
            ));
        }
        self.viewing = stage.clone();
        Ok(())
    }

    /// Run the entry work of the viewed stage.
    pub async fn enter(&mut self) -> Result<()> {
        let stage = self.viewing.clone();
        self.workflow_mut(&stage)?.enter().await
    }

    pub fn workflow(&self, stage: &StageId) -> Result<&dyn StageWorkflow> {
        self.workflows
            .get(stage)
            .map(|w| w.as_ref())
            .ok_or_else(|| StudioError::UnknownStage(stage.clone()))
    }

    pub fn workflow_mut(&mut self, stage: &StageId) -> Result<&mut Box<dyn StageWorkflow>> {
        self.workflows
            .get_mut(stage)
            .ok_or_else(|| StudioError::UnknownStage(stage.clone()))
    }

    fn typed<W: Any>(&mut self, kind: StageKind) -> Result<&mut W> {
        let stage = self
            .machine
            .stage_of(kind)
            .cloned()
            .ok_or_else(|| StudioError::NotFound(format!("{kind} stage")))?;
        self.workflow_mut(&stage)?
            .as_any_mut()
            .downcast_mut::<W>()
            .ok_or_else(|| StudioError::NotFound(format!("{kind} workflow")))
    }

    pub fn context(&mut self) -> Result<&mut ContextWorkflow> {
        self.typed(StageKind::Context)
    }

    pub fn script(&mut self) -> Result<&mut ScriptWorkflow> {
        self.typed(StageKind::Script)
    }

    pub fn voice(&mut self) -> Result<&mut VoiceWorkflow> {
        self.typed(StageKind::Voice)
    }

    pub fn scenes(&mut self) -> Result<&mut ScenesWorkflow> {
        self.typed(StageKind::Scenes)
    }

    pub fn timeline(&mut self) -> Result<&mut TimelineWorkflow> {
        self.typed(StageKind::Timeline)
    }

    pub fn thumbnail(&mut self) -> Result<&mut ThumbnailWorkflow> {
        self.typed(StageKind::Thumbnail)
    }

    fn resume_all(&mut self) -> Result<()> {
        let episode = self.episode()?;
        for workflow in self.workflows.values_mut() {
            workflow.resume(&episode);
        }
        Ok(())
    }

    /// Approve `stage`, which must be current and complete. The view moves to
    /// the next stage; call [`EpisodeSession::enter`] to start it.
    pub async fn approve(&mut self, stage: &StageId) -> Result<Position> {
        let episode = self.episode()?;
        let kind = self.machine.kind(stage)?;
        let complete = self.workflow(stage)?.is_complete(&episode);
        self.machine.check_approve(&episode, stage, complete)?;

        let receipt = match kind {
            StageKind::Context => None,
            _ => Some(self.backend.approve(self.ticket.episode_id(), kind).await?),
        };

        let machine = self.machine.clone();
        let position = self
            .cache
            .mutate(&self.ticket, |ep| machine.apply_approve(ep, stage))??;
        if let Some(receipt) = receipt {
            let local = self.episode()?.current_stage.clone();
            let known = machine.catalog().get(&receipt.current_stage).is_some();
            if receipt.current_stage != local && known {
                warn!(%local, backend = %receipt.current_stage, "current stage disagrees; using backend's");
                self.cache
                    .set_current_stage(&self.ticket, receipt.current_stage)?;
            }
        }
        self.resume_all()?;
        self.viewing = self.episode()?.current_stage.clone();
        Ok(position)
    }

    pub async fn approve_current(&mut self) -> Result<Position> {
        let stage = self.episode()?.current_stage.clone();
        self.approve(&stage).await
    }

    /// Unapprove `stage` and every later stage. `stage` becomes current and viewed.
    pub async fn unapprove(&mut self, stage: &StageId) -> Result<Vec<StageId>> {
        let episode = self.episode()?;
        self.machine.check_unapprove(&episode, stage)?;
        self.backend
            .unapprove(self.ticket.episode_id(), stage)
            .await?;
        let machine = self.machine.clone();
        let reset = self
            .cache
            .mutate(&self.ticket, |ep| machine.apply_unapprove(ep, stage))??;
        self.resume_all()?;
        self.viewing = stage.clone();
        Ok(reset)
    }

    /// Replace the cached record with a fresh copy from the backend.
    pub async fn refresh(&mut self) -> Result<()> {
        let mut episode = self.backend.get_episode(self.ticket.episode_id()).await?;
        normalize(&self.machine, &mut episode)?;
        self.cache.replace(&self.ticket, episode)?;
        self.resume_all()
    }

    /// Tear the view down. Results still in flight are dropped on arrival.
    pub fn close(self) {
        debug!(episode = %self.ticket.episode_id(), "episode closed");
        self.cache.clear();
    }
}
