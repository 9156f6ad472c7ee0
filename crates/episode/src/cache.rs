use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    ContextData, Episode, EpisodeId, ScenesData, ScriptData, StageId, ThumbnailData, TimelineData,
    VoiceData,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("no episode is loaded")]
    Empty,
    #[error("result arrived after the episode view was replaced")]
    Stale,
}

/// Proof that a flow started against the currently loaded episode.
///
/// Loading another episode or clearing the cache invalidates every ticket,
/// so late responses from abandoned flows are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    epoch: u64,
    episode_id: EpisodeId,
}

impl Ticket {
    pub fn episode_id(&self) -> &EpisodeId {
        &self.episode_id
    }
}

/// Pre-mutation copy used to undo an optimistic update.
#[derive(Debug, Clone)]
pub struct Snapshot {
    ticket: Ticket,
    episode: Arc<Episode>,
}

impl Snapshot {
    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    pub fn episode(&self) -> &Arc<Episode> {
        &self.episode
    }
}

#[derive(Debug, Default)]
struct EpisodeCache {
    episode: Option<Arc<Episode>>,
    epoch: u64,
}

impl EpisodeCache {
    fn check(&self, ticket: &Ticket) -> Result<(), CacheError> {
        match &self.episode {
            _ if ticket.epoch != self.epoch => Err(CacheError::Stale),
            Some(ep) if ep.id == ticket.episode_id => Ok(()),
            Some(_) => Err(CacheError::Stale),
            None => Err(CacheError::Empty),
        }
    }
}

/// Shared handle to the single in-memory episode.
#[derive(Debug, Clone, Default)]
pub struct CacheHandle(Arc<Mutex<EpisodeCache>>);

impl CacheHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a freshly fetched episode, invalidating outstanding tickets.
    pub fn load(&self, episode: Episode) -> Ticket {
        let mut cache = self.0.lock();
        cache.epoch += 1;
        let ticket = Ticket {
            epoch: cache.epoch,
            episode_id: episode.id.clone(),
        };
        debug!(episode = %episode.id, epoch = cache.epoch, "episode loaded into cache");
        cache.episode = Some(Arc::new(episode));
        ticket
    }

    /// Drop the episode, e.g. when its view is torn down.
    pub fn clear(&self) {
        let mut cache = self.0.lock();
        cache.epoch += 1;
        cache.episode = None;
    }

    pub fn ticket(&self) -> Result<Ticket, CacheError> {
        let cache = self.0.lock();
        let ep = cache.episode.as_ref().ok_or(CacheError::Empty)?;
        Ok(Ticket {
            epoch: cache.epoch,
            episode_id: ep.id.clone(),
        })
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.0.lock().check(ticket).is_ok()
    }

    pub fn current(&self) -> Option<Arc<Episode>> {
        self.0.lock().episode.clone()
    }

    pub fn get(&self) -> Result<Arc<Episode>, CacheError> {
        self.current().ok_or(CacheError::Empty)
    }

    pub fn snapshot(&self, ticket: &Ticket) -> Result<Snapshot, CacheError> {
        let cache = self.0.lock();
        cache.check(ticket)?;
        let episode = cache.episode.clone().ok_or(CacheError::Empty)?;
        Ok(Snapshot {
            ticket: ticket.clone(),
            episode,
        })
    }

    /// Put back a snapshot. Refuses if the episode has been replaced since.
    pub fn restore(&self, snapshot: Snapshot) -> Result<(), CacheError> {
        let mut cache = self.0.lock();
        cache.check(&snapshot.ticket)?;
        warn!(episode = %snapshot.ticket.episode_id, "rolling back optimistic update");
        cache.episode = Some(snapshot.episode);
        Ok(())
    }

    /// Copy-on-write mutation of the loaded episode.
    pub fn mutate<R>(
        &self,
        ticket: &Ticket,
        f: impl FnOnce(&mut Episode) -> R,
    ) -> Result<R, CacheError> {
        let mut cache = self.0.lock();
        cache.check(ticket)?;
        let slot = cache.episode.as_mut().ok_or(CacheError::Empty)?;
        Ok(f(Arc::make_mut(slot)))
    }

    /// Replace the whole record with an authoritative copy of the same episode.
    pub fn replace(&self, ticket: &Ticket, episode: Episode) -> Result<(), CacheError> {
        let mut cache = self.0.lock();
        cache.check(ticket)?;
        if episode.id != ticket.episode_id {
            return Err(CacheError::Stale);
        }
        cache.episode = Some(Arc::new(episode));
        Ok(())
    }

    pub fn set_current_stage(&self, ticket: &Ticket, stage: StageId) -> Result<(), CacheError> {
        self.mutate(ticket, |ep| {
            if ep.current_stage != stage {
                ep.current_stage = stage;
            }
        })
    }

    pub fn set_art_style(&self, ticket: &Ticket, art_style: String) -> Result<(), CacheError> {
        self.mutate(ticket, |ep| ep.art_style = art_style)
    }

    pub fn set_context(&self, ticket: &Ticket, data: ContextData) -> Result<(), CacheError> {
        self.mutate(ticket, |ep| ep.context = Arc::new(data))
    }

    pub fn set_script(&self, ticket: &Ticket, data: ScriptData) -> Result<(), CacheError> {
        self.mutate(ticket, |ep| ep.script = Arc::new(data))
    }

    pub fn set_voice(&self, ticket: &Ticket, data: VoiceData) -> Result<(), CacheError> {
        self.mutate(ticket, |ep| ep.voice = Arc::new(data))
    }

    pub fn set_scenes(&self, ticket: &Ticket, data: ScenesData) -> Result<(), CacheError> {
        self.mutate(ticket, |ep| ep.scenes = Arc::new(data))
    }

    pub fn set_timeline(&self, ticket: &Ticket, data: TimelineData) -> Result<(), CacheError> {
        self.mutate(ticket, |ep| ep.timeline = Arc::new(data))
    }

    pub fn set_thumbnail(&self, ticket: &Ticket, data: ThumbnailData) -> Result<(), CacheError> {
        self.mutate(ticket, |ep| ep.thumbnail = Arc::new(data))
    }

    pub fn edit_script<R>(
        &self,
        ticket: &Ticket,
        f: impl FnOnce(&mut ScriptData) -> R,
    ) -> Result<R, CacheError> {
        self.mutate(ticket, |ep| f(Arc::make_mut(&mut ep.script)))
    }

    pub fn edit_voice<R>(
        &self,
        ticket: &Ticket,
        f: impl FnOnce(&mut VoiceData) -> R,
    ) -> Result<R, CacheError> {
        self.mutate(ticket, |ep| f(Arc::make_mut(&mut ep.voice)))
    }

    pub fn edit_scenes<R>(
        &self,
        ticket: &Ticket,
        f: impl FnOnce(&mut ScenesData) -> R,
    ) -> Result<R, CacheError> {
        self.mutate(ticket, |ep| f(Arc::make_mut(&mut ep.scenes)))
    }

    pub fn edit_timeline<R>(
        &self,
        ticket: &Ticket,
        f: impl FnOnce(&mut TimelineData) -> R,
    ) -> Result<R, CacheError> {
        self.mutate(ticket, |ep| f(Arc::make_mut(&mut ep.timeline)))
    }

    pub fn edit_thumbnail<R>(
        &self,
        ticket: &Ticket,
        f: impl FnOnce(&mut ThumbnailData) -> R,
    ) -> Result<R, CacheError> {
        self.mutate(ticket, |ep| f(Arc::make_mut(&mut ep.thumbnail)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ScriptLine, StageKind};

    fn episode(id: &str) -> Episode {
        let mut ep = Episode::new(id, "Episode 1", StageKind::Context.default_id());
        Arc::make_mut(&mut ep.script).lines = vec![ScriptLine::new("l1", "mom")];
        ep
    }

    #[test]
    fn bundle_update_replaces_only_its_branch() {
        let cache = CacheHandle::new();
        let ticket = cache.load(episode("ep1"));
        let before = cache.get().unwrap();

        cache
            .edit_script(&ticket, |s| s.lines[0].text_en = "Hi".into())
            .unwrap();
        let after = cache.get().unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert!(!Arc::ptr_eq(&before.script, &after.script));
        assert!(Arc::ptr_eq(&before.voice, &after.voice));
        assert!(Arc::ptr_eq(&before.context, &after.context));
        assert_eq!(before.script.lines[0].text_en, "");
        assert_eq!(after.script.lines[0].text_en, "Hi");
    }

    #[test]
    fn restore_puts_back_exact_snapshot() {
        let cache = CacheHandle::new();
        let ticket = cache.load(episode("ep1"));
        let snap = cache.snapshot(&ticket).unwrap();
        cache
            .edit_script(&ticket, |s| s.lines[0].text_zh = "改".into())
            .unwrap();
        cache.restore(snap).unwrap();
        assert_eq!(cache.get().unwrap().script.lines[0].text_zh, "");
    }

    #[test]
    fn tickets_go_stale_after_reload_or_clear() {
        let cache = CacheHandle::new();
        let old = cache.load(episode("ep1"));
        let snap = cache.snapshot(&old).unwrap();
        let fresh = cache.load(episode("ep2"));

        assert!(!cache.is_current(&old));
        assert!(cache.is_current(&fresh));
        assert_eq!(
            cache.set_script(&old, ScriptData::default()),
            Err(CacheError::Stale)
        );
        assert_eq!(cache.restore(snap), Err(CacheError::Stale));
        assert_eq!(cache.get().unwrap().id.as_str(), "ep2");

        cache.clear();
        assert!(!cache.is_current(&fresh));
        assert_eq!(cache.ticket(), Err(CacheError::Empty));
    }

    #[test]
    fn replace_rejects_foreign_episode() {
        let cache = CacheHandle::new();
        let ticket = cache.load(episode("ep1"));
        assert_eq!(
            cache.replace(&ticket, episode("ep9")),
            Err(CacheError::Stale)
        );
        assert!(cache.replace(&ticket, episode("ep1")).is_ok());
    }
}
