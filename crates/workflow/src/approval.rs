//! Stage approval state machine, driven by the runtime catalog.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use episode::{Episode, StageId, StageKind};

use crate::{Result, StageCatalog, StudioError};

/// Where an episode sits in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum Position {
    Stage(StageId),
    /// Every stage is approved.
    Complete,
}

#[derive(Debug, Clone)]
pub struct ApprovalMachine {
    catalog: StageCatalog,
    kinds: HashMap<StageId, StageKind>,
}

impl ApprovalMachine {
    /// Bind every catalog stage to the bundle it owns.
    pub fn new(
        catalog: StageCatalog,
        kind_of: impl Fn(&StageId) -> Option<StageKind>,
    ) -> Result<Self> {
        let mut kinds = HashMap::new();
        for stage in catalog.stages() {
            let kind = kind_of(&stage.id).ok_or_else(|| StudioError::UnknownStage(stage.id.clone()))?;
            kinds.insert(stage.id.clone(), kind);
        }
        Ok(Self { catalog, kinds })
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    pub fn kind(&self, stage: &StageId) -> Result<StageKind> {
        self.kinds
            .get(stage)
            .copied()
            .ok_or_else(|| StudioError::UnknownStage(stage.clone()))
    }

    pub fn stage_of(&self, kind: StageKind) -> Option<&StageId> {
        self.catalog
            .stages()
            .iter()
            .map(|s| &s.id)
            .find(|id| self.kinds.get(*id) == Some(&kind))
    }

    pub fn is_approved(&self, episode: &Episode, stage: &StageId) -> bool {
        self.kinds
            .get(stage)
            .is_some_and(|k| episode.is_approved(*k))
    }

    pub fn position(&self, episode: &Episode) -> Position {
        let all = self
            .catalog
            .stages()
            .iter()
            .all(|s| self.is_approved(episode, &s.id));
        if all {
            Position::Complete
        } else {
            Position::Stage(episode.current_stage.clone())
        }
    }

    /// A stage may be viewed once every stage before it is approved.
    pub fn is_reachable(&self, episode: &Episode, stage: &StageId) -> bool {
        self.catalog.get(stage).is_some()
            && self
                .catalog
                .before(stage)
                .iter()
                .all(|s| self.is_approved(episode, &s.id))
    }

    /// Reject mutations of an approved bundle.
    pub fn ensure_mutable(&self, episode: &Episode, kind: StageKind) -> Result<()> {
        if episode.is_approved(kind) {
            return Err(StudioError::StageLocked(kind));
        }
        Ok(())
    }

    /// Checks `approve(stage)` is legal, given the stage's completion predicate.
    pub fn check_approve(&self, episode: &Episode, stage: &StageId, complete: bool) -> Result<()> {
        let kind = self.kind(stage)?;
        if self.position(episode) == Position::Complete
            || episode.current_stage != *stage
            || episode.is_approved(kind)
        {
            return Err(StudioError::NotCurrentStage {
                stage: stage.clone(),
                current: match self.position(episode) {
                    Position::Stage(id) => id.to_string(),
                    Position::Complete => "complete".into(),
                },
            });
        }
        if !self.is_reachable(episode, stage) {
            return Err(StudioError::Incomplete(
                kind,
                "an earlier stage is not approved".into(),
            ));
        }
        if !complete {
            return Err(StudioError::Incomplete(
                kind,
                "completion requirements not met".into(),
            ));
        }
        Ok(())
    }

    /// Mark `stage` approved and advance. Returns the new position.
    pub fn apply_approve(&self, episode: &mut Episode, stage: &StageId) -> Result<Position> {
        let kind = self.kind(stage)?;
        episode.set_approved(kind, true);
        if let Some(next) = self.catalog.next(stage) {
            episode.current_stage = next.id.clone();
        }
        let position = self.position(episode);
        info!(episode = %episode.id, %stage, ?position, "stage approved");
        Ok(position)
    }

    pub fn check_unapprove(&self, episode: &Episode, stage: &StageId) -> Result<()> {
        let kind = self.kind(stage)?;
        if !episode.is_approved(kind) {
            return Err(StudioError::InvalidPhase {
                action: "unapprove",
                phase: format!("{kind} not approved"),
            });
        }
        Ok(())
    }

    /// Unapprove `stage` and everything after it; `stage` becomes current.
    pub fn apply_unapprove(&self, episode: &mut Episode, stage: &StageId) -> Result<Vec<StageId>> {
        let kind = self.kind(stage)?;
        let mut reset = Vec::new();
        if episode.is_approved(kind) {
            reset.push(stage.clone());
        }
        episode.set_approved(kind, false);
        for later in self.catalog.after(stage) {
            let later_kind = self.kind(&later.id)?;
            if episode.is_approved(later_kind) {
                reset.push(later.id.clone());
            }
            episode.set_approved(later_kind, false);
        }
        episode.current_stage = stage.clone();
        info!(episode = %episode.id, %stage, ?reset, "stage unapproved");
        Ok(reset)
    }

    /// Checks the one-current-stage invariant against the approval flags.
    pub fn check_consistent(&self, episode: &Episode) -> Result<()> {
        let current = self
            .catalog
            .order_of(&episode.current_stage)
            .ok_or_else(|| StudioError::UnknownStage(episode.current_stage.clone()))?;
        for stage in self.catalog.stages() {
            let approved = self.is_approved(episode, &stage.id);
            let last = stage.order + 1 == self.catalog.len();
            let ok = if stage.order < current {
                approved
            } else if stage.order > current {
                !approved
            } else {
                !approved || last
            };
            if !ok {
                return Err(StudioError::InvalidCatalog(format!(
                    "stage {} approval flag contradicts current stage {}",
                    stage.id, episode.current_stage
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::StageDescriptor;

    fn machine() -> ApprovalMachine {
        let stages = StageKind::ALL
            .iter()
            .enumerate()
            .map(|(order, k)| StageDescriptor {
                id: k.default_id(),
                order,
                name: k.label().into(),
            })
            .collect();
        ApprovalMachine::new(StageCatalog::new(stages).unwrap(), |id| {
            StageKind::ALL.into_iter().find(|k| k.default_id() == *id)
        })
        .unwrap()
    }

    fn id(kind: StageKind) -> StageId {
        kind.default_id()
    }

    fn fresh() -> Episode {
        Episode::new("ep1", "Episode 1", id(StageKind::Context))
    }

    #[test]
    fn approve_requires_current_stage_and_predicate() {
        let m = machine();
        let mut ep = fresh();
        assert!(matches!(
            m.check_approve(&ep, &id(StageKind::Script), true),
            Err(StudioError::NotCurrentStage { .. })
        ));
        assert!(matches!(
            m.check_approve(&ep, &id(StageKind::Context), false),
            Err(StudioError::Incomplete(StageKind::Context, _))
        ));
        m.check_approve(&ep, &id(StageKind::Context), true).unwrap();
        let pos = m.apply_approve(&mut ep, &id(StageKind::Context)).unwrap();
        assert_eq!(pos, Position::Stage(id(StageKind::Script)));
        m.check_consistent(&ep).unwrap();
    }

    #[test]
    fn approving_every_stage_completes() {
        let m = machine();
        let mut ep = fresh();
        for kind in StageKind::ALL {
            m.check_approve(&ep, &id(kind), true).unwrap();
            m.apply_approve(&mut ep, &id(kind)).unwrap();
            m.check_consistent(&ep).unwrap();
        }
        assert_eq!(m.position(&ep), Position::Complete);
        assert!(m
            .check_approve(&ep, &id(StageKind::Thumbnail), true)
            .is_err());
    }

    #[test]
    fn unapprove_cascades_to_later_stages() {
        let m = machine();
        let mut ep = fresh();
        for kind in &StageKind::ALL[..4] {
            m.apply_approve(&mut ep, &id(*kind)).unwrap();
        }
        assert_eq!(ep.current_stage, id(StageKind::Timeline));

        let reset = m.apply_unapprove(&mut ep, &id(StageKind::Script)).unwrap();
        assert_eq!(
            reset,
            vec![id(StageKind::Script), id(StageKind::Voice), id(StageKind::Scenes)]
        );
        assert_eq!(ep.current_stage, id(StageKind::Script));
        for kind in &StageKind::ALL[1..] {
            assert!(!ep.is_approved(*kind), "{kind} still approved");
        }
        assert!(ep.is_approved(StageKind::Context));
        m.check_consistent(&ep).unwrap();
    }

    #[test]
    fn unapprove_of_unapproved_stage_is_rejected() {
        let m = machine();
        let ep = fresh();
        assert!(m.check_unapprove(&ep, &id(StageKind::Voice)).is_err());
    }

    #[test]
    fn unknown_catalog_stage_is_rejected() {
        let catalog = StageCatalog::new(vec![StageDescriptor {
            id: "stage_9_music".into(),
            order: 0,
            name: "Music".into(),
        }])
        .unwrap();
        assert!(matches!(
            ApprovalMachine::new(catalog, |_| None),
            Err(StudioError::UnknownStage(_))
        ));
    }

    #[test]
    fn reachability_follows_approvals() {
        let m = machine();
        let mut ep = fresh();
        assert!(m.is_reachable(&ep, &id(StageKind::Context)));
        assert!(!m.is_reachable(&ep, &id(StageKind::Script)));
        m.apply_approve(&mut ep, &id(StageKind::Context)).unwrap();
        assert!(m.is_reachable(&ep, &id(StageKind::Script)));
        assert!(m.ensure_mutable(&ep, StageKind::Context).is_err());
        assert!(m.ensure_mutable(&ep, StageKind::Script).is_ok());
    }
}
