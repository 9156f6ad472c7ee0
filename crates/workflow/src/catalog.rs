use std::collections::HashSet;

use backend::StageDescriptor;
use episode::StageId;

use crate::{Result, StudioError};

/// The backend-declared pipeline, sorted by `order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCatalog {
    stages: Vec<StageDescriptor>,
}

impl StageCatalog {
    /// Orders must be unique, contiguous, and start at zero.
    pub fn new(mut stages: Vec<StageDescriptor>) -> Result<Self> {
        if stages.is_empty() {
            return Err(StudioError::InvalidCatalog("no stages".into()));
        }
        stages.sort_by_key(|s| s.order);
        let mut ids = HashSet::new();
        for (i, stage) in stages.iter().enumerate() {
            if stage.order != i {
                return Err(StudioError::InvalidCatalog(format!(
                    "stage {} has order {}, expected {}",
                    stage.id, stage.order, i
                )));
            }
            if !ids.insert(stage.id.clone()) {
                return Err(StudioError::InvalidCatalog(format!(
                    "duplicate stage id {}",
                    stage.id
                )));
            }
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn first(&self) -> &StageDescriptor {
        &self.stages[0]
    }

    pub fn last(&self) -> &StageDescriptor {
        &self.stages[self.stages.len() - 1]
    }

    pub fn get(&self, id: &StageId) -> Option<&StageDescriptor> {
        self.stages.iter().find(|s| s.id == *id)
    }

    pub fn order_of(&self, id: &StageId) -> Option<usize> {
        self.get(id).map(|s| s.order)
    }

    pub fn by_order(&self, order: usize) -> Option<&StageDescriptor> {
        self.stages.get(order)
    }

    pub fn next(&self, id: &StageId) -> Option<&StageDescriptor> {
        self.order_of(id).and_then(|o| self.by_order(o + 1))
    }

    pub fn before(&self, id: &StageId) -> &[StageDescriptor] {
        match self.order_of(id) {
            Some(o) => &self.stages[..o],
            None => &[],
        }
    }

    pub fn after(&self, id: &StageId) -> &[StageDescriptor] {
        match self.order_of(id) {
            Some(o) => &self.stages[o + 1..],
            None => &[],
        }
    }
}
