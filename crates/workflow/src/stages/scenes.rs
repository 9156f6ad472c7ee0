use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, info};

use episode::ordered::{self, temp_id};
use episode::{Episode, GenerationMode, Scene, StageKind};

use crate::optimistic::optimistic;
use crate::registry::{Phase, StageContext, StageWorkflow};
use crate::{Result, StudioError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenesPhase {
    /// No breakdown yet.
    Empty,
    Breaking,
    Editing,
    Generating(Option<String>),
    Approved,
}

/// Field changes for one scene. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneEdit {
    pub prompt: Option<String>,
    pub setting_id: Option<String>,
    pub character_ids: Option<Vec<String>>,
    pub line_ids: Option<Vec<String>>,
}

impl SceneEdit {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    pub fn apply(&self, scene: &mut Scene) {
        if let Some(v) = &self.prompt {
            scene.prompt = v.clone();
        }
        if let Some(v) = &self.setting_id {
            scene.setting_id = v.clone();
        }
        if let Some(v) = &self.character_ids {
            scene.character_ids = v.clone();
        }
        if let Some(v) = &self.line_ids {
            scene.line_ids = v.clone();
        }
    }
}

/// Scene breakdown and per-scene image generation.
pub struct ScenesWorkflow {
    cx: StageContext,
    phase: ScenesPhase,
}

impl ScenesWorkflow {
    pub fn new(cx: StageContext) -> Self {
        Self {
            cx,
            phase: ScenesPhase::Empty,
        }
    }

    pub fn scenes_phase(&self) -> &ScenesPhase {
        &self.phase
    }

    fn expect_editing(&self, action: &'static str) -> Result<Arc<Episode>> {
        let episode = self.cx.unlocked(StageKind::Scenes)?;
        if self.phase != ScenesPhase::Editing {
            return Err(StudioError::invalid_phase(action, &self.phase));
        }
        Ok(episode)
    }

    fn accept(&self, scenes: Vec<Scene>) -> Result<()> {
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        self.cx.cache.edit_scenes(&self.cx.ticket, |d| d.scenes = scenes)?;
        Ok(())
    }

    fn store(&self, scene: Scene) -> Result<()> {
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        self.cx.cache.edit_scenes(&self.cx.ticket, |d| {
            if let Some(slot) = d.scenes.iter_mut().find(|s| s.id == scene.id) {
                *slot = scene;
            }
        })?;
        Ok(())
    }

    pub async fn set_art_style(&mut self, art_style: &str) -> Result<()> {
        self.cx.unlocked(StageKind::Scenes)?;
        let stored = self
            .cx
            .backend
            .set_art_style(self.cx.episode_id(), art_style)
            .await?;
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        self.cx.cache.set_art_style(&self.cx.ticket, stored)?;
        Ok(())
    }

    /// Split the script into scenes with drafted prompts.
    pub async fn generate_breakdown(&mut self) -> Result<usize> {
        self.cx.unlocked(StageKind::Scenes)?;
        if self.phase != ScenesPhase::Empty {
            return Err(StudioError::invalid_phase("generate breakdown", &self.phase));
        }
        self.phase = ScenesPhase::Breaking;
        let data = match self
            .cx
            .backend
            .generate_scene_breakdown(self.cx.episode_id())
            .await
        {
            Ok(data) => data,
            Err(err) => {
                self.phase = ScenesPhase::Empty;
                return Err(err.into());
            }
        };
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        let count = data.scenes.len();
        self.cx.cache.set_scenes(&self.cx.ticket, data)?;
        info!(scenes = count, "scene breakdown generated");
        self.phase = ScenesPhase::Editing;
        Ok(count)
    }

    async fn push(&self, scenes: Vec<Scene>) -> Result<()> {
        let local = scenes.clone();
        let confirmed = optimistic(
            &self.cx.cache,
            &self.cx.ticket,
            |ep| Arc::make_mut(&mut ep.scenes).scenes = local,
            self.cx.backend.update_scenes(self.cx.episode_id(), &scenes),
        )
        .await?;
        self.accept(confirmed)
    }

    /// Edit a scene. The prompt of a scene with an image is frozen until reverted.
    pub async fn edit_scene(&mut self, scene_id: &str, change: &SceneEdit) -> Result<()> {
        let episode = self.expect_editing("edit scene")?;
        let mut scenes = episode.scenes.scenes.clone();
        let scene = scenes
            .iter_mut()
            .find(|s| s.id == scene_id)
            .ok_or_else(|| StudioError::NotFound(format!("scene {scene_id}")))?;
        let prompt_changes = change.prompt.as_ref().is_some_and(|p| *p != scene.prompt);
        if scene.generated && prompt_changes {
            return Err(StudioError::PromptLocked(scene_id.to_string()));
        }
        change.apply(scene);
        self.push(scenes).await
    }

    pub async fn edit_prompt(&mut self, scene_id: &str, prompt: &str) -> Result<()> {
        self.edit_scene(scene_id, &SceneEdit::prompt(prompt)).await
    }

    pub async fn reorder_scenes(&mut self, from: usize, to: usize) -> Result<bool> {
        let episode = self.expect_editing("reorder scenes")?;
        let mut scenes = episode.scenes.scenes.clone();
        if !ordered::reorder(&mut scenes, from, to)? {
            return Ok(false);
        }
        self.push(scenes).await?;
        Ok(true)
    }

    /// Append a scene; returns the backend-assigned id.
    pub async fn add_scene(&mut self, prompt: &str) -> Result<String> {
        let episode = self.expect_editing("add scene")?;
        let mut scene = Scene::new(temp_id("scene"), prompt);
        scene.order = episode.scenes.scenes.len();
        let scenes = self
            .cx
            .backend
            .add_scene(self.cx.episode_id(), &scene)
            .await?;
        let id = scenes
            .last()
            .map(|s| s.id.clone())
            .ok_or_else(|| StudioError::NotFound("inserted scene".into()))?;
        debug!(scene = %id, "scene added");
        self.accept(scenes)?;
        Ok(id)
    }

    /// Delete a scene. A scene with an image must be reverted first.
    pub async fn delete_scene(&mut self, scene_id: &str) -> Result<()> {
        let episode = self.expect_editing("delete scene")?;
        let scene = episode
            .scenes
            .scene(scene_id)
            .ok_or_else(|| StudioError::NotFound(format!("scene {scene_id}")))?;
        if scene.generated {
            return Err(StudioError::PromptLocked(scene_id.to_string()));
        }
        let scenes = self
            .cx
            .backend
            .delete_scene(self.cx.episode_id(), scene_id)
            .await?;
        self.accept(scenes)
    }

    pub async fn generate_image(&mut self, scene_id: &str) -> Result<Scene> {
        let episode = self.expect_editing("generate image")?;
        let scene = episode
            .scenes
            .scene(scene_id)
            .ok_or_else(|| StudioError::NotFound(format!("scene {scene_id}")))?;
        if scene.generated {
            return Err(StudioError::PromptLocked(scene_id.to_string()));
        }
        self.phase = ScenesPhase::Generating(Some(scene_id.to_string()));
        let result = self
            .cx
            .backend
            .generate_scene_image(self.cx.episode_id(), scene_id)
            .await;
        self.phase = ScenesPhase::Editing;
        let scene = result?;
        self.store(scene.clone())?;
        Ok(scene)
    }

    /// Generate every scene lacking an image, one request at a time.
    pub async fn generate_all(&mut self) -> Result<usize> {
        let episode = self.expect_editing("generate all images")?;
        let pending: Vec<String> = episode
            .scenes
            .scenes
            .iter()
            .filter(|s| !s.generated)
            .map(|s| s.id.clone())
            .collect();
        self.phase = ScenesPhase::Generating(None);
        let mut done = 0;
        for scene_id in pending {
            let result = self
                .cx
                .backend
                .generate_scene_image(self.cx.episode_id(), &scene_id)
                .await
                .map_err(StudioError::from)
                .and_then(|scene| self.store(scene));
            if let Err(err) = result {
                self.phase = ScenesPhase::Editing;
                return Err(err);
            }
            done += 1;
        }
        self.phase = ScenesPhase::Editing;
        info!(images = done, "scene batch finished");
        Ok(done)
    }

    /// Drop a scene's image, unlocking its prompt.
    pub async fn revert_image(&mut self, scene_id: &str) -> Result<()> {
        let episode = self.expect_editing("revert image")?;
        let mut scene = episode
            .scenes
            .scene(scene_id)
            .cloned()
            .ok_or_else(|| StudioError::NotFound(format!("scene {scene_id}")))?;
        self.cx
            .backend
            .revert_scene_image(self.cx.episode_id(), scene_id)
            .await?;
        scene.image_file.clear();
        scene.generated = false;
        self.store(scene)
    }

    /// Switching to auto generates every pending image straight away.
    pub async fn set_mode(&mut self, mode: GenerationMode) -> Result<usize> {
        self.expect_editing("change mode")?;
        let mode = self
            .cx
            .backend
            .set_scenes_mode(self.cx.episode_id(), mode)
            .await?;
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        self.cx.cache.edit_scenes(&self.cx.ticket, |d| d.mode = mode)?;
        match mode {
            GenerationMode::Auto => self.generate_all().await,
            GenerationMode::Manual => Ok(0),
        }
    }
}

#[async_trait]
impl StageWorkflow for ScenesWorkflow {
    fn kind(&self) -> StageKind {
        StageKind::Scenes
    }

    fn phase(&self) -> Phase {
        match self.phase {
            ScenesPhase::Empty => Phase::Draftless,
            ScenesPhase::Breaking | ScenesPhase::Generating(_) => Phase::Drafting,
            ScenesPhase::Editing => Phase::Editable,
            ScenesPhase::Approved => Phase::Locked,
        }
    }

    fn describe(&self) -> String {
        match &self.phase {
            ScenesPhase::Generating(Some(scene)) => format!("generating {scene}"),
            ScenesPhase::Generating(None) => "generating all".into(),
            other => format!("{other:?}").to_lowercase(),
        }
    }

    fn is_complete(&self, episode: &Episode) -> bool {
        let scenes = &episode.scenes.scenes;
        !scenes.is_empty() && scenes.iter().all(|s| s.generated)
    }

    fn resume(&mut self, episode: &Episode) {
        self.phase = if episode.scenes.approved {
            ScenesPhase::Approved
        } else if !episode.scenes.scenes.is_empty() {
            ScenesPhase::Editing
        } else {
            ScenesPhase::Empty
        };
    }

    async fn enter(&mut self) -> Result<()> {
        let episode = self.cx.episode()?;
        self.resume(&episode);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
