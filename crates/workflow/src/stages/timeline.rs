use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, info, warn};

use backend::ClipPatch;
use episode::{Episode, IntroData, IntroPatch, StageKind, TimelineData};
use timeline::{
    clips_on, find_clip, find_clip_mut, overlapping_pairs, ruler_ticks, set_zoom, to_srt,
    validate_clips, CaptionText, ClipEdit, ClipHit, EditorSettings, GestureMachine, Millis,
    ProgramDuration, Settlement, TimelineClip, TimelineError, TrackKind, ZoomEdge,
};

use crate::optimistic::{optimistic, Transaction};
use crate::registry::{Phase, StageContext, StageWorkflow};
use crate::{Result, StudioError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelinePhase {
    Uninitialized,
    Initializing,
    Editing,
    Exporting,
    Approved,
}

/// Clip layout, gestures, zoom, intro and export.
pub struct TimelineWorkflow {
    cx: StageContext,
    phase: TimelinePhase,
    gesture: GestureMachine,
    /// Pre-gesture state, restored if the commit fails or the gesture is cancelled.
    pending: Option<Transaction>,
}

impl TimelineWorkflow {
    pub fn new(cx: StageContext) -> Self {
        Self::with_settings(cx, EditorSettings::default())
    }

    pub fn with_settings(cx: StageContext, settings: EditorSettings) -> Self {
        Self {
            cx,
            phase: TimelinePhase::Uninitialized,
            gesture: GestureMachine::new(settings),
            pending: None,
        }
    }

    pub fn timeline_phase(&self) -> TimelinePhase {
        self.phase
    }

    pub fn gesture(&self) -> &GestureMachine {
        &self.gesture
    }

    pub fn settings(&self) -> &EditorSettings {
        self.gesture.settings()
    }

    pub fn set_settings(&mut self, settings: EditorSettings) {
        *self.gesture.settings_mut() = settings;
    }

    pub fn selected_clip(&self) -> Option<&str> {
        self.gesture.selection().selected()
    }

    /// Horizontal zoom of the editor; returns the clamped value.
    pub fn set_pixels_per_second(&mut self, pixels_per_second: f64) -> f64 {
        self.gesture
            .settings_mut()
            .set_pixels_per_second(pixels_per_second)
            .pixels_per_second()
    }

    fn expect_editing(&self, action: &'static str) -> Result<Arc<Episode>> {
        let episode = self.cx.unlocked(StageKind::Timeline)?;
        if self.phase != TimelinePhase::Editing {
            return Err(StudioError::invalid_phase(action, self.phase));
        }
        Ok(episode)
    }

    /// Lay out clips from the voiced lines and generated scenes.
    pub async fn initialize(&mut self) -> Result<()> {
        self.cx.unlocked(StageKind::Timeline)?;
        let prior = self.phase;
        self.phase = TimelinePhase::Initializing;
        let data = match self.cx.backend.initialize_timeline(self.cx.episode_id()).await {
            Ok(data) => data,
            Err(err) => {
                self.phase = prior;
                return Err(err.into());
            }
        };
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        info!(clips = data.clips.len(), total_ms = data.total_duration_ms, "timeline laid out");
        self.cx.cache.set_timeline(&self.cx.ticket, data)?;
        self.phase = TimelinePhase::Editing;
        Ok(())
    }

    /// Build the pointer target for `x` on `track` from the cached layout.
    pub fn hit_test(&self, track: TrackKind, x: f64) -> Result<Option<ClipHit>> {
        let episode = self.cx.episode()?;
        let scale = self.gesture.settings().scale();
        let hit = clips_on(&episode.timeline.clips, track)
            .into_iter()
            .rev()
            .find_map(|clip| {
                let (left, width) = scale.clip_extent(clip.start_ms, clip.duration_ms);
                (x >= left && x <= left + width).then(|| ClipHit {
                    clip_id: clip.id.clone(),
                    track,
                    start_ms: clip.start_ms,
                    duration_ms: clip.duration_ms,
                    offset_px: x - left,
                    width_px: width,
                })
            });
        Ok(hit)
    }

    fn apply_local(&self, edit: &ClipEdit) -> Result<()> {
        self.cx
            .cache
            .edit_timeline(&self.cx.ticket, |t| apply_edit(t, edit))??;
        Ok(())
    }

    /// A gesture left unsettled is rolled back before the next one starts.
    pub fn pointer_down(&mut self, hit: Option<ClipHit>, x: f64) -> Result<()> {
        self.expect_editing("start gesture")?;
        if self.pending.is_some() || self.gesture.is_active() {
            debug!("unsettled gesture cancelled by a new pointer down");
            self.cancel_gesture();
        }
        if hit.is_some() {
            self.pending = Some(Transaction::begin(&self.cx.cache, &self.cx.ticket)?);
        }
        self.gesture.pointer_down(hit, x);
        Ok(())
    }

    /// Live geometry is written to the cache, uncommitted.
    pub fn pointer_move(&mut self, x: f64) -> Result<Option<ClipEdit>> {
        let edit = self.gesture.pointer_move(x);
        if let Some(edit) = &edit {
            self.apply_local(edit)?;
        }
        Ok(edit)
    }

    /// Settle the gesture; an edit is persisted with a single clip update.
    pub async fn pointer_up(&mut self, x: f64) -> Result<Settlement> {
        let settlement = self.gesture.pointer_up(x);
        let tx = self.pending.take();
        match (&settlement, tx) {
            (Settlement::Committed(edit), Some(tx)) => {
                let applied = tx.apply(|ep| apply_edit(Arc::make_mut(&mut ep.timeline), edit))?;
                if let Err(err) = applied {
                    tx.rollback();
                    return Err(err.into());
                }
                let patch = ClipPatch::geometry(edit.start_ms, edit.duration_ms);
                let stored = tx
                    .confirm(
                        self.cx
                            .backend
                            .update_clip(self.cx.episode_id(), &edit.clip_id, &patch),
                    )
                    .await?;
                self.store_clip(stored)?;
                debug!(clip = %edit.clip_id, start_ms = edit.start_ms, duration_ms = edit.duration_ms, "clip committed");
            }
            (Settlement::Committed(_), None) => {
                warn!("gesture committed without a pre-gesture snapshot");
            }
            (_, Some(tx)) => tx.rollback(),
            (_, None) => {}
        }
        Ok(settlement)
    }

    /// Abort a gesture, putting the clip back where it started.
    pub fn cancel_gesture(&mut self) -> Option<ClipEdit> {
        let original = self.gesture.cancel();
        if let Some(tx) = self.pending.take() {
            tx.rollback();
        }
        original
    }

    fn store_clip(&self, clip: TimelineClip) -> Result<()> {
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        self.cx.cache.edit_timeline(&self.cx.ticket, |t| {
            find_clip_mut(&mut t.clips, &clip.id).map(|slot| *slot = clip)
        })??;
        Ok(())
    }

    /// Move or resize a clip directly, as a committed gesture would.
    pub async fn update_clip(&mut self, edit: &ClipEdit) -> Result<()> {
        let episode = self.expect_editing("edit clip")?;
        if find_clip(&episode.timeline.clips, &edit.clip_id).is_none() {
            return Err(TimelineError::ClipNotFound(edit.clip_id.clone()).into());
        }
        let patch = ClipPatch::geometry(edit.start_ms, edit.duration_ms);
        let local = edit.clone();
        let stored = optimistic(
            &self.cx.cache,
            &self.cx.ticket,
            |ep| {
                // Presence was checked above.
                let _ = apply_edit(Arc::make_mut(&mut ep.timeline), &local);
            },
            self.cx
                .backend
                .update_clip(self.cx.episode_id(), &edit.clip_id, &patch),
        )
        .await?;
        self.store_clip(stored)
    }

    /// Set one end of a scene clip's zoom ramp. Values outside [1.0, 2.0] are clamped.
    pub async fn set_zoom(&mut self, clip_id: &str, edge: ZoomEdge, value: f64) -> Result<f64> {
        let episode = self.expect_editing("set zoom")?;
        let mut clip = find_clip(&episode.timeline.clips, clip_id)
            .cloned()
            .ok_or_else(|| TimelineError::ClipNotFound(clip_id.to_string()))?;
        let stored = set_zoom(&mut clip, edge, value)?;
        let patch = match edge {
            ZoomEdge::Start => ClipPatch {
                zoom_start: Some(stored),
                ..ClipPatch::default()
            },
            ZoomEdge::End => ClipPatch {
                zoom_end: Some(stored),
                ..ClipPatch::default()
            },
        };
        let local = clip.clone();
        let confirmed = optimistic(
            &self.cx.cache,
            &self.cx.ticket,
            |ep| {
                let timeline = Arc::make_mut(&mut ep.timeline);
                if let Ok(slot) = find_clip_mut(&mut timeline.clips, &local.id) {
                    *slot = local;
                    timeline.invalidate_export();
                }
            },
            self.cx.backend.update_clip(self.cx.episode_id(), clip_id, &patch),
        )
        .await?;
        self.store_clip(confirmed)?;
        Ok(stored)
    }

    /// Push the whole clip list, e.g. after several local edits.
    pub async fn save(&mut self) -> Result<()> {
        let episode = self.expect_editing("save timeline")?;
        let clips = episode.timeline.clips.clone();
        validate_clips(&clips, self.settings().min_clip_duration_ms)?;
        let stored = self
            .cx
            .backend
            .update_clips(self.cx.episode_id(), &clips)
            .await?;
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        self.cx.cache.edit_timeline(&self.cx.ticket, |t| {
            if t.clips != stored {
                t.invalidate_export();
            }
            t.clips = stored;
        })?;
        Ok(())
    }

    pub async fn update_intro(&mut self, patch: &IntroPatch) -> Result<IntroData> {
        self.expect_editing("edit intro")?;
        let intro = self
            .cx
            .backend
            .update_intro(self.cx.episode_id(), patch)
            .await?;
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        let stored = intro.clone();
        self.cx
            .cache
            .edit_timeline(&self.cx.ticket, |t| t.intro = Some(stored))?;
        Ok(intro)
    }

    /// Render the program. The reported duration becomes authoritative.
    pub async fn export(&mut self) -> Result<String> {
        let episode = self.expect_editing("export")?;
        validate_clips(&episode.timeline.clips, self.settings().min_clip_duration_ms)?;
        self.phase = TimelinePhase::Exporting;
        let result = self.cx.backend.export_timeline(self.cx.episode_id()).await;
        self.phase = TimelinePhase::Editing;
        let receipt = result?;
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        info!(output = %receipt.output_file, total_ms = receipt.total_duration_ms, "timeline exported");
        let output = receipt.output_file.clone();
        self.cx.cache.edit_timeline(&self.cx.ticket, |t| {
            t.output_file = receipt.output_file;
            t.total_duration_ms = receipt.total_duration_ms;
        })?;
        Ok(output)
    }

    pub fn duration(&self) -> Result<ProgramDuration> {
        let episode = self.cx.episode()?;
        let timeline = &episode.timeline;
        let exported = timeline
            .is_exported()
            .then_some(timeline.total_duration_ms);
        Ok(ProgramDuration::resolve(&timeline.clips, exported))
    }

    /// Ruler tick positions, in seconds, at the current scale.
    pub fn ruler(&self) -> Result<Vec<u64>> {
        let duration = self.duration()?;
        Ok(ruler_ticks(
            duration.ms(),
            self.settings().scale().pixels_per_second(),
        ))
    }

    pub fn overlaps(&self, track: TrackKind) -> Result<Vec<(String, String)>> {
        let episode = self.cx.episode()?;
        Ok(overlapping_pairs(&episode.timeline.clips, track))
    }

    /// SubRip captions for the audio track, shifted by `offset_ms`.
    pub fn captions(&self, offset_ms: Millis) -> Result<String> {
        let episode = self.cx.episode()?;
        Ok(captions_for(&episode, offset_ms))
    }
}

/// Move or resize one clip in place. The previous render no longer matches.
fn apply_edit(
    timeline: &mut TimelineData,
    edit: &ClipEdit,
) -> std::result::Result<(), TimelineError> {
    find_clip_mut(&mut timeline.clips, &edit.clip_id)?.apply(edit);
    timeline.invalidate_export();
    Ok(())
}

/// SubRip captions for an episode's audio clips.
pub fn captions_for(episode: &Episode, offset_ms: Millis) -> String {
    to_srt(&episode.timeline.clips, offset_ms, |line_id| {
        episode.line(line_id).map(|line| CaptionText {
            zh: line.text_zh.clone(),
            pinyin: line.text_pinyin.clone(),
            en: line.text_en.clone(),
        })
    })
}

#[async_trait]
impl StageWorkflow for TimelineWorkflow {
    fn kind(&self) -> StageKind {
        StageKind::Timeline
    }

    fn phase(&self) -> Phase {
        match self.phase {
            TimelinePhase::Uninitialized => Phase::Draftless,
            TimelinePhase::Initializing | TimelinePhase::Exporting => Phase::Drafting,
            TimelinePhase::Editing => Phase::Editable,
            TimelinePhase::Approved => Phase::Locked,
        }
    }

    fn describe(&self) -> String {
        if self.gesture.is_active() {
            return "editing (gesture)".into();
        }
        format!("{:?}", self.phase).to_lowercase()
    }

    /// Needs a render of the current layout; geometry and zoom edits discard the last one.
    fn is_complete(&self, episode: &Episode) -> bool {
        let timeline = &episode.timeline;
        timeline.is_exported()
            && validate_clips(&timeline.clips, self.settings().min_clip_duration_ms).is_ok()
    }

    fn resume(&mut self, episode: &Episode) {
        self.phase = if episode.timeline.approved {
            TimelinePhase::Approved
        } else if !episode.timeline.clips.is_empty() {
            TimelinePhase::Editing
        } else {
            TimelinePhase::Uninitialized
        };
        if let Some(selected) = self.selected_clip().map(str::to_string) {
            if find_clip(&episode.timeline.clips, &selected).is_none() {
                self.gesture.forget(&selected);
            }
        }
    }

    async fn enter(&mut self) -> Result<()> {
        let episode = self.cx.episode()?;
        if episode.timeline.approved {
            self.phase = TimelinePhase::Approved;
            return Ok(());
        }
        if episode.timeline.clips.is_empty() {
            return self.initialize().await;
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use episode::ScriptLine;

    #[test]
    fn captions_use_script_text() {
        let mut ep = Episode::new("ep1", "", StageKind::Timeline.default_id());
        Arc::make_mut(&mut ep.script).lines =
            vec![ScriptLine::new("l1", "mom").with_text("早上好", "zǎo shang hǎo", "Good morning")];
        Arc::make_mut(&mut ep.timeline).clips = vec![
            TimelineClip::scene("c0", "s1", 0, 4000),
            TimelineClip::audio("c1", "l1", 500, 1300),
            TimelineClip::audio("c2", "gone", 2100, 800),
        ];
        let srt = captions_for(&ep, 3000);
        assert_eq!(
            srt,
            "1\n00:00:03,500 --> 00:00:04,800\n早上好\nzǎo shang hǎo\nGood morning\n\n"
        );
    }
}
