use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{moved_start, resized_duration, EditorSettings, Millis, TrackKind};

/// New geometry for one clip, produced by a gesture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipEdit {
    pub clip_id: String,
    pub start_ms: Millis,
    pub duration_ms: Millis,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DragMode {
    Move,
    Resize,
}

/// What the pointer landed on when a gesture began.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipHit {
    pub clip_id: String,
    pub track: TrackKind,
    pub start_ms: Millis,
    pub duration_ms: Millis,
    /// Pointer x relative to the clip's left edge.
    pub offset_px: f64,
    pub width_px: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DragState {
    pub clip_id: String,
    pub track: TrackKind,
    pub mode: DragMode,
    pub start_mouse_x: f64,
    pub orig_start_ms: Millis,
    pub orig_duration_ms: Millis,
    pub activated: bool,
    pub max_distance_px: f64,
}

impl DragState {
    fn edit_at(&self, mouse_x: f64, settings: &EditorSettings) -> ClipEdit {
        let dx = mouse_x - self.start_mouse_x;
        let scale = settings.scale();
        match self.mode {
            DragMode::Move => ClipEdit {
                clip_id: self.clip_id.clone(),
                start_ms: moved_start(self.orig_start_ms, dx, scale),
                duration_ms: self.orig_duration_ms,
            },
            DragMode::Resize => ClipEdit {
                clip_id: self.clip_id.clone(),
                start_ms: self.orig_start_ms,
                duration_ms: resized_duration(
                    self.orig_duration_ms,
                    dx,
                    scale,
                    settings.min_clip_duration_ms,
                ),
            },
        }
    }

    fn original(&self) -> ClipEdit {
        ClipEdit {
            clip_id: self.clip_id.clone(),
            start_ms: self.orig_start_ms,
            duration_ms: self.orig_duration_ms,
        }
    }
}

/// How a finished gesture resolved.
#[derive(Clone, Debug, PartialEq)]
pub enum Settlement {
    Selected(String),
    Deselected,
    /// Geometry changed; the caller owns committing it.
    Committed(ClipEdit),
    /// A click on something that is not selectable.
    Ignored,
    /// Gesture aborted; carries the geometry to restore.
    Cancelled(ClipEdit),
}

#[derive(Clone, Debug, PartialEq, Default)]
pub enum GestureState {
    #[default]
    Idle,
    Dragging(DragState),
    Resizing(DragState),
    Settled(Settlement),
}

/// At most one selected scene clip.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    selected: Option<String>,
}

impl Selection {
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Select `clip_id`, or deselect it if it already is. Returns whether it ends up selected.
    pub fn toggle(&mut self, clip_id: &str) -> bool {
        if self.selected.as_deref() == Some(clip_id) {
            self.selected = None;
            false
        } else {
            self.selected = Some(clip_id.to_string());
            true
        }
    }

    pub fn clear(&mut self) {
        self.selected = None;
    }
}

/// Pointer gesture state machine shared by move, resize, and select.
#[derive(Clone, Debug, Default)]
pub struct GestureMachine {
    settings: EditorSettings,
    state: GestureState,
    selection: Selection,
}

impl GestureMachine {
    pub fn new(settings: EditorSettings) -> Self {
        Self {
            settings,
            state: GestureState::Idle,
            selection: Selection::default(),
        }
    }

    pub fn state(&self) -> &GestureState {
        &self.state
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut EditorSettings {
        &mut self.settings
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            GestureState::Dragging(_) | GestureState::Resizing(_)
        )
    }

    /// Forget a selection whose clip no longer exists.
    pub fn forget(&mut self, clip_id: &str) {
        if self.selection.selected() == Some(clip_id) {
            self.selection.clear();
        }
    }

    /// Start a gesture. `None` means the pointer hit empty track space.
    pub fn pointer_down(&mut self, hit: Option<ClipHit>, mouse_x: f64) {
        let Some(hit) = hit else {
            self.selection.clear();
            self.state = GestureState::Settled(Settlement::Deselected);
            return;
        };
        let in_handle = hit.offset_px >= hit.width_px - self.settings.resize_handle_px;
        let mode = if hit.track == TrackKind::Scenes && in_handle {
            DragMode::Resize
        } else {
            DragMode::Move
        };
        let drag = DragState {
            clip_id: hit.clip_id,
            track: hit.track,
            mode,
            start_mouse_x: mouse_x,
            orig_start_ms: hit.start_ms,
            orig_duration_ms: hit.duration_ms,
            activated: false,
            max_distance_px: 0.0,
        };
        debug!(clip = %drag.clip_id, ?mode, "gesture started");
        self.state = match mode {
            DragMode::Move => GestureState::Dragging(drag),
            DragMode::Resize => GestureState::Resizing(drag),
        };
    }

    /// Live geometry for the dragged clip, once the gesture has travelled past the click threshold.
    pub fn pointer_move(&mut self, mouse_x: f64) -> Option<ClipEdit> {
        let threshold = self.settings.select_threshold_px;
        let drag = match &mut self.state {
            GestureState::Dragging(d) | GestureState::Resizing(d) => d,
            _ => return None,
        };
        let distance = (mouse_x - drag.start_mouse_x).abs();
        drag.max_distance_px = drag.max_distance_px.max(distance);
        if drag.max_distance_px >= threshold {
            drag.activated = true;
        }
        if !drag.activated {
            return None;
        }
        Some(drag.edit_at(mouse_x, &self.settings))
    }

    /// Finish the gesture, classifying it as a selection or an edit.
    pub fn pointer_up(&mut self, mouse_x: f64) -> Settlement {
        let state = std::mem::take(&mut self.state);
        let settlement = match state {
            GestureState::Dragging(mut drag) | GestureState::Resizing(mut drag) => {
                let distance = (mouse_x - drag.start_mouse_x).abs();
                drag.max_distance_px = drag.max_distance_px.max(distance);
                if drag.activated || drag.max_distance_px >= self.settings.select_threshold_px {
                    let edit = drag.edit_at(mouse_x, &self.settings);
                    if edit == drag.original() {
                        Settlement::Ignored
                    } else {
                        Settlement::Committed(edit)
                    }
                } else if drag.track == TrackKind::Scenes {
                    if self.selection.toggle(&drag.clip_id) {
                        Settlement::Selected(drag.clip_id)
                    } else {
                        Settlement::Deselected
                    }
                } else {
                    Settlement::Ignored
                }
            }
            GestureState::Idle | GestureState::Settled(_) => Settlement::Ignored,
        };
        debug!(?settlement, "gesture settled");
        self.state = GestureState::Settled(settlement.clone());
        settlement
    }

    /// Abort an in-flight gesture. Returns the geometry to restore, if any.
    pub fn cancel(&mut self) -> Option<ClipEdit> {
        let state = std::mem::take(&mut self.state);
        match state {
            GestureState::Dragging(drag) | GestureState::Resizing(drag) => {
                let original = drag.original();
                self.state = GestureState::Settled(Settlement::Cancelled(original.clone()));
                Some(original)
            }
            other => {
                self.state = other;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene_hit(offset_px: f64) -> ClipHit {
        // 1500ms at 30pps is 45px wide
        ClipHit {
            clip_id: "c1".into(),
            track: TrackKind::Scenes,
            start_ms: 2000,
            duration_ms: 1500,
            offset_px,
            width_px: 45.0,
        }
    }

    #[test]
    fn body_drag_moves_continuously_and_commits() {
        let mut g = GestureMachine::default();
        g.pointer_down(Some(scene_hit(10.0)), 100.0);
        assert!(matches!(g.state(), GestureState::Dragging(_)));
        let live = g.pointer_move(250.0).unwrap();
        assert_eq!(live.start_ms, 7000);
        let live = g.pointer_move(400.0).unwrap();
        assert_eq!(live.start_ms, 12_000);
        assert_eq!(live.duration_ms, 1500);
        let settled = g.pointer_up(400.0);
        assert_eq!(
            settled,
            Settlement::Committed(ClipEdit {
                clip_id: "c1".into(),
                start_ms: 12_000,
                duration_ms: 1500
            })
        );
        assert!(!g.is_active());
    }

    #[test]
    fn trailing_edge_resizes_with_floor() {
        let mut g = GestureMachine::default();
        g.pointer_down(Some(scene_hit(42.0)), 100.0);
        assert!(matches!(g.state(), GestureState::Resizing(_)));
        let live = g.pointer_move(40.0).unwrap();
        assert_eq!(live.start_ms, 2000);
        assert_eq!(live.duration_ms, 500);
    }

    #[test]
    fn audio_clips_never_resize() {
        let mut g = GestureMachine::default();
        let mut hit = scene_hit(44.0);
        hit.track = TrackKind::Audio;
        g.pointer_down(Some(hit), 0.0);
        assert!(matches!(g.state(), GestureState::Dragging(_)));
    }

    #[test]
    fn small_movement_is_a_selection_toggle() {
        let mut g = GestureMachine::default();
        g.pointer_down(Some(scene_hit(10.0)), 100.0);
        assert_eq!(g.pointer_move(101.0), None);
        assert_eq!(g.pointer_up(101.0), Settlement::Selected("c1".into()));
        assert_eq!(g.selection().selected(), Some("c1"));

        g.pointer_down(Some(scene_hit(10.0)), 100.0);
        assert_eq!(g.pointer_up(100.0), Settlement::Deselected);
        assert_eq!(g.selection().selected(), None);
    }

    #[test]
    fn clicking_empty_space_deselects() {
        let mut g = GestureMachine::default();
        g.pointer_down(Some(scene_hit(10.0)), 0.0);
        g.pointer_up(0.0);
        assert_eq!(g.selection().selected(), Some("c1"));
        g.pointer_down(None, 500.0);
        assert_eq!(g.state(), &GestureState::Settled(Settlement::Deselected));
        assert_eq!(g.selection().selected(), None);
    }

    #[test]
    fn audio_click_is_not_selectable() {
        let mut g = GestureMachine::default();
        let mut hit = scene_hit(10.0);
        hit.track = TrackKind::Audio;
        g.pointer_down(Some(hit), 0.0);
        assert_eq!(g.pointer_up(1.0), Settlement::Ignored);
        assert_eq!(g.selection().selected(), None);
    }

    #[test]
    fn dragging_back_to_origin_is_not_a_click() {
        let mut g = GestureMachine::default();
        g.pointer_down(Some(scene_hit(10.0)), 100.0);
        g.pointer_move(160.0);
        assert_eq!(g.pointer_up(100.0), Settlement::Ignored);
        assert_eq!(g.selection().selected(), None);
    }

    #[test]
    fn cancel_restores_original_geometry() {
        let mut g = GestureMachine::default();
        g.pointer_down(Some(scene_hit(10.0)), 0.0);
        g.pointer_move(90.0);
        let restored = g.cancel().unwrap();
        assert_eq!(restored.start_ms, 2000);
        assert!(g.cancel().is_none());
    }
}
