//! Script line editing shared by the script and voice stages.
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use backend::BackendError;
use episode::ordered::{self, check_unlocked, temp_id};
use episode::{ScriptLine, StageKind};

use crate::optimistic::optimistic;
use crate::{Result, StageContext, StudioError};

/// Which endpoint family a line mutation goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineChannel {
    Script,
    Voice,
}

impl LineChannel {
    fn kind(self) -> StageKind {
        match self {
            Self::Script => StageKind::Script,
            Self::Voice => StageKind::Voice,
        }
    }

    async fn update(
        self,
        cx: &StageContext,
        lines: &[ScriptLine],
    ) -> std::result::Result<Vec<ScriptLine>, BackendError> {
        match self {
            Self::Script => cx.backend.update_lines(cx.episode_id(), lines).await,
            Self::Voice => cx.backend.update_voice_lines(cx.episode_id(), lines).await,
        }
    }

    async fn add(
        self,
        cx: &StageContext,
        position: usize,
        line: &ScriptLine,
    ) -> std::result::Result<Vec<ScriptLine>, BackendError> {
        match self {
            Self::Script => cx.backend.add_line(cx.episode_id(), position, line).await,
            Self::Voice => {
                cx.backend
                    .add_voice_line(cx.episode_id(), position, line)
                    .await
            }
        }
    }

    async fn delete(
        self,
        cx: &StageContext,
        line_id: &str,
    ) -> std::result::Result<Vec<ScriptLine>, BackendError> {
        match self {
            Self::Script => cx.backend.delete_line(cx.episode_id(), line_id).await,
            Self::Voice => cx.backend.delete_voice_line(cx.episode_id(), line_id).await,
        }
    }
}

/// Field changes for one line. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEdit {
    pub character_id: Option<String>,
    pub text_zh: Option<String>,
    pub text_en: Option<String>,
    pub text_pinyin: Option<String>,
    pub direction: Option<Option<String>>,
}

impl LineEdit {
    pub fn text_en(text: impl Into<String>) -> Self {
        Self {
            text_en: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn apply(&self, line: &mut ScriptLine) {
        if let Some(v) = &self.character_id {
            line.character_id = v.clone();
        }
        if let Some(v) = &self.text_zh {
            line.text_zh = v.clone();
        }
        if let Some(v) = &self.text_en {
            line.text_en = v.clone();
        }
        if let Some(v) = &self.text_pinyin {
            line.text_pinyin = v.clone();
        }
        if let Some(v) = &self.direction {
            line.direction = v.clone();
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Apply an authoritative line list as one replacement.
fn accept(cx: &StageContext, lines: Vec<ScriptLine>) -> Result<()> {
    if !cx.is_relevant() {
        return Err(StudioError::Stale);
    }
    cx.cache.edit_script(&cx.ticket, |s| s.lines = lines)?;
    Ok(())
}

/// Optimistically move a line. Returns `false` when nothing moved and no request was made.
pub(crate) async fn reorder(
    cx: &StageContext,
    channel: LineChannel,
    from: usize,
    to: usize,
    frontier: usize,
) -> Result<bool> {
    let episode = cx.unlocked(channel.kind())?;
    let mut lines = episode.script.lines.clone();
    if !ordered::reorder_unlocked(&mut lines, from, to, frontier)? {
        return Ok(false);
    }
    let local = lines.clone();
    let confirmed = optimistic(
        &cx.cache,
        &cx.ticket,
        |ep| Arc::make_mut(&mut ep.script).lines = local,
        channel.update(cx, &lines),
    )
    .await?;
    accept(cx, confirmed)?;
    Ok(true)
}

/// Optimistically edit one line. `locked` lines are refused before any request.
pub(crate) async fn edit(
    cx: &StageContext,
    channel: LineChannel,
    line_id: &str,
    change: &LineEdit,
    locked: impl Fn(&ScriptLine) -> bool,
) -> Result<()> {
    let episode = cx.unlocked(channel.kind())?;
    let mut lines = episode.script.lines.clone();
    let line = lines
        .iter_mut()
        .find(|l| l.id == line_id)
        .ok_or_else(|| StudioError::NotFound(format!("line {line_id}")))?;
    if locked(line) {
        return Err(StudioError::LineLocked(line_id.to_string()));
    }
    change.apply(line);
    let local = lines.clone();
    let confirmed = optimistic(
        &cx.cache,
        &cx.ticket,
        |ep| Arc::make_mut(&mut ep.script).lines = local,
        channel.update(cx, &lines),
    )
    .await?;
    accept(cx, confirmed)
}

/// Insert a new line at `position`. Waits for the backend to assign the id.
pub(crate) async fn add(
    cx: &StageContext,
    channel: LineChannel,
    position: usize,
    character_id: &str,
    frontier: usize,
) -> Result<String> {
    let episode = cx.unlocked(channel.kind())?;
    let len = episode.script.lines.len();
    if position > len {
        return Err(ordered::OrderError::OutOfRange {
            index: position,
            len,
        }
        .into());
    }
    check_unlocked(position, frontier)?;
    let mut line = ScriptLine::new(temp_id("line"), character_id);
    line.order = position;
    let lines = channel.add(cx, position, &line).await?;
    let new_id = lines
        .get(position)
        .map(|l| l.id.clone())
        .ok_or_else(|| StudioError::NotFound(format!("inserted line at {position}")))?;
    debug!(line = %new_id, position, "line inserted");
    accept(cx, lines)?;
    Ok(new_id)
}

/// Delete a line. Waits for the authoritative list before updating.
pub(crate) async fn delete(
    cx: &StageContext,
    channel: LineChannel,
    line_id: &str,
    locked: impl Fn(&ScriptLine) -> bool,
) -> Result<()> {
    let episode = cx.unlocked(channel.kind())?;
    let line = episode
        .line(line_id)
        .ok_or_else(|| StudioError::NotFound(format!("line {line_id}")))?;
    if locked(line) {
        return Err(StudioError::LineLocked(line_id.to_string()));
    }
    let lines = channel.delete(cx, line_id).await?;
    accept(cx, lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_edit_touches_only_set_fields() {
        let mut line = ScriptLine::new("l1", "mom").with_text("早", "zǎo", "Morning");
        LineEdit {
            text_en: Some("Good morning".into()),
            direction: Some(Some("yawning".into())),
            ..LineEdit::default()
        }
        .apply(&mut line);
        assert_eq!(line.text_zh, "早");
        assert_eq!(line.text_en, "Good morning");
        assert_eq!(line.direction.as_deref(), Some("yawning"));
        assert!(LineEdit::default().is_empty());
    }
}
