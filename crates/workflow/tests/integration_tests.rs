/// Episode workflow - Integration Tests
/// Full pipeline runs against the in-memory backend: approvals, rollbacks,
/// lock frontiers, timeline gestures and teardown.
use std::sync::Arc;

use backend::{BackendError, MockBackend, MockConfig};
use episode::{GenerationMode, StageKind};
use timeline::{clips_on, ClipEdit, ProgramDuration, Settlement, TrackKind, ZoomEdge};
use workflow::*;

fn studio_with(config: MockConfig) -> (Arc<MockBackend>, Studio) {
    let mock = Arc::new(MockBackend::new(config));
    let studio = Studio::new(mock.clone(), StudioConfig::default());
    (mock, studio)
}

fn line_ids(session: &EpisodeSession) -> Vec<String> {
    session
        .episode()
        .unwrap()
        .script
        .lines
        .iter()
        .map(|l| l.id.clone())
        .collect()
}

/// Context approved, script generated and still editable.
async fn scripted(studio: &mut Studio, title: &str) -> EpisodeSession {
    let mut session = studio.start_episode(title).await.unwrap();
    session.enter().await.unwrap();
    session.approve_current().await.unwrap();
    session.enter().await.unwrap();
    let script = session.script().unwrap();
    script.submit_seed("surprise me").await.unwrap();
    script.generate_script().await.unwrap();
    session
}

/// Script and voice approved; the scenes stage is current.
async fn voiced(studio: &mut Studio) -> EpisodeSession {
    let mut session = scripted(studio, "Episode 1").await;
    session.approve_current().await.unwrap();
    session.enter().await.unwrap();
    session.voice().unwrap().generate_all().await.unwrap();
    session.approve_current().await.unwrap();
    session.enter().await.unwrap();
    session
}

/// Scenes approved and the timeline laid out.
async fn laid_out(studio: &mut Studio) -> EpisodeSession {
    let mut session = voiced(studio).await;
    let scenes = session.scenes().unwrap();
    scenes.generate_breakdown().await.unwrap();
    scenes.generate_all().await.unwrap();
    session.approve_current().await.unwrap();
    session.enter().await.unwrap();
    session
}

#[tokio::test]
async fn test_episode_runs_from_seed_to_complete() {
    let (mock, mut studio) = studio_with(MockConfig::default());
    let mut session = studio.start_episode("Episode 1").await.unwrap();
    assert_eq!(session.viewing(), &StageKind::Context.default_id());

    // Context is acknowledged locally once the reference data loads
    session.enter().await.unwrap();
    assert_eq!(
        session.context().unwrap().context_phase(),
        ContextPhase::Loaded
    );
    session.approve_current().await.unwrap();
    assert_eq!(mock.call_count("approve_context"), 0);
    assert_eq!(session.viewing(), &StageKind::Script.default_id());

    session.enter().await.unwrap();
    let script = session.script().unwrap();
    script.submit_seed("surprise me").await.unwrap();
    assert_eq!(*script.script_phase(), ScriptPhase::IdeaReview);
    assert!(script.draft().is_some());
    let lines = script.generate_script().await.unwrap();
    assert_eq!(lines, 4);
    assert_eq!(*script.script_phase(), ScriptPhase::Editing);

    let position = session.approve_current().await.unwrap();
    assert_eq!(position, Position::Stage(StageKind::Voice.default_id()));
    assert_eq!(
        session.episode().unwrap().current_stage,
        StageKind::Voice.default_id()
    );

    // Script lines are frozen behind the approval
    let first = line_ids(&session)[0].clone();
    let err = session
        .script()
        .unwrap()
        .edit_line(&first, &LineEdit::text_en("Hi"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StudioError::InvalidPhase { .. } | StudioError::StageLocked(StageKind::Script)
    ));
    assert_eq!(mock.call_count("update_lines"), 0);

    session.enter().await.unwrap();
    assert_eq!(session.voice().unwrap().generate_all().await.unwrap(), 4);
    session.approve_current().await.unwrap();

    session.enter().await.unwrap();
    let scenes = session.scenes().unwrap();
    assert_eq!(scenes.generate_breakdown().await.unwrap(), 2);
    assert_eq!(scenes.generate_all().await.unwrap(), 2);
    session.approve_current().await.unwrap();

    session.enter().await.unwrap();
    let timeline = session.timeline().unwrap();
    assert_eq!(timeline.timeline_phase(), TimelinePhase::Editing);
    let output = timeline.export().await.unwrap();
    assert_eq!(output, "output/ep_001.mp4");
    session.approve_current().await.unwrap();

    // Thumbnail drafts and generates on entry
    session.enter().await.unwrap();
    assert_eq!(
        session.thumbnail().unwrap().thumbnail_phase(),
        ThumbnailPhase::Ready
    );
    let position = session.approve_current().await.unwrap();
    assert_eq!(position, Position::Complete);
    assert_eq!(session.position().unwrap(), Position::Complete);

    let stored = mock.episode(session.ticket().episode_id()).unwrap();
    assert!(stored.thumbnail.approved);
    assert!(stored.timeline.approved);
}

#[tokio::test]
async fn test_failed_line_edit_restores_text() {
    let (mock, mut studio) = studio_with(MockConfig::default());
    let mut session = scripted(&mut studio, "Episode 1").await;
    let before = session.episode().unwrap().script.lines.clone();
    let first = before[0].id.clone();

    mock.fail_next("update_lines", BackendError::Rejected("storage offline".into()));
    let err = session
        .script()
        .unwrap()
        .edit_line(&first, &LineEdit::text_en("Hello there"))
        .await
        .unwrap_err();

    assert!(matches!(err, StudioError::Backend(BackendError::Rejected(_))));
    assert!(!err.is_connectivity());
    let after = session.episode().unwrap().script.lines.clone();
    assert_eq!(after, before);
    assert_eq!(after[0].text_en, "Good morning!");

    // Same edit goes through once the backend recovers
    session
        .script()
        .unwrap()
        .edit_line(&first, &LineEdit::text_en("Hello there"))
        .await
        .unwrap();
    assert_eq!(session.episode().unwrap().script.lines[0].text_en, "Hello there");
}

#[tokio::test]
async fn test_voice_approval_needs_every_line() {
    let (mock, mut studio) = studio_with(MockConfig::default().with_script_length(5));
    let mut session = scripted(&mut studio, "Episode 1").await;
    session.approve_current().await.unwrap();
    session.enter().await.unwrap();

    let ids = line_ids(&session);
    let voice = session.voice().unwrap();
    voice.generate_line(&ids[0]).await.unwrap();
    voice.generate_line(&ids[1]).await.unwrap();

    let err = session.approve_current().await.unwrap_err();
    assert!(matches!(err, StudioError::Incomplete(StageKind::Voice, _)));
    assert_eq!(mock.call_count("approve_voice"), 0);
    assert_eq!(
        session.episode().unwrap().current_stage,
        StageKind::Voice.default_id()
    );

    // Approving anything but the current stage is refused too
    let err = session
        .approve(&StageKind::Scenes.default_id())
        .await
        .unwrap_err();
    assert!(matches!(err, StudioError::NotCurrentStage { .. }));
}

#[tokio::test]
async fn test_voice_lines_generate_front_to_back() {
    let (_mock, mut studio) = studio_with(MockConfig::default());
    let mut session = scripted(&mut studio, "Episode 1").await;
    session.approve_current().await.unwrap();
    session.enter().await.unwrap();
    let ids = line_ids(&session);

    let voice = session.voice().unwrap();
    let err = voice.generate_line(&ids[2]).await.unwrap_err();
    assert!(matches!(err, StudioError::InvalidPhase { .. }));

    let status = voice.generate_line(&ids[0]).await.unwrap();
    assert_eq!(status.duration_ms, 1400);
    let err = voice.generate_line(&ids[0]).await.unwrap_err();
    assert!(matches!(err, StudioError::LineLocked(_)));

    // Voiced lines sit behind the frontier
    let err = voice.reorder_lines(0, 2).await.unwrap_err();
    assert!(matches!(err, StudioError::InvalidIndex(_)));
    assert!(voice.reorder_lines(1, 3).await.unwrap());

    let err = voice
        .edit_line(&ids[0], &LineEdit::text_en("Morning!"))
        .await
        .unwrap_err();
    assert!(matches!(err, StudioError::LineLocked(_)));

    // Speaker and direction are frozen along with the text
    let speaker = LineEdit {
        character_id: Some("grandpa".into()),
        ..LineEdit::default()
    };
    let err = voice.edit_line(&ids[0], &speaker).await.unwrap_err();
    assert!(matches!(err, StudioError::LineLocked(_)));
    let direction = LineEdit {
        direction: Some(Some("shouting".into())),
        ..LineEdit::default()
    };
    let err = voice.edit_line(&ids[0], &direction).await.unwrap_err();
    assert!(matches!(err, StudioError::LineLocked(_)));
    let episode = session.episode().unwrap();
    assert_ne!(episode.script.lines[0].character_id, "grandpa");
    assert_ne!(episode.script.lines[0].direction.as_deref(), Some("shouting"));

    let voice = session.voice().unwrap();
    voice.edit_line(&ids[1], &speaker).await.unwrap();
    voice.revert_line(&ids[0]).await.unwrap();
    voice
        .edit_line(&ids[0], &LineEdit::text_en("Morning!"))
        .await
        .unwrap();
    let episode = session.episode().unwrap();
    assert_eq!(episode.script.lines[0].text_en, "Morning!");
    assert_eq!(voice_frontier(&episode), 0);
}

#[tokio::test]
async fn test_auto_voice_mode_voices_everything() {
    let (_mock, mut studio) = studio_with(MockConfig::default());
    let mut session = scripted(&mut studio, "Episode 1").await;
    session.approve_current().await.unwrap();
    session.enter().await.unwrap();

    let voice = session.voice().unwrap();
    assert_eq!(voice.set_mode(GenerationMode::Auto).await.unwrap(), 4);
    let err = voice.add_line(4, "kid").await.unwrap_err();
    assert!(matches!(err, StudioError::ReadOnly(StageKind::Voice)));
    assert_eq!(voice.set_speed(9.0).await.unwrap(), 4.0);

    let episode = session.episode().unwrap();
    assert!(next_pending(&episode).is_none());
    session.approve_current().await.unwrap();
}

#[tokio::test]
async fn test_unapprove_cascades_to_later_stages() {
    let (mock, mut studio) = studio_with(MockConfig::default());
    let mut session = voiced(&mut studio).await;
    let script = StageKind::Script.default_id();

    let reset = session.unapprove(&script).await.unwrap();
    assert_eq!(reset, vec![script.clone(), StageKind::Voice.default_id()]);

    let episode = session.episode().unwrap();
    assert_eq!(episode.current_stage, script);
    assert!(episode.context.approved);
    assert!(!episode.script.approved);
    assert!(!episode.voice.approved);
    assert_eq!(session.viewing(), &script);
    assert_eq!(*session.script().unwrap().script_phase(), ScriptPhase::Editing);

    let stored = mock.episode(&episode.id).unwrap();
    assert!(!stored.voice.approved);

    // Nothing left to unapprove at voice
    let err = session
        .unapprove(&StageKind::Voice.default_id())
        .await
        .unwrap_err();
    assert!(matches!(err, StudioError::InvalidPhase { .. }));
}

#[tokio::test]
async fn test_scene_prompt_locks_until_reverted() {
    let (_mock, mut studio) = studio_with(MockConfig::default());
    let mut session = voiced(&mut studio).await;
    let scenes = session.scenes().unwrap();
    scenes.generate_breakdown().await.unwrap();
    let scene_id = session.episode().unwrap().scenes.scenes[0].id.clone();

    let scenes = session.scenes().unwrap();
    scenes.generate_image(&scene_id).await.unwrap();
    let err = scenes.edit_prompt(&scene_id, "a rainy kitchen").await.unwrap_err();
    assert!(matches!(err, StudioError::PromptLocked(_)));

    scenes.revert_image(&scene_id).await.unwrap();
    let scene = session.episode().unwrap().scenes.scenes[0].clone();
    assert!(!scene.generated);
    assert!(scene.image_file.is_empty());

    let scenes = session.scenes().unwrap();
    scenes.edit_prompt(&scene_id, "a rainy kitchen").await.unwrap();
    assert_eq!(
        session.episode().unwrap().scenes.scenes[0].prompt,
        "a rainy kitchen"
    );
}

#[tokio::test]
async fn test_script_reorder_insert_delete_keep_orders_dense() {
    let (mock, mut studio) = studio_with(MockConfig::default());
    let mut session = scripted(&mut studio, "Episode 1").await;
    let ids = line_ids(&session);

    let script = session.script().unwrap();
    assert!(!script.reorder_lines(1, 1).await.unwrap());
    assert_eq!(mock.call_count("update_lines"), 0);

    assert!(script.reorder_lines(0, 3).await.unwrap());
    let added = script.add_line(1, "kid").await.unwrap();
    assert!(!ids.contains(&added));
    script.delete_line(&ids[2]).await.unwrap();

    let episode = session.episode().unwrap();
    let order: Vec<&str> = episode.script.lines.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(order, [ids[1].as_str(), added.as_str(), ids[3].as_str(), ids[0].as_str()]);
    for (i, line) in episode.script.lines.iter().enumerate() {
        assert_eq!(line.order, i);
    }
}

#[tokio::test]
async fn test_seed_conflicts_pause_for_a_decision() {
    let (_mock, mut studio) = studio_with(MockConfig::default().with_conflict_keyword("dragon"));
    let mut session = studio.start_episode("Episode 1").await.unwrap();
    session.enter().await.unwrap();
    session.approve_current().await.unwrap();
    session.enter().await.unwrap();

    let script = session.script().unwrap();
    script.submit_seed("a dragon visits").await.unwrap();
    assert!(matches!(script.script_phase(), ScriptPhase::Conflicts(r) if r.conflicts.len() == 1));
    script.reseed().unwrap();
    assert_eq!(*script.script_phase(), ScriptPhase::Seed);

    script.submit_seed("dragon again").await.unwrap();
    script.proceed_anyway().await.unwrap();
    assert_eq!(*script.script_phase(), ScriptPhase::IdeaReview);
    assert_eq!(session.episode().unwrap().script.seed, "dragon again");
}

#[tokio::test]
async fn test_failed_idea_generation_returns_to_seed() {
    let (mock, mut studio) = studio_with(MockConfig::default());
    let mut session = studio.start_episode("Episode 1").await.unwrap();
    session.enter().await.unwrap();
    session.approve_current().await.unwrap();

    mock.fail_next("generate_idea", BackendError::Generation("model overloaded".into()));
    let script = session.script().unwrap();
    let err = script.submit_seed("").await.unwrap_err();
    assert!(err.is_generation());
    assert_eq!(*script.script_phase(), ScriptPhase::Seed);

    script.submit_seed("").await.unwrap();
    assert_eq!(
        session.episode().unwrap().script.seed,
        episode::DEFAULT_SEED
    );
}

#[tokio::test]
async fn test_timeline_layout_and_durations() {
    let (_mock, mut studio) = studio_with(MockConfig::default());
    let mut session = laid_out(&mut studio).await;
    let episode = session.episode().unwrap();

    let scenes: Vec<(u64, u64)> = clips_on(&episode.timeline.clips, TrackKind::Scenes)
        .iter()
        .map(|c| (c.start_ms, c.duration_ms))
        .collect();
    assert_eq!(scenes, [(0, 6100), (6100, 5800)]);
    let audio: Vec<(u64, u64)> = clips_on(&episode.timeline.clips, TrackKind::Audio)
        .iter()
        .map(|c| (c.start_ms, c.duration_ms))
        .collect();
    assert_eq!(audio, [(500, 1400), (2200, 1700), (6600, 1400), (8300, 1400)]);

    let timeline = session.timeline().unwrap();
    assert_eq!(timeline.duration().unwrap(), ProgramDuration::Estimated(11_900));
    timeline.export().await.unwrap();
    assert_eq!(
        timeline.duration().unwrap(),
        ProgramDuration::Authoritative(11_900)
    );
    assert_eq!(timeline.ruler().unwrap(), vec![0, 5, 10]);
    assert!(timeline.overlaps(TrackKind::Scenes).unwrap().is_empty());

    let srt = timeline.captions(0).unwrap();
    assert!(srt.starts_with("1\n00:00:00,500 --> 00:00:01,900\n早上好！\n"));
}

#[tokio::test]
async fn test_zoom_is_clamped_to_range() {
    let (mock, mut studio) = studio_with(MockConfig::default());
    let mut session = laid_out(&mut studio).await;
    let episode = session.episode().unwrap();
    let scene = clips_on(&episode.timeline.clips, TrackKind::Scenes)[0].id.clone();
    let audio = clips_on(&episode.timeline.clips, TrackKind::Audio)[0].id.clone();

    let timeline = session.timeline().unwrap();
    assert_eq!(timeline.set_zoom(&scene, ZoomEdge::Start, 2.5).await.unwrap(), 2.0);
    assert_eq!(timeline.set_zoom(&scene, ZoomEdge::End, 0.4).await.unwrap(), 1.0);
    let err = timeline
        .set_zoom(&audio, ZoomEdge::Start, 1.5)
        .await
        .unwrap_err();
    assert!(matches!(err, StudioError::Timeline(_)));

    let episode = session.episode().unwrap();
    let clip = episode.timeline.clips.iter().find(|c| c.id == scene).unwrap();
    assert_eq!((clip.zoom_start, clip.zoom_end), (2.0, 1.0));
    let stored = mock.episode(&episode.id).unwrap();
    let clip = stored.timeline.clips.iter().find(|c| c.id == scene).unwrap();
    assert_eq!(clip.zoom_start, 2.0);
}

#[tokio::test]
async fn test_drag_commits_on_release() {
    let (mock, mut studio) = studio_with(MockConfig::default());
    let mut session = laid_out(&mut studio).await;

    let timeline = session.timeline().unwrap();
    let hit = timeline.hit_test(TrackKind::Scenes, 50.0).unwrap().unwrap();
    let clip_id = hit.clip_id.clone();
    timeline.pointer_down(Some(hit), 50.0).unwrap();
    let live = timeline.pointer_move(80.0).unwrap().unwrap();
    assert_eq!(live.start_ms, 1000);
    assert_eq!(mock.call_count("update_clip"), 0);

    let settlement = timeline.pointer_up(80.0).await.unwrap();
    assert!(matches!(settlement, Settlement::Committed(ref e) if e.start_ms == 1000));
    assert_eq!(mock.call_count("update_clip"), 1);

    let episode = session.episode().unwrap();
    let stored = mock.episode(&episode.id).unwrap();
    let clip = stored.timeline.clips.iter().find(|c| c.id == clip_id).unwrap();
    assert_eq!(clip.start_ms, 1000);
    assert_eq!(clip.duration_ms, 6100);
}

#[tokio::test]
async fn test_rejected_drag_snaps_back() {
    let (mock, mut studio) = studio_with(MockConfig::default());
    let mut session = laid_out(&mut studio).await;
    mock.fail_next("update_clip", BackendError::Rejected("clip is busy".into()));

    let timeline = session.timeline().unwrap();
    let hit = timeline.hit_test(TrackKind::Scenes, 50.0).unwrap().unwrap();
    let clip_id = hit.clip_id.clone();
    timeline.pointer_down(Some(hit), 50.0).unwrap();
    timeline.pointer_move(110.0).unwrap();
    let err = timeline.pointer_up(110.0).await.unwrap_err();
    assert!(matches!(err, StudioError::Backend(BackendError::Rejected(_))));

    let episode = session.episode().unwrap();
    let clip = episode.timeline.clips.iter().find(|c| c.id == clip_id).unwrap();
    assert_eq!(clip.start_ms, 0);
}

#[tokio::test]
async fn test_click_selects_scene_clip() {
    let (mock, mut studio) = studio_with(MockConfig::default());
    let mut session = laid_out(&mut studio).await;

    let timeline = session.timeline().unwrap();
    let hit = timeline.hit_test(TrackKind::Scenes, 50.0).unwrap().unwrap();
    let clip_id = hit.clip_id.clone();
    timeline.pointer_down(Some(hit.clone()), 50.0).unwrap();
    let settlement = timeline.pointer_up(51.0).await.unwrap();
    assert_eq!(settlement, Settlement::Selected(clip_id.clone()));
    assert_eq!(timeline.selected_clip(), Some(clip_id.as_str()));

    timeline.pointer_down(Some(hit), 50.0).unwrap();
    assert_eq!(timeline.pointer_up(50.0).await.unwrap(), Settlement::Deselected);
    assert_eq!(timeline.selected_clip(), None);
    assert_eq!(mock.call_count("update_clip"), 0);
}

#[tokio::test]
async fn test_timeline_approval_needs_export() {
    let (_mock, mut studio) = studio_with(MockConfig::default());
    let mut session = laid_out(&mut studio).await;
    let err = session.approve_current().await.unwrap_err();
    assert!(matches!(err, StudioError::Incomplete(StageKind::Timeline, _)));
}

#[tokio::test]
async fn test_exported_timeline_approves() {
    let (mock, mut studio) = studio_with(MockConfig::default());
    let mut session = laid_out(&mut studio).await;
    session.timeline().unwrap().export().await.unwrap();

    let position = session.approve_current().await.unwrap();
    assert_eq!(position, Position::Stage(StageKind::Thumbnail.default_id()));
    let stored = mock.episode(session.ticket().episode_id()).unwrap();
    assert!(stored.timeline.approved);
    assert_eq!(stored.timeline.output_file, "output/ep_001.mp4");
}

#[tokio::test]
async fn test_clip_edit_discards_export() {
    let (mock, mut studio) = studio_with(MockConfig::default());
    let mut session = laid_out(&mut studio).await;
    let episode = session.episode().unwrap();
    let scene = clips_on(&episode.timeline.clips, TrackKind::Scenes)[0].clone();

    let timeline = session.timeline().unwrap();
    timeline.export().await.unwrap();
    timeline
        .update_clip(&ClipEdit {
            clip_id: scene.id.clone(),
            start_ms: 5000,
            duration_ms: scene.duration_ms,
        })
        .await
        .unwrap();
    assert!(matches!(
        timeline.duration().unwrap(),
        ProgramDuration::Estimated(_)
    ));

    let err = session.approve_current().await.unwrap_err();
    assert!(matches!(err, StudioError::Incomplete(StageKind::Timeline, _)));
    assert_eq!(mock.call_count("approve_timeline"), 0);
    let stored = mock.episode(&episode.id).unwrap();
    assert!(!stored.timeline.is_exported());
    assert!(!stored.timeline.approved);

    // A fresh render of the edited layout is accepted
    session.timeline().unwrap().export().await.unwrap();
    session.approve_current().await.unwrap();
    assert!(mock.episode(&episode.id).unwrap().timeline.approved);
}

#[tokio::test]
async fn test_new_pointer_down_rolls_back_unsettled_drag() {
    let (mock, mut studio) = studio_with(MockConfig::default());
    let mut session = laid_out(&mut studio).await;

    let timeline = session.timeline().unwrap();
    let hit = timeline.hit_test(TrackKind::Scenes, 50.0).unwrap().unwrap();
    let clip_id = hit.clip_id.clone();
    timeline.pointer_down(Some(hit), 50.0).unwrap();
    timeline.pointer_move(80.0).unwrap();

    // Release never arrived; the next press starts clean
    timeline.pointer_down(None, 900.0).unwrap();
    assert!(!timeline.gesture().is_active());
    let episode = session.episode().unwrap();
    let clip = episode.timeline.clips.iter().find(|c| c.id == clip_id).unwrap();
    assert_eq!(clip.start_ms, 0);
    assert_eq!(mock.call_count("update_clip"), 0);
}

#[tokio::test]
async fn test_results_after_reopen_are_stale() {
    let (_mock, mut studio) = studio_with(MockConfig::default());
    let mut first = scripted(&mut studio, "Episode 1").await;
    let second = studio.start_episode("Episode 2").await.unwrap();

    let err = first.script().unwrap().reorder_lines(0, 1).await.unwrap_err();
    assert!(matches!(err, StudioError::Stale));
    assert!(matches!(first.episode(), Err(StudioError::Stale)));
    assert_eq!(second.episode().unwrap().title, "Episode 2");

    second.close();
    assert!(studio.cache().current().is_none());
}

#[tokio::test]
async fn test_unreachable_backend_before_any_episode() {
    let (mock, mut studio) = studio_with(MockConfig::default());
    mock.set_offline(true);
    let err = studio.list_episodes().await.unwrap_err();
    assert!(err.is_connectivity());
    assert!(studio.is_unreachable());

    mock.set_offline(false);
    let session = studio.start_episode("Episode 1").await.unwrap();
    assert_eq!(studio.connectivity(), &Connectivity::Online);

    // Once an episode is loaded, failures stay inline
    mock.set_offline(true);
    assert!(studio.list_episodes().await.is_err());
    assert!(matches!(studio.connectivity(), Connectivity::Unreachable(_)));
    assert!(!studio.is_unreachable());
    drop(session);
}

#[tokio::test]
async fn test_refresh_infers_context_approval() {
    let (mock, mut studio) = studio_with(MockConfig::default());
    let mut session = scripted(&mut studio, "Episode 1").await;
    session.approve_current().await.unwrap();
    let id = session.episode().unwrap().id.clone();

    // The backend never hears about context approval
    assert!(!mock.episode(&id).unwrap().context.approved);
    session.refresh().await.unwrap();
    let episode = session.episode().unwrap();
    assert!(episode.context.approved);
    assert_eq!(episode.current_stage, StageKind::Voice.default_id());

    let reopened = studio.open(&id).await.unwrap();
    assert_eq!(reopened.viewing(), &StageKind::Voice.default_id());
    assert!(reopened.machine().check_consistent(&reopened.episode().unwrap()).is_ok());
}
