/// REST client for the production generation service.
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{
    ApprovalReceipt, Backend, BackendConfig, BackendError, ClipPatch, ExportReceipt, IdeaDraft,
    Result, SeedCheck, StageDescriptor, UnapproveReceipt,
};
use episode::{
    ContextData, Episode, EpisodeId, EpisodeSummary, GenerationMode, IntroData, IntroPatch, Scene,
    ScenesData, ScriptLine, StageId, StageKind, ThumbnailData, TimelineData, VoiceData,
    VoiceLineStatus,
};
use timeline::TimelineClip;

pub struct HttpBackend {
    config: BackendConfig,
    client: Client,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Value,
}

#[derive(Deserialize)]
struct ModeBody {
    mode: GenerationMode,
}

#[derive(Deserialize)]
struct SpeedBody {
    speed: f64,
}

#[derive(Deserialize)]
struct ArtStyleBody {
    art_style: String,
}

#[derive(Serialize)]
struct AddLineBody<'a> {
    position: usize,
    line: &'a ScriptLine,
}

/// Path segment of a stage's API, if it has one.
fn stage_segment(kind: StageKind) -> Option<&'static str> {
    match kind {
        StageKind::Context => None,
        StageKind::Script => Some("script"),
        StageKind::Voice => Some("tts"),
        StageKind::Scenes => Some("scenes"),
        StageKind::Timeline => Some("timeline"),
        StageKind::Thumbnail => Some("thumbnail"),
    }
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        let client = builder
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.config.url(path))
    }

    fn episode_path(id: &EpisodeId, rest: &str) -> String {
        if rest.is_empty() {
            format!("episodes/{id}")
        } else {
            format!("episodes/{id}/{rest}")
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.map_err(|e| {
            if e.is_decode() {
                BackendError::Decode(e.to_string())
            } else {
                BackendError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        debug!(url = %response.url(), %status, "backend response");
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<ErrorBody>(&text) {
                Ok(ErrorBody {
                    detail: Value::String(s),
                }) => s,
                Ok(body) => body.detail.to_string(),
                Err(_) if text.is_empty() => status.to_string(),
                Err(_) => text,
            };
            return Err(BackendError::from_status(status.as_u16(), detail));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.request(Method::GET, path)).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T> {
        self.send(self.request(Method::POST, path).json(body)).await
    }

    async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.request(Method::POST, path)).await
    }

    async fn put<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T> {
        self.send(self.request(Method::PUT, path).json(body)).await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.request(Method::DELETE, path)).await
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn list_stages(&self) -> Result<Vec<StageDescriptor>> {
        self.get("stages").await
    }

    async fn list_episodes(&self) -> Result<Vec<EpisodeSummary>> {
        self.get("episodes").await
    }

    async fn create_episode(&self, title: &str) -> Result<EpisodeSummary> {
        self.post("episodes", &json!({ "title": title })).await
    }

    async fn get_episode(&self, id: &EpisodeId) -> Result<Episode> {
        self.get(&Self::episode_path(id, "")).await
    }

    async fn delete_episode(&self, id: &EpisodeId) -> Result<()> {
        let _: Value = self.delete(&Self::episode_path(id, "")).await?;
        Ok(())
    }

    async fn unapprove(&self, id: &EpisodeId, stage: &StageId) -> Result<UnapproveReceipt> {
        self.post(&Self::episode_path(id, "unapprove"), &json!({ "stage": stage }))
            .await
    }

    async fn approve(&self, id: &EpisodeId, stage: StageKind) -> Result<ApprovalReceipt> {
        let segment = stage_segment(stage).ok_or_else(|| {
            BackendError::Rejected(format!("{stage} has no backend approval"))
        })?;
        self.post_empty(&Self::episode_path(id, &format!("{segment}/approve")))
            .await
    }

    async fn load_context(&self, id: &EpisodeId) -> Result<ContextData> {
        self.get(&Self::episode_path(id, "context")).await
    }

    async fn check_seed(&self, id: &EpisodeId, seed: &str) -> Result<SeedCheck> {
        self.post(&Self::episode_path(id, "script/check-seed"), &json!({ "seed": seed }))
            .await
    }

    async fn generate_idea(&self, id: &EpisodeId, seed: &str) -> Result<IdeaDraft> {
        self.post(&Self::episode_path(id, "script/generate-idea"), &json!({ "seed": seed }))
            .await
    }

    async fn generate_script(&self, id: &EpisodeId, idea: &str) -> Result<Vec<ScriptLine>> {
        self.post(&Self::episode_path(id, "script/generate-script"), &json!({ "idea": idea }))
            .await
    }

    async fn update_lines(&self, id: &EpisodeId, lines: &[ScriptLine]) -> Result<Vec<ScriptLine>> {
        self.put(&Self::episode_path(id, "script/lines"), &lines).await
    }

    async fn add_line(
        &self,
        id: &EpisodeId,
        position: usize,
        line: &ScriptLine,
    ) -> Result<Vec<ScriptLine>> {
        self.post(
            &Self::episode_path(id, "script/lines"),
            &AddLineBody { position, line },
        )
        .await
    }

    async fn delete_line(&self, id: &EpisodeId, line_id: &str) -> Result<Vec<ScriptLine>> {
        self.delete(&Self::episode_path(id, &format!("script/lines/{line_id}")))
            .await
    }

    async fn initialize_voice(&self, id: &EpisodeId) -> Result<VoiceData> {
        self.post_empty(&Self::episode_path(id, "tts/initialize")).await
    }

    async fn generate_voice_line(&self, id: &EpisodeId, line_id: &str) -> Result<VoiceLineStatus> {
        self.post_empty(&Self::episode_path(id, &format!("tts/generate/{line_id}")))
            .await
    }

    async fn revert_voice_line(&self, id: &EpisodeId, line_id: &str) -> Result<()> {
        let _: Value = self
            .delete(&Self::episode_path(id, &format!("tts/revert/{line_id}")))
            .await?;
        Ok(())
    }

    async fn set_voice_mode(&self, id: &EpisodeId, mode: GenerationMode) -> Result<GenerationMode> {
        let body: ModeBody = self
            .put(&Self::episode_path(id, "tts/mode"), &json!({ "mode": mode }))
            .await?;
        Ok(body.mode)
    }

    async fn set_voice_speed(&self, id: &EpisodeId, speed: f64) -> Result<f64> {
        let body: SpeedBody = self
            .put(&Self::episode_path(id, "tts/speed"), &json!({ "speed": speed }))
            .await?;
        Ok(body.speed)
    }

    async fn update_voice_lines(
        &self,
        id: &EpisodeId,
        lines: &[ScriptLine],
    ) -> Result<Vec<ScriptLine>> {
        self.put(&Self::episode_path(id, "tts/lines"), &lines).await
    }

    async fn add_voice_line(
        &self,
        id: &EpisodeId,
        position: usize,
        line: &ScriptLine,
    ) -> Result<Vec<ScriptLine>> {
        self.post(
            &Self::episode_path(id, "tts/lines"),
            &AddLineBody { position, line },
        )
        .await
    }

    async fn delete_voice_line(&self, id: &EpisodeId, line_id: &str) -> Result<Vec<ScriptLine>> {
        self.delete(&Self::episode_path(id, &format!("tts/lines/{line_id}")))
            .await
    }

    async fn set_art_style(&self, id: &EpisodeId, art_style: &str) -> Result<String> {
        let body: ArtStyleBody = self
            .put(
                &Self::episode_path(id, "scenes/art-style"),
                &json!({ "art_style": art_style }),
            )
            .await?;
        Ok(body.art_style)
    }

    async fn generate_scene_breakdown(&self, id: &EpisodeId) -> Result<ScenesData> {
        self.post_empty(&Self::episode_path(id, "scenes/generate-breakdown"))
            .await
    }

    async fn update_scenes(&self, id: &EpisodeId, scenes: &[Scene]) -> Result<Vec<Scene>> {
        self.put(&Self::episode_path(id, "scenes/scenes"), &scenes).await
    }

    async fn add_scene(&self, id: &EpisodeId, scene: &Scene) -> Result<Vec<Scene>> {
        self.post(&Self::episode_path(id, "scenes/scenes"), scene).await
    }

    async fn delete_scene(&self, id: &EpisodeId, scene_id: &str) -> Result<Vec<Scene>> {
        self.delete(&Self::episode_path(id, &format!("scenes/scenes/{scene_id}")))
            .await
    }

    async fn generate_scene_image(&self, id: &EpisodeId, scene_id: &str) -> Result<Scene> {
        self.post_empty(&Self::episode_path(
            id,
            &format!("scenes/generate-image/{scene_id}"),
        ))
        .await
    }

    async fn revert_scene_image(&self, id: &EpisodeId, scene_id: &str) -> Result<()> {
        let _: Value = self
            .delete(&Self::episode_path(
                id,
                &format!("scenes/revert-image/{scene_id}"),
            ))
            .await?;
        Ok(())
    }

    async fn set_scenes_mode(
        &self,
        id: &EpisodeId,
        mode: GenerationMode,
    ) -> Result<GenerationMode> {
        let body: ModeBody = self
            .put(&Self::episode_path(id, "scenes/mode"), &json!({ "mode": mode }))
            .await?;
        Ok(body.mode)
    }

    async fn initialize_timeline(&self, id: &EpisodeId) -> Result<TimelineData> {
        self.post_empty(&Self::episode_path(id, "timeline/initialize"))
            .await
    }

    async fn update_clips(
        &self,
        id: &EpisodeId,
        clips: &[TimelineClip],
    ) -> Result<Vec<TimelineClip>> {
        self.put(&Self::episode_path(id, "timeline/clips"), &clips).await
    }

    async fn update_clip(
        &self,
        id: &EpisodeId,
        clip_id: &str,
        patch: &ClipPatch,
    ) -> Result<TimelineClip> {
        self.put(
            &Self::episode_path(id, &format!("timeline/clips/{clip_id}")),
            patch,
        )
        .await
    }

    async fn update_intro(&self, id: &EpisodeId, patch: &IntroPatch) -> Result<IntroData> {
        self.put(&Self::episode_path(id, "timeline/intro"), patch).await
    }

    async fn export_timeline(&self, id: &EpisodeId) -> Result<ExportReceipt> {
        self.post_empty(&Self::episode_path(id, "timeline/export")).await
    }

    async fn initialize_thumbnail(&self, id: &EpisodeId) -> Result<ThumbnailData> {
        self.post_empty(&Self::episode_path(id, "thumbnail/initialize"))
            .await
    }

    async fn update_thumbnail_prompt(
        &self,
        id: &EpisodeId,
        prompt: &str,
    ) -> Result<ThumbnailData> {
        self.put(
            &Self::episode_path(id, "thumbnail/prompt"),
            &json!({ "prompt": prompt }),
        )
        .await
    }

    async fn generate_thumbnail(&self, id: &EpisodeId) -> Result<ThumbnailData> {
        self.post_empty(&Self::episode_path(id, "thumbnail/generate"))
            .await
    }

    async fn revert_thumbnail(&self, id: &EpisodeId) -> Result<()> {
        let _: Value = self
            .delete(&Self::episode_path(id, "thumbnail/revert"))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn episode_paths() {
        let id = EpisodeId::new("ep_001");
        assert_eq!(HttpBackend::episode_path(&id, ""), "episodes/ep_001");
        assert_eq!(
            HttpBackend::episode_path(&id, "tts/generate/l1"),
            "episodes/ep_001/tts/generate/l1"
        );
    }

    #[test]
    fn context_has_no_approval_endpoint() {
        assert_eq!(stage_segment(StageKind::Context), None);
        assert_eq!(stage_segment(StageKind::Voice), Some("tts"));
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_error() {
        // Port 9 (discard) is never an HTTP server.
        let backend =
            HttpBackend::new(BackendConfig::new("http://127.0.0.1:9/api").with_timeout(2)).unwrap();
        let err = backend.list_stages().await.unwrap_err();
        assert!(err.is_connectivity(), "{err:?}");
    }
}
