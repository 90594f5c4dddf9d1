use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schedule::error::SubmissionError;
use crate::schedule::types::JobKind;

const DEFAULT_MUSIC_MODEL: &str = "V4_5";
const MAX_PROMPT_CHARS: usize = 500;
const MAX_CUSTOM_PROMPT_CHARS: usize = 5000;
const MAX_LYRICS_PROMPT_CHARS: usize = 200;

fn default_music_model() -> String {
    DEFAULT_MUSIC_MODEL.to_string()
}

/// Per-kind job parameters. Serialized as-is into the provider's creation
/// request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum JobParams {
    Music(MusicParams),
    Lyrics(LyricsParams),
    CoverArt(CoverArtParams),
    WavConversion(WavParams),
    VocalSeparation(VocalSeparationParams),
    Mp4Render(Mp4Params),
    Image(ImageParams),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicParams {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub custom_mode: bool,
    #[serde(default)]
    pub instrumental: bool,
    #[serde(default = "default_music_model")]
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_tags: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricsParams {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverArtParams {
    // id of the music task the cover is generated for
    pub task_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WavParams {
    pub task_id: String,
    pub audio_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocalSeparationParams {
    pub task_id: String,
    pub audio_id: String,
    /// `separate_vocal` or `split_stem`
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub separation_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mp4Params {
    pub task_id: String,
    pub audio_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageParams {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub base64_array: Vec<String>,
}

fn required(field: &str, value: &str) -> Result<(), SubmissionError> {
    if value.trim().is_empty() {
        return Err(SubmissionError::InvalidParams(format!("{} is required", field)));
    }
    Ok(())
}

fn max_chars(field: &str, value: &str, limit: usize) -> Result<(), SubmissionError> {
    if value.chars().count() > limit {
        return Err(SubmissionError::InvalidParams(format!(
            "{} exceeds {} characters",
            field, limit
        )));
    }
    Ok(())
}

impl JobParams {
    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::Music(_) => JobKind::Music,
            JobParams::Lyrics(_) => JobKind::Lyrics,
            JobParams::CoverArt(_) => JobKind::CoverArt,
            JobParams::WavConversion(_) => JobKind::WavConversion,
            JobParams::VocalSeparation(_) => JobKind::VocalSeparation,
            JobParams::Mp4Render(_) => JobKind::Mp4Render,
            JobParams::Image(_) => JobKind::Image,
        }
    }

    pub fn validate(&self) -> Result<(), SubmissionError> {
        match self {
            JobParams::Music(p) => {
                if p.custom_mode {
                    required("style", p.style.as_deref().unwrap_or_default())?;
                    required("title", p.title.as_deref().unwrap_or_default())?;
                    if !p.instrumental {
                        required("prompt", &p.prompt)?;
                    }
                    max_chars("prompt", &p.prompt, MAX_CUSTOM_PROMPT_CHARS)
                } else {
                    required("prompt", &p.prompt)?;
                    max_chars("prompt", &p.prompt, MAX_PROMPT_CHARS)
                }
            }
            JobParams::Lyrics(p) => {
                required("prompt", &p.prompt)?;
                max_chars("prompt", &p.prompt, MAX_LYRICS_PROMPT_CHARS)
            }
            JobParams::CoverArt(p) => required("taskId", &p.task_id),
            JobParams::WavConversion(p) => {
                required("taskId", &p.task_id)?;
                required("audioId", &p.audio_id)
            }
            JobParams::VocalSeparation(p) => {
                required("taskId", &p.task_id)?;
                required("audioId", &p.audio_id)?;
                match p.separation_type.as_deref() {
                    None | Some("separate_vocal") | Some("split_stem") => Ok(()),
                    Some(other) => Err(SubmissionError::InvalidParams(format!(
                        "unsupported separation type: {}",
                        other
                    ))),
                }
            }
            JobParams::Mp4Render(p) => {
                required("taskId", &p.task_id)?;
                required("audioId", &p.audio_id)
            }
            JobParams::Image(p) => required("prompt", &p.prompt),
        }
    }

    /// JSON body for the creation request, without the callback field.
    pub fn body(&self) -> serde_json::Result<Value> {
        match self {
            JobParams::Music(p) => serde_json::to_value(p),
            JobParams::Lyrics(p) => serde_json::to_value(p),
            JobParams::CoverArt(p) => serde_json::to_value(p),
            JobParams::WavConversion(p) => serde_json::to_value(p),
            JobParams::VocalSeparation(p) => serde_json::to_value(p),
            JobParams::Mp4Render(p) => serde_json::to_value(p),
            JobParams::Image(p) => serde_json::to_value(p),
        }
    }
}
