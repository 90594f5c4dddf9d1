use serde::{Deserialize, Serialize};
use serde_json::Value;
use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::str::FromStr;


#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Music,
    Lyrics,
    CoverArt,
    WavConversion,
    VocalSeparation,
    Mp4Render,
    Image,
}

impl JobKind {
    pub const ALL: [JobKind; 7] = [
        JobKind::Music,
        JobKind::Lyrics,
        JobKind::CoverArt,
        JobKind::WavConversion,
        JobKind::VocalSeparation,
        JobKind::Mp4Render,
        JobKind::Image,
    ];

    /// Session slot for this kind. A new job supersedes the running job of
    /// the same label.
    pub fn label(&self) -> &'static str {
        match self {
            JobKind::Music => "generate",
            JobKind::Lyrics => "lyrics",
            JobKind::CoverArt => "cover",
            JobKind::WavConversion => "wav",
            JobKind::VocalSeparation => "vocal",
            JobKind::Mp4Render => "mp4",
            JobKind::Image => "image",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Music => "music",
            JobKind::Lyrics => "lyrics",
            JobKind::CoverArt => "cover_art",
            JobKind::WavConversion => "wav_conversion",
            JobKind::VocalSeparation => "vocal_separation",
            JobKind::Mp4Render => "mp4_render",
            JobKind::Image => "image",
        }
    }
}

impl Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

// accepts both the kind name and its session label
impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s || kind.label() == s)
            .ok_or_else(|| format!("Unknown job kind: {}", s))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl TaskStatus {
    /// No further polling happens once a task reaches one of these.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::TimedOut)
    }

    /// Outcomes reported by the provider itself. These are never overwritten.
    pub fn is_settled(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = String;
    fn try_from(status: String) -> Result<Self, Self::Error> {
        match status.as_str() {
            "Pending" => Ok(TaskStatus::Pending),
            "Processing" => Ok(TaskStatus::Processing),
            "Succeeded" => Ok(TaskStatus::Succeeded),
            "Failed" => Ok(TaskStatus::Failed),
            "TimedOut" => Ok(TaskStatus::TimedOut),
            "Cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(format!("Invalid task status: {}", status)),
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Verdict of a completion predicate for one status payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum Classification {
    Pending,
    Succeeded,
    Failed(String),
}

impl Classification {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Classification::Pending)
    }
}

/// One generation job submitted to an external provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub job_kind: JobKind,
    pub label: String,
    pub status: TaskStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_payload: Option<Value>,
    // audio/image/video url, or lyrics text
    pub artifact: Option<String>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, job_kind: JobKind, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            job_kind,
            label: job_kind.label().to_string(),
            status: TaskStatus::Pending,
            attempt: 0,
            max_attempts,
            submitted_at: now,
            updated_at: now,
            completed_at: None,
            last_payload: None,
            artifact: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.completed_at.unwrap_or_else(Utc::now) - self.submitted_at
    }
}
