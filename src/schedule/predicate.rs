use std::collections::HashMap;
use serde_json::Value;

use crate::schedule::extract::{first_field, lookup};
use crate::schedule::types::{Classification, JobKind};

const STATUS_FIELDS: &[&str] = &["status", "data.status", "data.successFlag", "data.callbackType"];

const SUCCESS: &[&str] = &["SUCCESS", "SUCCEED", "SUCCEEDED", "COMPLETED", "COMPLETE", "FINISHED"];

const FAILURE: &[&str] = &[
    "FAILED",
    "FAILURE",
    "FAIL",
    "ERROR",
    "CANCELED",
    "CANCELLED",
    "CREATE_TASK_FAILED",
    "GENERATE_AUDIO_FAILED",
    "GENERATE_LYRICS_FAILED",
    "GENERATE_COVER_FAILED",
    "GENERATE_WAV_FAILED",
    "GENERATE_MP4_FAILED",
    "CALLBACK_EXCEPTION",
    "SENSITIVE_WORD_ERROR",
];

const ERROR_CODE_FIELDS: &[&str] = &["errorCode", "data.errorCode"];

const ERROR_MESSAGE_FIELDS: &[&str] = &[
    "errorMessage",
    "data.errorMessage",
    "failReason",
    "data.failReason",
];

/// Decides whether a status payload is still running, done, or failed.
///
/// Success is declared when the status string is a known success value *or*
/// an artifact field is populated, whichever shows up first. An explicit
/// failure status takes precedence over an artifact.
#[derive(Debug, Clone)]
pub struct CompletionPredicate {
    status_fields: &'static [&'static str],
    success: &'static [&'static str],
    failure: &'static [&'static str],
    artifact_fields: &'static [&'static str],
    error_code_fields: &'static [&'static str],
    error_message_fields: &'static [&'static str],
}

impl CompletionPredicate {
    pub fn new(artifact_fields: &'static [&'static str]) -> Self {
        Self {
            status_fields: STATUS_FIELDS,
            success: SUCCESS,
            failure: FAILURE,
            artifact_fields,
            error_code_fields: ERROR_CODE_FIELDS,
            error_message_fields: ERROR_MESSAGE_FIELDS,
        }
    }

    pub fn with_status_fields(mut self, fields: &'static [&'static str]) -> Self {
        self.status_fields = fields;
        self
    }

    pub fn with_success(mut self, values: &'static [&'static str]) -> Self {
        self.success = values;
        self
    }

    pub fn with_failure(mut self, values: &'static [&'static str]) -> Self {
        self.failure = values;
        self
    }

    pub fn for_kind(kind: JobKind) -> Self {
        let artifact_fields: &'static [&'static str] = match kind {
            JobKind::Music => &[
                "audioUrl",
                "data.audioUrl",
                "data.response.sunoData.0.audioUrl",
                "data.data.0.audio_url",
            ],
            JobKind::Lyrics => &["lyrics", "data.response.data.0.text", "data.data.0.text"],
            JobKind::CoverArt => &["imageUrl", "data.response.images.0", "data.data.images.0"],
            JobKind::WavConversion => &["audioWavUrl", "data.response.audioWavUrl", "data.data.audio_wav_url"],
            JobKind::VocalSeparation => &[
                "vocalUrl",
                "data.response.vocalUrl",
                "data.response.instrumentalUrl",
                "data.data.vocal_url",
            ],
            JobKind::Mp4Render => &["videoUrl", "data.response.videoUrl", "data.data.video_url"],
            JobKind::Image => &["imageUrl", "data.imageUrl"],
        };
        Self::new(artifact_fields)
    }

    /// Normalized (trimmed, uppercased) status string, if any.
    pub fn status(&self, payload: &Value) -> Option<String> {
        first_field(self.status_fields, payload).map(|s| s.to_uppercase())
    }

    pub fn artifact(&self, payload: &Value) -> Option<String> {
        first_field(self.artifact_fields, payload)
    }

    fn error_code(&self, payload: &Value) -> Option<i64> {
        self.error_code_fields
            .iter()
            .filter_map(|path| lookup(payload, path))
            .filter_map(Value::as_i64)
            .find(|code| *code != 0)
    }

    fn failure_reason(&self, payload: &Value, status: Option<&str>) -> String {
        first_field(self.error_message_fields, payload)
            .or_else(|| status.map(str::to_string))
            .unwrap_or_else(|| "provider reported failure".to_string())
    }

    pub fn classify(&self, payload: &Value) -> Classification {
        let status = self.status(payload);

        if let Some(status) = status.as_deref() {
            if self.failure.contains(&status) {
                return Classification::Failed(self.failure_reason(payload, Some(status)));
            }
            if self.success.contains(&status) {
                return Classification::Succeeded;
            }
        }

        if let Some(code) = self.error_code(payload) {
            let reason = self.failure_reason(payload, status.as_deref());
            return Classification::Failed(format!("error code {}: {}", code, reason));
        }

        if self.artifact(payload).is_some() {
            return Classification::Succeeded;
        }

        Classification::Pending
    }
}

/// One predicate per job kind. Entries can be replaced when a provider
/// changes its status vocabulary.
#[derive(Debug, Clone)]
pub struct PredicateRegistry {
    predicates: HashMap<JobKind, CompletionPredicate>,
}

impl Default for PredicateRegistry {
    fn default() -> Self {
        let predicates = JobKind::ALL
            .into_iter()
            .map(|kind| (kind, CompletionPredicate::for_kind(kind)))
            .collect();
        Self { predicates }
    }
}

impl PredicateRegistry {
    pub fn register(&mut self, kind: JobKind, predicate: CompletionPredicate) {
        self.predicates.insert(kind, predicate);
    }

    pub fn get(&self, kind: JobKind) -> CompletionPredicate {
        self.predicates
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| CompletionPredicate::for_kind(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_status_without_artifact() {
        let predicate = CompletionPredicate::for_kind(JobKind::Music);
        assert_eq!(predicate.classify(&json!({"status": "SUCCESS"})), Classification::Succeeded);
        assert_eq!(predicate.classify(&json!({"status": "completed"})), Classification::Succeeded);
        assert_eq!(predicate.classify(&json!({"status": " Succeed "})), Classification::Succeeded);
    }

    #[test]
    fn test_artifact_without_status() {
        let predicate = CompletionPredicate::for_kind(JobKind::Music);
        let payload = json!({"audioUrl": "https://x/y.mp3"});
        assert_eq!(predicate.classify(&payload), Classification::Succeeded);
        assert_eq!(predicate.artifact(&payload).as_deref(), Some("https://x/y.mp3"));

        let image = CompletionPredicate::for_kind(JobKind::Image);
        let payload = json!({"status": "IN_PROGRESS", "imageUrl": "https://cdn/a.png"});
        assert_eq!(image.classify(&payload), Classification::Succeeded);
    }

    #[test]
    fn test_pending_statuses() {
        let predicate = CompletionPredicate::for_kind(JobKind::Music);
        for status in ["PENDING", "PROCESSING", "TEXT_SUCCESS", "FIRST_SUCCESS"] {
            assert_eq!(predicate.classify(&json!({"data": {"status": status}})), Classification::Pending);
        }
        assert_eq!(predicate.classify(&json!({})), Classification::Pending);
        assert_eq!(predicate.classify(&json!({"audioUrl": ""})), Classification::Pending);
    }

    #[test]
    fn test_failure_status_wins_over_artifact() {
        let predicate = CompletionPredicate::for_kind(JobKind::Image);
        let payload = json!({"status": "FAILURE", "imageUrl": "https://cdn/stale.png", "failReason": "banned prompt"});
        assert_eq!(predicate.classify(&payload), Classification::Failed("banned prompt".into()));
    }

    #[test]
    fn test_error_code_marks_failure() {
        let predicate = CompletionPredicate::for_kind(JobKind::WavConversion);
        let payload = json!({"code": 200, "data": {"successFlag": "PENDING", "errorCode": 413, "errorMessage": "too large"}});
        assert_eq!(
            predicate.classify(&payload),
            Classification::Failed("error code 413: too large".into())
        );

        let payload = json!({"code": 200, "data": {"successFlag": "PENDING", "errorCode": 0}});
        assert_eq!(predicate.classify(&payload), Classification::Pending);
    }

    #[test]
    fn test_suno_record_info_shape() {
        let predicate = CompletionPredicate::for_kind(JobKind::Music);
        let payload = json!({
            "code": 200,
            "msg": "success",
            "data": {
                "taskId": "abc123",
                "status": "SUCCESS",
                "response": {"sunoData": [{"audioUrl": "https://cdn/1.mp3"}]}
            }
        });
        assert_eq!(predicate.classify(&payload), Classification::Succeeded);
        assert_eq!(predicate.artifact(&payload).as_deref(), Some("https://cdn/1.mp3"));

        let failed = json!({"data": {"status": "SENSITIVE_WORD_ERROR"}});
        assert_eq!(
            predicate.classify(&failed),
            Classification::Failed("SENSITIVE_WORD_ERROR".into())
        );
    }

    #[test]
    fn test_push_callback_type() {
        let predicate = CompletionPredicate::for_kind(JobKind::Music);
        let first = json!({"data": {"callbackType": "first", "task_id": "t"}});
        assert_eq!(predicate.classify(&first), Classification::Pending);
        let complete = json!({"data": {"callbackType": "complete", "task_id": "t"}});
        assert_eq!(predicate.classify(&complete), Classification::Succeeded);
    }

    #[test]
    fn test_registry_override() {
        const DONE: &[&str] = &["DONE"];
        let mut registry = PredicateRegistry::default();
        assert_eq!(registry.get(JobKind::Lyrics).classify(&json!({"status": "DONE"})), Classification::Pending);

        registry.register(JobKind::Lyrics, CompletionPredicate::for_kind(JobKind::Lyrics).with_success(DONE));
        assert_eq!(registry.get(JobKind::Lyrics).classify(&json!({"status": "DONE"})), Classification::Succeeded);
    }
}
