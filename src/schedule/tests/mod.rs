use super::*;
use crate::schedule::providers::{Provider, ProviderConfig};
use async_trait::async_trait;
use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};

/// Serve `router` on an ephemeral local port and return its base url.
pub(crate) async fn spawn_provider(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

// 测试辅助：按脚本返回状态
struct ScriptedSource {
    script: Mutex<VecDeque<Result<Value, PollError>>>,
    fallback: Result<Value, PollError>,
    delay: Duration,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedSource {
    fn new(script: Vec<Result<Value, PollError>>, fallback: Result<Value, PollError>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            delay: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn pending() -> Self {
        Self::new(vec![], Ok(json!({"status": "PENDING"})))
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self, task_id: &str) -> u32 {
        self.calls.lock().unwrap().get(task_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl StatusSource for ScriptedSource {
    async fn fetch(&self, _kind: JobKind, task_id: &str) -> Result<Value, PollError> {
        *self.calls.lock().unwrap().entry(task_id.to_string()).or_default() += 1;
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

struct FixedSubmitter {
    task_id: String,
}

#[async_trait]
impl TaskSubmitter for FixedSubmitter {
    async fn submit(&self, _params: &JobParams) -> Result<String, SubmissionError> {
        Ok(self.task_id.clone())
    }
}

struct Harness {
    sessions: Arc<PollSessionManager>,
    store: Arc<ResultStore>,
    events: broadcast::Receiver<PollEvent>,
    sink: Arc<dyn ResultSink>,
}

fn harness() -> Harness {
    let store = Arc::new(ResultStore::new());
    let bus = EventSink::new(512);
    let events = bus.subscribe();
    let sink: Arc<dyn ResultSink> = Arc::new(SinkSet::new().with(store.clone()).with(Arc::new(bus)));
    Harness {
        sessions: Arc::new(PollSessionManager::new(sink.clone())),
        store,
        events,
        sink,
    }
}

fn request(task_id: &str, kind: JobKind, source: Arc<ScriptedSource>, options: PollOptions) -> PollRequest {
    PollRequest {
        label: kind.label().to_string(),
        task: Task::new(task_id, kind, options.max_attempts),
        source,
        predicate: CompletionPredicate::for_kind(kind),
        options,
    }
}

fn drain(rx: &mut broadcast::Receiver<PollEvent>) -> Vec<PollEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn music_params() -> JobParams {
    JobParams::Music(params::MusicParams {
        prompt: "city pop at dusk".into(),
        custom_mode: false,
        instrumental: false,
        model: "V4_5".into(),
        style: None,
        title: None,
        negative_tags: None,
    })
}

#[tokio::test(start_paused = true)]
async fn test_music_job_succeeds_on_second_tick() {
    let mut h = harness();
    let source = Arc::new(ScriptedSource::new(
        vec![
            Ok(json!({"status": "PENDING"})),
            Ok(json!({"status": "SUCCESS", "audioUrl": "https://x/y.mp3"})),
        ],
        Ok(json!({"status": "PENDING"})),
    ));
    let orchestrator = Orchestrator::new(
        Arc::new(FixedSubmitter { task_id: "abc123".into() }),
        source.clone(),
        h.sessions.clone(),
        h.sink.clone(),
    );

    let started = Instant::now();
    let (task, handle) = orchestrator.start_job(music_params()).await.unwrap();
    assert_eq!(task.id, "abc123");
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(h.sessions.is_active("generate"));

    let done = handle.join().await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_millis(10_500), "{:?}", elapsed);
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.attempt, 2);
    assert_eq!(done.artifact.as_deref(), Some("https://x/y.mp3"));
    assert_eq!(source.calls("abc123"), 2);

    assert!(!h.sessions.is_active("generate"));
    let stored = h.store.get("abc123").unwrap();
    assert_eq!(stored.status, TaskStatus::Succeeded);
    assert_eq!(stored.artifact.as_deref(), Some("https://x/y.mp3"));

    let events = drain(&mut h.events);
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], PollEvent::Update { task } if task.status == TaskStatus::Pending && task.attempt == 0));
    assert!(matches!(&events[1], PollEvent::Update { task } if task.status == TaskStatus::Processing && task.attempt == 1));
    assert!(matches!(&events[2], PollEvent::Finished { task } if task.status == TaskStatus::Succeeded));
}

#[tokio::test(start_paused = true)]
async fn test_budget_exhausted_times_out() {
    let h = harness();
    let source = Arc::new(ScriptedSource::new(vec![], Ok(json!({"status": "PROCESSING"}))));

    let started = Instant::now();
    let handle = h.sessions.start(request("slow", JobKind::Music, source.clone(), PollOptions::default()));
    let done = handle.join().await.unwrap();

    assert_eq!(done.status, TaskStatus::TimedOut);
    assert_eq!(done.attempt, 60);
    assert_eq!(source.calls("slow"), 60);
    assert!(started.elapsed() >= Duration::from_secs(300));
    assert!(done.error.unwrap().contains("60 attempts"));

    // nothing fires after the cap
    sleep(Duration::from_secs(60)).await;
    assert_eq!(source.calls("slow"), 60);
    assert!(!h.sessions.is_active("generate"));
}

#[tokio::test(start_paused = true)]
async fn test_new_job_supersedes_same_label() {
    let h = harness();
    let source = Arc::new(ScriptedSource::pending());

    let first = h.sessions.start(request("first", JobKind::Music, source.clone(), PollOptions::default()));
    sleep(Duration::from_secs(7)).await;
    assert_eq!(source.calls("first"), 1);

    let second = h.sessions.start(request("second", JobKind::Music, source.clone(), PollOptions::default()));
    let cover = h.sessions.start(request("cover-1", JobKind::CoverArt, source.clone(), PollOptions::default()));

    let superseded = first.join().await.unwrap();
    assert_eq!(superseded.status, TaskStatus::Cancelled);
    assert_eq!(superseded.attempt, 1);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(source.calls("first"), 1);
    assert!(source.calls("second") > 0);
    assert!(source.calls("cover-1") > 0);

    assert_eq!(h.sessions.task_for("generate").as_deref(), Some("second"));
    let active = h.sessions.active();
    assert_eq!(active.len(), 2);
    assert_eq!(active[0].label, "cover");
    assert_eq!(active[1].label, "generate");

    assert_eq!(h.sessions.cancel_all(), 2);
    assert_eq!(second.join().await.unwrap().status, TaskStatus::Cancelled);
    assert_eq!(cover.join().await.unwrap().status, TaskStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_is_idempotent() {
    let h = harness();
    let source = Arc::new(ScriptedSource::pending());
    let handle = h.sessions.start(request("t1", JobKind::Lyrics, source.clone(), PollOptions::default()));

    assert!(h.sessions.cancel("lyrics"));
    assert!(!h.sessions.cancel("lyrics"));
    assert!(!h.sessions.cancel_task("t1"));
    assert!(!h.sessions.cancel("never-started"));

    let done = handle.join().await.unwrap();
    assert_eq!(done.status, TaskStatus::Cancelled);
    assert_eq!(done.attempt, 0);
    assert_eq!(source.calls("t1"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_by_task_id() {
    let h = harness();
    let source = Arc::new(ScriptedSource::pending());
    let handle = h.sessions.start(request("wav-1", JobKind::WavConversion, source, PollOptions::default()));

    assert!(h.sessions.cancel_task("wav-1"));
    assert!(!h.sessions.is_active("wav"));
    assert_eq!(handle.join().await.unwrap().status, TaskStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_transient_error_keeps_polling() {
    let mut h = harness();
    let source = Arc::new(ScriptedSource::new(
        vec![
            Err(PollError::Transport("connection reset".into())),
            Ok(json!({"status": "SUCCESS"})),
        ],
        Ok(json!({"status": "PENDING"})),
    ));

    let handle = h.sessions.start(request("t1", JobKind::Lyrics, source, PollOptions::default()));
    let done = handle.join().await.unwrap();
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.attempt, 2);

    let events = drain(&mut h.events);
    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            PollEvent::PollError { fatal, attempt, .. } => Some((*fatal, *attempt)),
            _ => None,
        })
        .collect();
    assert_eq!(errors, vec![(false, 1)]);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_short_circuits() {
    let h = harness();
    let unauthorized = || PollError::Http { status: 401, body: "unauthorized".into() };
    let source = Arc::new(ScriptedSource::new(vec![], Err(unauthorized())));

    let handle = h.sessions.start(request("t1", JobKind::Mp4Render, source.clone(), PollOptions::default()));
    let done = handle.join().await.unwrap();
    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.attempt, 1);
    assert!(done.error.unwrap().contains("401"));
    assert_eq!(source.calls("t1"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_retried_when_configured() {
    let mut h = harness();
    let source = Arc::new(ScriptedSource::new(
        vec![],
        Err(PollError::Http { status: 401, body: "unauthorized".into() }),
    ));
    let options = PollOptions::default().with_abort_on_fatal(false).with_max_attempts(3);

    let handle = h.sessions.start(request("t1", JobKind::Mp4Render, source.clone(), options));
    let done = handle.join().await.unwrap();
    assert_eq!(done.status, TaskStatus::TimedOut);
    assert_eq!(done.attempt, 3);

    let flagged = drain(&mut h.events)
        .into_iter()
        .filter(|e| matches!(e, PollEvent::PollError { fatal: true, .. }))
        .count();
    assert_eq!(flagged, 3);
}

#[tokio::test(start_paused = true)]
async fn test_late_response_does_not_resurrect_session() {
    let mut h = harness();
    let source = Arc::new(
        ScriptedSource::new(vec![], Ok(json!({"status": "SUCCESS", "imageUrl": "https://cdn/late.png"})))
            .with_delay(Duration::from_secs(2)),
    );

    let handle = h.sessions.start(request("img-1", JobKind::Image, source.clone(), PollOptions::default()));
    // first fetch is in flight between 5s and 7s
    sleep(Duration::from_secs(6)).await;
    assert_eq!(source.calls("img-1"), 1);
    assert!(h.sessions.cancel("image"));

    let done = handle.join().await.unwrap();
    assert_eq!(done.status, TaskStatus::Cancelled);
    assert!(done.last_payload.is_none());
    assert!(done.artifact.is_none());
    assert!(!h.sessions.is_active("image"));
    assert_eq!(h.store.get("img-1").unwrap().status, TaskStatus::Cancelled);

    let events = drain(&mut h.events);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], PollEvent::Finished { task } if task.status == TaskStatus::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_pushed_status_completes_session() {
    let h = harness();
    let source = Arc::new(ScriptedSource::pending());
    let handle = h.sessions.start(request("t-push", JobKind::Music, source.clone(), PollOptions::default()));

    sleep(Duration::from_secs(2)).await;
    let payload = json!({"code": 200, "data": {"callbackType": "complete", "task_id": "t-push", "data": [{"audio_url": "https://cdn/p.mp3"}]}});
    assert_eq!(h.sessions.deliver("t-push", payload), Delivery::Delivered);
    assert_eq!(h.sessions.deliver("unknown", json!({})), Delivery::NoSession);

    let done = handle.join().await.unwrap();
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.attempt, 0);
    assert_eq!(done.artifact.as_deref(), Some("https://cdn/p.mp3"));
    assert_eq!(source.calls("t-push"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pending_push_keeps_schedule() {
    let h = harness();
    let source = Arc::new(ScriptedSource::new(vec![], Ok(json!({"status": "SUCCESS"}))));
    let started = Instant::now();
    let handle = h.sessions.start(request("t1", JobKind::Music, source.clone(), PollOptions::default()));

    sleep(Duration::from_secs(1)).await;
    assert_eq!(
        h.sessions.deliver("t1", json!({"data": {"callbackType": "text", "task_id": "t1"}})),
        Delivery::Delivered
    );

    let done = handle.join().await.unwrap();
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.attempt, 1);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6), "{:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_slow_fetch_delays_next_tick() {
    let h = harness();
    let source = Arc::new(ScriptedSource::pending().with_delay(Duration::from_secs(3)));
    let started = Instant::now();
    let handle = h.sessions.start(request("slow-net", JobKind::Music, source.clone(), PollOptions::default()));

    // ticks start at 5, 13, 21, 29: each waits for the previous call plus one interval
    sleep(Duration::from_millis(4_900)).await;
    assert_eq!(source.calls("slow-net"), 0);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(source.calls("slow-net"), 1);
    sleep(Duration::from_secs(7)).await;
    assert_eq!(source.calls("slow-net"), 1);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(source.calls("slow-net"), 2);
    sleep_until_secs(started, 29.1).await;
    assert_eq!(source.calls("slow-net"), 4);
    sleep_until_secs(started, 36.9).await;
    assert_eq!(source.calls("slow-net"), 4);

    assert!(h.sessions.cancel("generate"));
    assert_eq!(handle.join().await.unwrap().status, TaskStatus::Cancelled);
}

async fn sleep_until_secs(started: Instant, secs: f64) {
    tokio::time::sleep_until(started + Duration::from_secs_f64(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn test_progress_push_after_cancel_is_ignored() {
    let h = harness();
    let orchestrator = Orchestrator::new(
        Arc::new(FixedSubmitter { task_id: "t-c".into() }),
        Arc::new(ScriptedSource::pending()),
        h.sessions.clone(),
        h.sink.clone(),
    );

    let (_, handle) = orchestrator.start_job(music_params()).await.unwrap();
    assert!(orchestrator.cancel("generate"));
    assert_eq!(handle.join().await.unwrap().status, TaskStatus::Cancelled);

    let progress = json!({"data": {"callbackType": "text", "task_id": "t-c"}});
    match orchestrator.accept_push(JobKind::Music, progress).await.unwrap() {
        PushOutcome::Ignored { task_id } => assert_eq!(task_id, "t-c"),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(h.store.get("t-c").unwrap().status, TaskStatus::Cancelled);
    assert_eq!(h.store.latest_for_label("generate").unwrap().status, TaskStatus::Cancelled);
    assert!(!h.sessions.is_active("generate"));
}

#[tokio::test(start_paused = true)]
async fn test_full_push_buffer_reports_busy() {
    let h = harness();
    let orchestrator = Orchestrator::new(
        Arc::new(FixedSubmitter { task_id: "t-busy".into() }),
        Arc::new(ScriptedSource::pending()),
        h.sessions.clone(),
        h.sink.clone(),
    );
    let (submitted, handle) = orchestrator.start_job(music_params()).await.unwrap();

    // the session task has not run yet, so nothing drains the buffer
    let progress = json!({"data": {"callbackType": "text", "task_id": "t-busy"}});
    let mut delivered = 0;
    loop {
        match orchestrator.accept_push(JobKind::Music, progress.clone()).await.unwrap() {
            PushOutcome::Delivered { .. } => delivered += 1,
            PushOutcome::Busy { task_id } => {
                assert_eq!(task_id, "t-busy");
                break;
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert!(delivered > 0);

    // no stray snapshot replaced the live task
    let stored = h.store.get("t-busy").unwrap();
    assert_eq!(stored.submitted_at, submitted.submitted_at);
    assert!(h.sessions.is_active("generate"));

    h.sessions.cancel_all();
    assert_eq!(handle.join().await.unwrap().status, TaskStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_manager_cancels_sessions() {
    let h = harness();
    let source = Arc::new(ScriptedSource::pending());
    let handle = h.sessions.start(request("t1", JobKind::Music, source.clone(), PollOptions::default()));
    drop(h);

    let done = handle.join().await.unwrap();
    assert_eq!(done.status, TaskStatus::Cancelled);
    assert_eq!(source.calls("t1"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_push_without_session_is_recorded() {
    let h = harness();
    let orchestrator = Orchestrator::new(
        Arc::new(FixedSubmitter { task_id: "unused".into() }),
        Arc::new(ScriptedSource::pending()),
        h.sessions.clone(),
        h.sink.clone(),
    );

    let payload = json!({"code": 200, "data": {"callbackType": "complete", "task_id": "t-9", "data": [{"audio_url": "https://cdn/9.mp3"}]}});
    match orchestrator.accept_push(JobKind::Music, payload).await.unwrap() {
        PushOutcome::Recorded { task } => {
            assert_eq!(task.status, TaskStatus::Succeeded);
            assert_eq!(task.artifact.as_deref(), Some("https://cdn/9.mp3"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(h.store.get("t-9").unwrap().status, TaskStatus::Succeeded);

    assert!(orchestrator.accept_push(JobKind::Music, json!({"code": 200})).await.is_err());
}

#[tokio::test]
async fn test_submission_error_starts_no_session() {
    let h = harness();
    let router = Router::new().route(
        "/api/v1/generate",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, r#"{"error":"rate limited"}"#) }),
    );
    let base = spawn_provider(router).await;
    let settings = ProviderSettings::default()
        .with_provider(Provider::Suno, ProviderConfig::new(base, Some("key".into())));
    let client = Arc::new(ProviderClient::new(settings).unwrap());
    let orchestrator = Orchestrator::new(client.clone(), client, h.sessions.clone(), h.sink.clone());

    let err = orchestrator.run_job(music_params()).await.unwrap_err();
    assert_eq!(
        err,
        SubmissionError::Http { status: 500, body: r#"{"error":"rate limited"}"#.into() }
    );
    assert!(h.sessions.active().is_empty());
    assert!(h.store.latest_for_label("generate").is_none());
}

#[tokio::test]
async fn test_invalid_params_never_reach_provider() {
    let h = harness();
    let orchestrator = Orchestrator::new(
        Arc::new(FixedSubmitter { task_id: "t".into() }),
        Arc::new(ScriptedSource::pending()),
        h.sessions.clone(),
        h.sink.clone(),
    );
    let params = JobParams::Lyrics(params::LyricsParams { prompt: String::new() });
    assert!(matches!(orchestrator.run_job(params).await, Err(SubmissionError::InvalidParams(_))));
    assert!(h.sessions.active().is_empty());
}

#[tokio::test]
async fn test_image_job_against_local_provider() {
    let h = harness();
    let router = Router::new()
        .route(
            "/mj/submit/imagine",
            post(|| async { Json(json!({"code": 1, "description": "Submit success", "result": 999})) }),
        )
        .route(
            "/mj/task/999/fetch",
            get(|| async { Json(json!({"id": "999", "status": "SUCCESS", "progress": "100%", "imageUrl": "https://cdn/999.png"})) }),
        );
    let base = spawn_provider(router).await;
    let settings = ProviderSettings::default()
        .with_provider(Provider::Midjourney, ProviderConfig::new(base, Some("key".into())));
    let orchestrator = create_orchestrator(
        ProviderClient::new(settings).unwrap(),
        h.sink.clone(),
        PollOptions::default().with_interval(Duration::from_millis(20)),
    );

    let params = JobParams::Image(params::ImageParams {
        prompt: "paper boats".into(),
        bot_type: None,
        base64_array: vec![],
    });
    let (task, handle) = orchestrator.start_job(params).await.unwrap();
    assert_eq!(task.id, "999");

    let done = handle.join().await.unwrap();
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.artifact.as_deref(), Some("https://cdn/999.png"));

    let check = orchestrator.check_status(JobKind::Image, "999").await.unwrap();
    assert_eq!(check.classification, Classification::Succeeded);
    assert!(!check.delivered);
}
