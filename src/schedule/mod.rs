use std::sync::Arc;


pub mod types;
pub mod error;
pub mod params;
pub mod extract;
pub mod predicate;
pub mod providers;
pub mod scheduler;
pub mod callback;
pub mod orchestrator;
#[cfg(test)]
pub(crate) mod tests;

// 重导出主要类型
pub use types::{Classification, JobKind, Task, TaskStatus};
pub use error::{PollError, SubmissionError};
pub use params::JobParams;

pub use predicate::{CompletionPredicate, PredicateRegistry};
pub use providers::{ProviderClient, ProviderSettings, StatusSource, TaskSubmitter};
pub use callback::{EventSink, PollEvent, ResultSink, ResultStore, SinkSet};

// 重导出调度器接口
pub use scheduler::{Delivery, PollOptions, PollRequest, PollSessionManager, SessionHandle};
pub use orchestrator::{Orchestrator, PushOutcome, StatusCheck};

// 提供便捷的构建方法
pub fn create_orchestrator(
    client: ProviderClient,
    sink: Arc<dyn ResultSink>,
    options: PollOptions,
) -> Orchestrator {
    let client = Arc::new(client);
    let sessions = Arc::new(PollSessionManager::new(sink.clone()));
    Orchestrator::new(client.clone(), client, sessions, sink).with_options(options)
}
