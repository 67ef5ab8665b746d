use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TaskError;
use crate::executor::traits::RetryStrategyPlugin;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Common task interface for executor graph handling.
pub trait TaskLike: Clone + Send + Sync {
    fn id(&self) -> &str;
    fn dependencies(&self) -> &[String];
}

/// What a running task knows about itself.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub run_id: String,
    pub task_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// The single run capability every task exposes to the engine.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, ctx: TaskContext) -> Result<(), TaskError>;
}

struct FnRunner<F>(F);

#[async_trait]
impl<F, Fut> TaskRunner for FnRunner<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send,
{
    async fn run(&self, ctx: TaskContext) -> Result<(), TaskError> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a [`TaskRunner`].
pub fn task_fn<F, Fut>(f: F) -> Arc<dyn TaskRunner>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    Arc::new(FnRunner(f))
}

/// A unit of work in the run graph. Immutable once the graph is built.
#[derive(Clone)]
pub struct Task {
    id: String,
    dependencies: Vec<String>,
    runner: Arc<dyn TaskRunner>,
    retry: Arc<dyn RetryStrategyPlugin>,
    max_attempts: u32,
    timeout: Duration,
}

impl Task {
    /// A task with one attempt and the default timeout.
    pub fn new(
        id: impl Into<String>,
        runner: Arc<dyn TaskRunner>,
        retry: Arc<dyn RetryStrategyPlugin>,
    ) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            runner,
            retry,
            max_attempts: 1,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Total attempt budget, first run included. Clamped to at least 1.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn attempt_budget(&self) -> u32 {
        self.max_attempts
    }

    pub fn timeout_duration(&self) -> Duration {
        self.timeout
    }

    pub fn runner(&self) -> &Arc<dyn TaskRunner> {
        &self.runner
    }

    pub fn retry_strategy(&self) -> &Arc<dyn RetryStrategyPlugin> {
        &self.retry
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("retry", &self.retry.name())
            .field("max_attempts", &self.max_attempts)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TaskLike for Task {
    fn id(&self) -> &str {
        &self.id
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}
