use crate::domain::ports::{GenerationProviderRef, ProjectStoreRef};
use crate::domain::project::{
    AssetRef, GenerationConfig, GenerationOutcome, ProjectChange, ProjectId, ProjectUpdate,
};
use chrono::Utc;
use std::time::{Duration, Instant};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Reason recorded when the provider does not answer within the bound.
pub const TIMEOUT_REASON: &str = "timeout";

/// One claimed generation attempt.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub project_id: ProjectId,
    pub attempt: u32,
    pub input: AssetRef,
    pub config: GenerationConfig,
}

/// Runs provider calls in the background, detached from the caller.
///
/// Each job awaits the provider under a timeout and writes the outcome back
/// for its own attempt only; a superseded attempt's result is dropped by the
/// store's compare-and-set.
#[derive(Clone)]
pub struct Dispatcher {
    provider: GenerationProviderRef,
    projects: ProjectStoreRef,
    timeout: Duration,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(provider: GenerationProviderRef, projects: ProjectStoreRef, timeout: Duration) -> Self {
        Self {
            provider,
            projects,
            timeout,
            tracker: TaskTracker::new(),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Starts `job` on the runtime and returns immediately.
    pub fn submit(&self, job: DispatchJob) {
        debug!(project = %job.project_id, attempt = job.attempt, provider = self.provider.name(), "dispatch submitted");
        let provider = self.provider.clone();
        let projects = self.projects.clone();
        let timeout = self.timeout;
        self.tracker
            .spawn(async move { Self::run(provider, projects, timeout, job).await });
    }

    async fn run(
        provider: GenerationProviderRef,
        projects: ProjectStoreRef,
        timeout: Duration,
        job: DispatchJob,
    ) {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, provider.dispatch(&job.input, &job.config)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(project = %job.project_id, attempt = job.attempt, ?timeout, "generation timed out");
                GenerationOutcome::Failure {
                    reason: TIMEOUT_REASON.to_string(),
                }
            }
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let change = match outcome {
            GenerationOutcome::Success {
                output,
                mut metadata,
            } => {
                metadata.processing_ms = elapsed_ms;
                ProjectChange::Complete {
                    attempt: job.attempt,
                    output,
                    metadata,
                    at: Utc::now(),
                }
            }
            GenerationOutcome::Failure { reason } => ProjectChange::Fail {
                attempt: job.attempt,
                reason,
                at: Utc::now(),
            },
        };

        match projects.update(job.project_id, change).await {
            Ok(ProjectUpdate::Applied(project)) => info!(
                project = %project.id,
                attempt = job.attempt,
                status = ?project.status,
                elapsed_ms,
                error = project.error.as_deref().unwrap_or_default(),
                "generation finished"
            ),
            Ok(ProjectUpdate::Rejected(project)) => debug!(
                project = %project.id,
                attempt = job.attempt,
                current_attempt = project.attempt,
                "outcome of superseded attempt dropped"
            ),
            Err(e) => error!(project = %job.project_id, attempt = job.attempt, "failed to record generation outcome: {e}"),
        }
    }

    /// Number of attempts currently running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every submitted attempt has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{GenerationProvider, ProjectStore};
    use crate::domain::project::{DispatchReason, Project, ProjectStatus};
    use crate::infrastructure::in_memory::InMemoryProjectStore;
    use crate::infrastructure::providers::ProceduralProvider;
    use async_trait::async_trait;
    use chrono::Duration as TimeDelta;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Hanging;

    #[async_trait]
    impl GenerationProvider for Hanging {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn dispatch(&self, _: &AssetRef, _: &GenerationConfig) -> GenerationOutcome {
            std::future::pending().await
        }
    }

    async fn claimed_project(store: &InMemoryProjectStore) -> DispatchJob {
        let project = Project::new(
            Uuid::new_v4(),
            "Bust",
            None,
            GenerationConfig::default(),
            Utc::now(),
        )
        .unwrap();
        let id = project.id;
        store.insert(project).await.unwrap();
        let input = AssetRef {
            file_id: Uuid::new_v4(),
            key: "u/face.png".into(),
            url: "/uploads/u/face.png".into(),
        };
        store
            .update(id, ProjectChange::AttachInput {
                input: input.clone(),
                at: Utc::now(),
            })
            .await
            .unwrap();
        let now = Utc::now();
        let ProjectUpdate::Applied(project) = store
            .update(id, ProjectChange::ClaimDispatch {
                reason: DispatchReason::Initial,
                stale_before: now - TimeDelta::minutes(6),
                at: now,
            })
            .await
            .unwrap()
        else {
            panic!("claim should apply");
        };
        DispatchJob {
            project_id: id,
            attempt: project.attempt,
            input,
            config: project.config,
        }
    }

    #[tokio::test]
    async fn test_successful_dispatch_completes_project() {
        let store = InMemoryProjectStore::new();
        let job = claimed_project(&store).await;
        let dispatcher = Dispatcher::new(
            Arc::new(ProceduralProvider::new(Duration::from_millis(5))),
            Arc::new(store.clone()),
            Duration::from_secs(5),
        );

        dispatcher.submit(job.clone());
        dispatcher.wait_idle().await;

        let project = store.get(job.project_id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Completed);
        assert_eq!(project.progress, 100);
        assert!(project.output.is_some());
        assert_eq!(project.metadata.unwrap().format, "OBJ");
    }

    #[tokio::test]
    async fn test_hanging_provider_times_out() {
        let store = InMemoryProjectStore::new();
        let job = claimed_project(&store).await;
        let dispatcher = Dispatcher::new(
            Arc::new(Hanging),
            Arc::new(store.clone()),
            Duration::from_millis(20),
        );

        dispatcher.submit(job.clone());
        dispatcher.wait_idle().await;
        assert_eq!(dispatcher.in_flight(), 0);

        let project = store.get(job.project_id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Failed);
        assert_eq!(project.error.as_deref(), Some(TIMEOUT_REASON));
        assert!(project.output.is_none());
    }

    #[tokio::test]
    async fn test_stale_attempt_outcome_is_dropped() {
        let store = InMemoryProjectStore::new();
        let mut job = claimed_project(&store).await;
        job.attempt += 7;
        let dispatcher = Dispatcher::new(
            Arc::new(ProceduralProvider::new(Duration::ZERO)),
            Arc::new(store.clone()),
            Duration::from_secs(1),
        );

        dispatcher.submit(job.clone());
        dispatcher.wait_idle().await;

        let project = store.get(job.project_id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Processing);
        assert!(project.output.is_none());
    }
}
