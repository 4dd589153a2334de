use super::dispatcher::{DispatchJob, Dispatcher};
use super::ledger::CreditLedger;
use crate::domain::credits::UserId;
use crate::domain::ports::{AssetStoreRef, ImageUpload, ProjectStoreRef};
use crate::domain::project::{
    AssetRef, DispatchReason, GenerationConfig, Project, ProjectChange, ProjectId, ProjectStatus,
    ProjectUpdate,
};
use crate::error::{BustError, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Limits and timings the orchestrator enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationPolicy {
    pub upload_cost: u64,
    pub max_upload_bytes: usize,
    pub timeout: Duration,
    /// Extra wait past `timeout` before a `processing` attempt counts as dead.
    pub stale_grace: Duration,
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            upload_cost: 1,
            max_upload_bytes: 10 * 1024 * 1024,
            timeout: Duration::from_secs(300),
            stale_grace: Duration::from_secs(60),
        }
    }
}

/// Returned by a successful upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub file_id: Uuid,
    pub url: String,
    pub credits_remaining: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<Project>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub examined: usize,
    pub redispatched: usize,
}

/// The Generation Job Orchestrator.
///
/// Charges at upload time, then moves the project to `processing` through a
/// compare-and-set claim in the project store. Only the caller whose claim is
/// applied submits work to the [`Dispatcher`], so a project has at most one
/// attempt in flight no matter how many triggers race.
#[derive(Clone)]
pub struct GenerationOrchestrator {
    projects: ProjectStoreRef,
    assets: AssetStoreRef,
    ledger: CreditLedger,
    dispatcher: Dispatcher,
    policy: GenerationPolicy,
}

impl GenerationOrchestrator {
    pub fn new(
        projects: ProjectStoreRef,
        assets: AssetStoreRef,
        ledger: CreditLedger,
        dispatcher: Dispatcher,
        policy: GenerationPolicy,
    ) -> Self {
        Self {
            projects,
            assets,
            ledger,
            dispatcher,
            policy,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Creates an empty `pending` project. Nothing is charged, but a user with
    /// an empty balance cannot start one.
    pub async fn create_project(
        &self,
        user_id: UserId,
        title: &str,
        description: Option<String>,
        config: GenerationConfig,
    ) -> Result<Project> {
        let balance = self.ledger.balance(user_id).await?;
        if balance == 0 {
            return Err(BustError::InsufficientCredits {
                available: 0,
                requested: self.policy.upload_cost,
            });
        }
        let project = Project::new(user_id, title, description, config, Utc::now())?;
        self.projects.insert(project.clone()).await?;
        info!(project = %project.id, %user_id, "project created");
        Ok(project)
    }

    /// Accepts an input image, charging for it before anything is stored.
    ///
    /// With a `project_id` the image becomes that project's input and
    /// generation starts in the background. Rejected uploads are never
    /// charged; a charge whose upload cannot complete is refunded, including
    /// the loser of two uploads racing for the same project.
    pub async fn upload_input(
        &self,
        user_id: UserId,
        project_id: Option<ProjectId>,
        upload: ImageUpload,
    ) -> Result<UploadReceipt> {
        upload.validate(self.policy.max_upload_bytes)?;
        if let Some(project_id) = project_id {
            let project = self.owned_project(user_id, project_id).await?;
            if !project.accepts_input() {
                return Err(BustError::ValidationError(format!(
                    "Project {project_id} is {:?} and does not accept a new input",
                    project.status
                )));
            }
        }

        let reference = match project_id {
            Some(id) => format!("upload:{id}"),
            None => "upload".to_string(),
        };
        let credits_remaining = self
            .ledger
            .spend(user_id, self.policy.upload_cost, &reference)
            .await?;

        let asset = match self.assets.put(user_id, &upload).await {
            Ok(asset) => asset,
            Err(e) => {
                self.refund_upload(user_id, &reference).await;
                return Err(e);
            }
        };
        debug!(%user_id, file = %asset.key, size = upload.bytes.len(), "input stored");

        let project = match project_id {
            Some(project_id) => match self.attach_input(project_id, asset.clone()).await {
                Ok(project) => Some(project),
                Err(e) => {
                    self.refund_upload(user_id, &reference).await;
                    return Err(e);
                }
            },
            None => None,
        };

        Ok(UploadReceipt {
            file_id: asset.file_id,
            url: asset.url,
            credits_remaining,
            project,
        })
    }

    async fn attach_input(&self, project_id: ProjectId, input: AssetRef) -> Result<Project> {
        let change = ProjectChange::AttachInput {
            input,
            at: Utc::now(),
        };
        let project = match self.projects.update(project_id, change).await? {
            ProjectUpdate::Applied(project) => project,
            ProjectUpdate::Rejected(current) => {
                return Err(BustError::ValidationError(format!(
                    "Project {project_id} is {:?} and does not accept a new input",
                    current.status
                )));
            }
        };
        self.trigger(project.id, DispatchReason::Initial).await
    }

    async fn refund_upload(&self, user_id: UserId, reference: &str) {
        let refund = format!("refund:{reference}");
        if let Err(e) = self
            .ledger
            .earn(user_id, self.policy.upload_cost, &refund)
            .await
        {
            error!(
                alert = "credit_not_applied",
                %user_id,
                reference = %refund,
                "upload refund failed: {e}"
            );
        }
    }

    /// Claims the project for a new attempt and, if this call won the claim,
    /// submits it. Returns the project as persisted after the attempt.
    pub async fn trigger(&self, project_id: ProjectId, reason: DispatchReason) -> Result<Project> {
        let now = Utc::now();
        let change = ProjectChange::ClaimDispatch {
            reason,
            stale_before: self.stale_before(now),
            at: now,
        };
        match self.projects.update(project_id, change).await? {
            ProjectUpdate::Applied(project) => {
                let input = project
                    .input
                    .clone()
                    .ok_or_else(|| BustError::internal("claimed project has no input"))?;
                info!(project = %project.id, attempt = project.attempt, ?reason, "generation dispatched");
                self.dispatcher.submit(DispatchJob {
                    project_id: project.id,
                    attempt: project.attempt,
                    input,
                    config: project.config,
                });
                Ok(project)
            }
            ProjectUpdate::Rejected(project) => {
                debug!(project = %project.id, status = ?project.status, ?reason, "dispatch claim not taken");
                Ok(project)
            }
        }
    }

    fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let window = TimeDelta::from_std(self.policy.timeout + self.policy.stale_grace)
            .unwrap_or(TimeDelta::MAX);
        now.checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    async fn owned_project(&self, user_id: UserId, project_id: ProjectId) -> Result<Project> {
        self.projects
            .get(project_id)
            .await?
            .filter(|p| p.user_id == user_id)
            .ok_or(BustError::ProjectNotFound(project_id))
    }

    /// Reads a project. If it has an input and no output yet, this also
    /// starts generation (or takes over a dead attempt).
    pub async fn get_project(&self, user_id: UserId, project_id: ProjectId) -> Result<Project> {
        let project = self.owned_project(user_id, project_id).await?;
        if !project.awaits_generation() {
            return Ok(project);
        }
        let reason = match project.status {
            ProjectStatus::Processing => DispatchReason::Recovery,
            _ => DispatchReason::Initial,
        };
        self.trigger(project_id, reason).await
    }

    /// Re-runs a failed project with its current input. No credit is charged.
    pub async fn retry(&self, user_id: UserId, project_id: ProjectId) -> Result<Project> {
        let project = self.owned_project(user_id, project_id).await?;
        let reason = match project.status {
            ProjectStatus::Failed if project.input.is_some() => DispatchReason::Retry,
            ProjectStatus::Processing if project.is_stale(self.stale_before(Utc::now())) => {
                DispatchReason::Recovery
            }
            status => {
                return Err(BustError::ValidationError(format!(
                    "Project {project_id} is {status:?} and cannot be retried"
                )));
            }
        };
        self.trigger(project_id, reason).await
    }

    /// Newest first.
    pub async fn list_projects(&self, user_id: UserId) -> Result<Vec<Project>> {
        let mut projects = self.projects.list_for_user(user_id).await?;
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    /// Re-dispatches dead `processing` attempts and `pending` projects whose
    /// input never got dispatched.
    pub async fn recover_stuck(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let stale_before = self.stale_before(Utc::now());

        let mut candidates = Vec::new();
        for project in self.projects.list_by_status(ProjectStatus::Processing).await? {
            if project.is_stale(stale_before) {
                candidates.push((project.id, DispatchReason::Recovery));
            }
        }
        for project in self.projects.list_by_status(ProjectStatus::Pending).await? {
            if project.awaits_generation() {
                candidates.push((project.id, DispatchReason::Initial));
            }
        }

        for (project_id, reason) in candidates {
            report.examined += 1;
            let before = self.projects.get(project_id).await?.map(|p| p.attempt);
            let project = self.trigger(project_id, reason).await?;
            if before.is_some_and(|attempt| project.attempt > attempt) {
                report.redispatched += 1;
            }
        }
        if report.examined > 0 {
            info!(
                examined = report.examined,
                redispatched = report.redispatched,
                "generation recovery finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::assets::InMemoryAssetStore;
    use crate::infrastructure::in_memory::{InMemoryCreditAccountStore, InMemoryProjectStore};
    use crate::infrastructure::providers::ProceduralProvider;
    use std::sync::Arc;

    fn orchestrator() -> (GenerationOrchestrator, CreditLedger) {
        orchestrator_with_delay(Duration::from_millis(5))
    }

    fn orchestrator_with_delay(delay: Duration) -> (GenerationOrchestrator, CreditLedger) {
        let ledger = CreditLedger::new(Arc::new(InMemoryCreditAccountStore::new()), 5);
        let projects = Arc::new(InMemoryProjectStore::new());
        let dispatcher = Dispatcher::new(
            Arc::new(ProceduralProvider::new(delay)),
            projects.clone(),
            Duration::from_secs(5),
        );
        let orchestrator = GenerationOrchestrator::new(
            projects,
            Arc::new(InMemoryAssetStore::new()),
            ledger.clone(),
            dispatcher,
            GenerationPolicy::default(),
        );
        (orchestrator, ledger)
    }

    fn png() -> ImageUpload {
        ImageUpload {
            original_name: "face.png".into(),
            mime_type: "image/png".into(),
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
        }
    }

    #[tokio::test]
    async fn test_upload_charges_and_completes() {
        let (orchestrator, ledger) = orchestrator();
        let user = Uuid::new_v4();
        ledger.open_account(user).await.unwrap();
        let project = orchestrator
            .create_project(user, "Grandma", None, GenerationConfig::default())
            .await
            .unwrap();

        let receipt = orchestrator
            .upload_input(user, Some(project.id), png())
            .await
            .unwrap();
        assert_eq!(receipt.credits_remaining, 4);
        assert_eq!(
            receipt.project.as_ref().map(|p| p.status),
            Some(ProjectStatus::Processing)
        );

        orchestrator.dispatcher().wait_idle().await;
        let project = orchestrator.get_project(user, project.id).await.unwrap();
        assert_eq!(project.status, ProjectStatus::Completed);
        assert!(project.output.is_some());
        assert_eq!(ledger.balance(user).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_rejected_upload_is_not_charged() {
        let (orchestrator, ledger) = orchestrator();
        let user = Uuid::new_v4();
        ledger.open_account(user).await.unwrap();

        let mut gif = png();
        gif.mime_type = "image/gif".into();
        assert!(orchestrator.upload_input(user, None, gif).await.is_err());
        assert_eq!(ledger.balance(user).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_upload_to_processing_project_is_rejected_without_charge() {
        let (orchestrator, ledger) = orchestrator_with_delay(Duration::from_secs(60));
        let user = Uuid::new_v4();
        ledger.open_account(user).await.unwrap();
        let project = orchestrator
            .create_project(user, "Busy", None, GenerationConfig::default())
            .await
            .unwrap();
        orchestrator
            .upload_input(user, Some(project.id), png())
            .await
            .unwrap();

        let second = orchestrator.upload_input(user, Some(project.id), png()).await;
        assert!(matches!(second, Err(BustError::ValidationError(_))));
        assert_eq!(ledger.balance(user).await.unwrap(), 4);
        assert_eq!(orchestrator.dispatcher().in_flight(), 1);
    }

    #[tokio::test]
    async fn test_create_project_requires_credits() {
        let (orchestrator, ledger) = orchestrator();
        let user = Uuid::new_v4();
        ledger.open_account(user).await.unwrap();
        ledger.spend(user, 5, "test").await.unwrap();

        let result = orchestrator
            .create_project(user, "Nope", None, GenerationConfig::default())
            .await;
        assert!(matches!(result, Err(BustError::InsufficientCredits { .. })));
    }

    #[tokio::test]
    async fn test_projects_are_private() {
        let (orchestrator, ledger) = orchestrator();
        let owner = Uuid::new_v4();
        ledger.open_account(owner).await.unwrap();
        let project = orchestrator
            .create_project(owner, "Mine", None, GenerationConfig::default())
            .await
            .unwrap();

        let other = Uuid::new_v4();
        assert!(matches!(
            orchestrator.get_project(other, project.id).await,
            Err(BustError::ProjectNotFound(_))
        ));
        assert!(orchestrator.list_projects(other).await.unwrap().is_empty());
        assert_eq!(orchestrator.list_projects(owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_requires_failed_project() {
        let (orchestrator, ledger) = orchestrator();
        let user = Uuid::new_v4();
        ledger.open_account(user).await.unwrap();
        let project = orchestrator
            .create_project(user, "Fresh", None, GenerationConfig::default())
            .await
            .unwrap();
        assert!(matches!(
            orchestrator.retry(user, project.id).await,
            Err(BustError::ValidationError(_))
        ));
    }

    #[test]
    fn test_stale_window_is_timeout_plus_grace() {
        let (orchestrator, _) = orchestrator();
        let now = Utc::now();
        assert_eq!(
            now - orchestrator.stale_before(now),
            TimeDelta::seconds(360)
        );
    }
}
