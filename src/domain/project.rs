use super::credits::UserId;
use crate::error::{BustError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ProjectId = Uuid;

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 500;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Reference to a stored file (uploaded image or generated model).
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AssetRef {
    pub file_id: Uuid,
    pub key: String,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Realistic,
    Stylized,
    Classical,
}

impl Style {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Realistic => "realistic",
            Self::Stylized => "stylized",
            Self::Classical => "classical",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
pub struct GenerationConfig {
    pub quality: Quality,
    pub style: Style,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetadata {
    pub vertices: u32,
    pub faces: u32,
    pub format: String,
    pub processing_ms: u64,
}

/// What a generation provider hands back for one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Success {
        output: AssetRef,
        metadata: GenerationMetadata,
    },
    Failure {
        reason: String,
    },
}

/// Why a dispatch is being claimed. Decides which source states may move to
/// `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchReason {
    /// First dispatch after an input was attached (auto-trigger).
    Initial,
    /// Explicit user or operator retry of a failed project.
    Retry,
    /// Sweep re-dispatch of an attempt that stopped reporting.
    Recovery,
}

/// A state change requested on a project, applied by the store as a single
/// compare-and-set.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectChange {
    AttachInput {
        input: AssetRef,
        at: DateTime<Utc>,
    },
    ClaimDispatch {
        reason: DispatchReason,
        /// Attempts dispatched before this instant are considered dead.
        stale_before: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    Complete {
        attempt: u32,
        output: AssetRef,
        metadata: GenerationMetadata,
        at: DateTime<Utc>,
    },
    Fail {
        attempt: u32,
        reason: String,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectUpdate {
    Applied(Project),
    /// The guard did not hold; carries the project as currently persisted.
    Rejected(Project),
}

/// A generation job. `output` is set if and only if `status == Completed`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub user_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub progress: u8,
    pub input: Option<AssetRef>,
    pub output: Option<AssetRef>,
    pub error: Option<String>,
    pub config: GenerationConfig,
    pub metadata: Option<GenerationMetadata>,
    /// Incremented on every claim; outcomes are only accepted for the current attempt.
    pub attempt: u32,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(
        user_id: UserId,
        title: &str,
        description: Option<String>,
        config: GenerationConfig,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let title = title.trim();
        if title.is_empty() {
            return Err(BustError::ValidationError(
                "Project title is required".to_string(),
            ));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(BustError::ValidationError(format!(
                "Project title must be at most {MAX_TITLE_LEN} characters"
            )));
        }
        let description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        if let Some(d) = &description
            && d.chars().count() > MAX_DESCRIPTION_LEN
        {
            return Err(BustError::ValidationError(format!(
                "Project description must be at most {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.to_string(),
            description,
            status: ProjectStatus::Pending,
            progress: 0,
            input: None,
            output: None,
            error: None,
            config,
            metadata: None,
            attempt: 0,
            dispatched_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether an input may be attached right now: a fresh project, or a
    /// failed one being given a new image. A pending project keeps the first
    /// input it receives.
    pub fn accepts_input(&self) -> bool {
        match self.status {
            ProjectStatus::Pending => self.input.is_none(),
            ProjectStatus::Failed => true,
            ProjectStatus::Processing | ProjectStatus::Completed => false,
        }
    }

    /// Input present, no output yet, and not already settled.
    pub fn awaits_generation(&self) -> bool {
        self.input.is_some()
            && self.output.is_none()
            && matches!(
                self.status,
                ProjectStatus::Pending | ProjectStatus::Processing
            )
    }

    /// A `processing` attempt dispatched before `stale_before`.
    pub fn is_stale(&self, stale_before: DateTime<Utc>) -> bool {
        self.status == ProjectStatus::Processing
            && self.dispatched_at.is_none_or(|at| at < stale_before)
    }

    pub fn apply(&mut self, change: ProjectChange) -> Result<()> {
        match change {
            ProjectChange::AttachInput { input, at } => {
                if !self.accepts_input() {
                    return Err(self.conflict("attach an input"));
                }
                // A failed project starts over as pending with the new image.
                self.status = ProjectStatus::Pending;
                self.input = Some(input);
                self.progress = 0;
                self.error = None;
                self.updated_at = at;
                Ok(())
            }
            ProjectChange::ClaimDispatch {
                reason,
                stale_before,
                at,
            } => {
                if self.input.is_none() || self.output.is_some() {
                    return Err(self.conflict("dispatch"));
                }
                let allowed = match self.status {
                    ProjectStatus::Pending => reason == DispatchReason::Initial,
                    ProjectStatus::Failed => reason == DispatchReason::Retry,
                    ProjectStatus::Processing => self.is_stale(stale_before),
                    ProjectStatus::Completed => false,
                };
                if !allowed {
                    return Err(self.conflict("dispatch"));
                }
                self.status = ProjectStatus::Processing;
                self.attempt += 1;
                self.progress = 0;
                self.error = None;
                self.dispatched_at = Some(at);
                self.updated_at = at;
                Ok(())
            }
            ProjectChange::Complete {
                attempt,
                output,
                metadata,
                at,
            } => {
                self.ensure_current(attempt)?;
                self.status = ProjectStatus::Completed;
                self.progress = 100;
                self.output = Some(output);
                self.metadata = Some(metadata);
                self.error = None;
                self.completed_at = Some(at);
                self.updated_at = at;
                Ok(())
            }
            ProjectChange::Fail {
                attempt,
                reason,
                at,
            } => {
                self.ensure_current(attempt)?;
                self.status = ProjectStatus::Failed;
                self.error = Some(reason);
                self.updated_at = at;
                Ok(())
            }
        }
    }

    fn ensure_current(&self, attempt: u32) -> Result<()> {
        if self.status == ProjectStatus::Processing && self.attempt == attempt {
            Ok(())
        } else {
            Err(self.conflict(&format!("record outcome of attempt {attempt}")))
        }
    }

    fn conflict(&self, action: &str) -> BustError {
        BustError::ConsistencyConflict(format!(
            "project {} is {:?} (attempt {}), cannot {action}",
            self.id, self.status, self.attempt
        ))
    }
}
