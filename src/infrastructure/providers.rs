//! Generation provider adapters. Which one runs is chosen by
//! [`ProviderKind`](crate::config::ProviderKind).

use crate::domain::ports::GenerationProvider;
use crate::domain::project::{AssetRef, GenerationConfig, GenerationMetadata, GenerationOutcome, Quality};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Local stand-in for a mesh generator: waits `delay`, then reports a
/// procedurally named OBJ bust.
#[derive(Debug, Clone)]
pub struct ProceduralProvider {
    delay: Duration,
}

impl ProceduralProvider {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    fn estimate(quality: Quality) -> (u32, u32) {
        match quality {
            Quality::Low => (16, 13),
            Quality::Medium => (31, 10),
            Quality::High => (16, 8),
        }
    }
}

#[async_trait]
impl GenerationProvider for ProceduralProvider {
    fn name(&self) -> &'static str {
        "procedural"
    }

    async fn dispatch(&self, input: &AssetRef, config: &GenerationConfig) -> GenerationOutcome {
        debug!(input = %input.key, quality = config.quality.as_str(), "procedural generation started");
        tokio::time::sleep(self.delay).await;

        let job_id = Uuid::new_v4();
        let filename = format!("ai_bust_{}_{job_id}.obj", config.quality.as_str());
        let (vertices, faces) = Self::estimate(config.quality);
        GenerationOutcome::Success {
            output: AssetRef {
                file_id: job_id,
                url: format!("/api/ai3d/download/{filename}"),
                key: filename,
            },
            metadata: GenerationMetadata {
                vertices,
                faces,
                format: "OBJ".to_string(),
                processing_ms: 0,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    model_url: Option<String>,
    vertices: Option<u32>,
    faces: Option<u32>,
    error: Option<String>,
}

/// Talks to a remote generation service over HTTP: submit, then poll.
#[derive(Debug, Clone)]
pub struct RemoteProvider {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

impl RemoteProvider {
    pub fn new(base_url: impl Into<String>, poll_interval: Duration) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval,
        })
    }

    async fn submit(&self, input: &AssetRef, config: &GenerationConfig) -> Result<String, String> {
        let response = self
            .client
            .post(format!("{}/generate", self.base_url))
            .json(&serde_json::json!({
                "image_url": input.url,
                "quality": config.quality.as_str(),
                "style": config.style.as_str(),
            }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| format!("generation request failed: {e}"))?;
        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid generation response: {e}"))?;
        Ok(body.job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<StatusResponse, String> {
        self.client
            .get(format!("{}/status/{job_id}", self.base_url))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| format!("status request failed: {e}"))?
            .json()
            .await
            .map_err(|e| format!("invalid status response: {e}"))
    }
}

#[async_trait]
impl GenerationProvider for RemoteProvider {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn dispatch(&self, input: &AssetRef, config: &GenerationConfig) -> GenerationOutcome {
        let job_id = match self.submit(input, config).await {
            Ok(job_id) => job_id,
            Err(reason) => return GenerationOutcome::Failure { reason },
        };
        debug!(%job_id, "remote generation submitted");

        // The orchestrator bounds the total wait.
        loop {
            tokio::time::sleep(self.poll_interval).await;
            let status = match self.poll(&job_id).await {
                Ok(status) => status,
                Err(reason) => {
                    warn!(%job_id, %reason, "status poll failed, retrying");
                    continue;
                }
            };
            match status.status.as_str() {
                "completed" => {
                    let Some(url) = status.model_url else {
                        return GenerationOutcome::Failure {
                            reason: "provider completed without a model url".to_string(),
                        };
                    };
                    let key = url.rsplit('/').next().unwrap_or(&url).to_string();
                    return GenerationOutcome::Success {
                        output: AssetRef {
                            file_id: Uuid::new_v4(),
                            key,
                            url,
                        },
                        metadata: GenerationMetadata {
                            vertices: status.vertices.unwrap_or_default(),
                            faces: status.faces.unwrap_or_default(),
                            format: "OBJ".to_string(),
                            processing_ms: 0,
                        },
                    };
                }
                "failed" => {
                    return GenerationOutcome::Failure {
                        reason: status
                            .error
                            .unwrap_or_else(|| "generation failed".to_string()),
                    };
                }
                _ => continue,
            }
        }
    }
}
