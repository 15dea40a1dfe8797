use crate::{
    config::env_parse,
    models::{OnboardRequest, OnboardingResult, StepEntry},
    pipeline::Pipeline,
    security::AuthContext,
};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Error)]
#[error("onboarding worker is not available")]
pub struct QueueClosed;

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobState>>>,
}

struct Job {
    id: Uuid,
    request: OnboardRequest,
    context: AuthContext,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed {
        result: Box<OnboardingResult>,
    },
    Failed {
        error: String,
        steps: Vec<StepEntry>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    /// One worker drains the queue; runs execute one at a time.
    pub fn spawn(pipeline: Pipeline) -> (Self, JoinHandle<()>) {
        Self::with_capacity(pipeline, queue_capacity_from_env())
    }

    pub fn with_capacity(pipeline: Pipeline, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.insert(job.id, JobState::Running);
                }
                info!(
                    target = "onboard.api",
                    job_id = %job.id,
                    operator = %job.context.operator,
                    "onboarding job started"
                );

                let state = match pipeline.run(job.request).await {
                    Ok(result) => JobState::Completed {
                        result: Box::new(result),
                    },
                    Err(failure) => JobState::Failed {
                        error: failure.error.to_string(),
                        steps: failure.steps,
                    },
                };
                statuses_bg.lock().await.insert(job.id, state);
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue_onboarding(
        &self,
        request: OnboardRequest,
        context: AuthContext,
    ) -> Result<Uuid, QueueClosed> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.insert(id, JobState::Queued);
        }
        let job = Job {
            id,
            request,
            context,
        };
        if self.tx.send(job).await.is_err() {
            self.statuses.lock().await.remove(&id);
            return Err(QueueClosed);
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }
}

fn queue_capacity_from_env() -> usize {
    env_parse::<usize>("QUEUE_CAPACITY")
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_QUEUE_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineConfig;
    use crate::{
        fursat::PublishConfig, llm::LlmConfig, maps::MapsConfig, sheets::SheetsConfig,
    };
    use tokio::time::{Duration, sleep};

    fn offline_pipeline() -> Pipeline {
        Pipeline::new(PipelineConfig {
            maps: MapsConfig {
                api_key: Some("k".into()),
                base_url: "http://127.0.0.1:9".into(),
            },
            llm: LlmConfig {
                base_url: "http://127.0.0.1:9".into(),
                api_key: None,
                model: "m".into(),
            },
            sheets: SheetsConfig {
                spreadsheet_id: None,
                range: "Listings".into(),
                base_url: "http://127.0.0.1:9".into(),
                token_url: "http://127.0.0.1:9/token".into(),
                credentials: None,
            },
            publish: PublishConfig {
                api_url: Some("http://127.0.0.1:9".into()),
                api_key: None,
                max_photos: 10,
            },
            run_timeout: Duration::from_secs(5),
        })
    }

    fn context() -> AuthContext {
        AuthContext {
            operator: "ops".into(),
            api_key_id: "key-01".into(),
        }
    }

    #[tokio::test]
    async fn failed_run_keeps_its_step_log() {
        let (queue, _worker) = JobQueue::with_capacity(offline_pipeline(), 4);
        let id = queue
            .enqueue_onboarding(OnboardRequest::for_url("https://maps.google.com/nothing"), context())
            .await
            .expect("enqueued");

        let mut info = None;
        for _ in 0..50 {
            if let Some(current) = queue.get(id).await
                && matches!(current.state, JobState::Failed { .. })
            {
                info = Some(current);
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        let info = info.expect("job failed in time");
        let JobState::Failed { error, steps } = info.state else {
            unreachable!()
        };
        assert!(error.contains("coordinates"), "{error}");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].stage, "parse");

        let json = serde_json::to_value(queue.get(id).await.expect("job")).expect("json");
        assert_eq!(json["state"], "failed");
        assert_eq!(json["id"], id.to_string());
    }

    #[tokio::test]
    async fn unknown_job_is_none() {
        let (queue, _worker) = JobQueue::with_capacity(offline_pipeline(), 1);
        assert!(queue.get(Uuid::new_v4()).await.is_none());
    }
}
