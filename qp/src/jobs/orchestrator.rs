//! JobOrchestrator - launches and tracks extraction -> generation chains

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::JobError;
use super::ledger::{ProgressLedger, ProgressRecord};
use super::registry::JobRegistry;
use super::stage::{StageInvocation, StageOutcome, run_stage};
use crate::config::{Config, OnActiveJob, StageConfig};
use crate::dialog::GenerationConfig;
use crate::domain::{ConversationRef, Job, JobId, JobStatus, PIPELINE, StageKind};

/// Environment variable carrying the generation config as JSON
const QG_CONFIG_ENV: &str = "QG_CONFIG";

/// Everything the orchestrator needs from configuration
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Database handed to the stages as `--db`
    pub db_path: PathBuf,
    pub extraction: StageConfig,
    pub generation: StageConfig,
    pub on_active_job: OnActiveJob,
    pub stage_timeout: Option<Duration>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            db_path: config.storage.db_path(),
            extraction: config.stages.extraction.clone(),
            generation: config.stages.generation.clone(),
            on_active_job: config.jobs.on_active_job,
            stage_timeout: config.jobs.stage_timeout(),
        }
    }

    fn stage(&self, kind: StageKind) -> &StageConfig {
        match kind {
            StageKind::Extraction => &self.extraction,
            StageKind::Generation => &self.generation,
        }
    }

    /// Configured command line plus the job's identifying parameters
    fn invocation(&self, kind: StageKind, request: &JobRequest, progress_path: &std::path::Path) -> StageInvocation {
        let stage = self.stage(kind);

        let mut args = stage.args.clone();
        let mut push = |flag: &str, value: String| {
            args.push(flag.to_string());
            args.push(value);
        };
        push("--db", self.db_path.to_string_lossy().into_owned());
        push("--user-id", request.owner.user_id.to_string());
        push("--course", request.course.clone());
        push("--video-name", request.artifact_name.clone());
        if kind == StageKind::Extraction {
            push("--video-path", request.artifact_path.clone());
        }
        push("--progress", progress_path.to_string_lossy().into_owned());

        let mut env: Vec<(String, String)> = stage.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        env.push((
            QG_CONFIG_ENV.to_string(),
            Value::Object(request.generation.clone()).to_string(),
        ));

        StageInvocation {
            stage: kind,
            program: stage.program.clone(),
            args,
            env,
        }
    }
}

/// Input for one job
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub owner: ConversationRef,

    /// File name of the lecture video (`--video-name`)
    pub artifact_name: String,

    /// Where the video is stored (`--video-path`, extraction only)
    pub artifact_path: String,

    pub course: String,

    /// Exported to both stages as `QG_CONFIG`
    pub generation: GenerationConfig,
}

/// What a progress poll is keyed by
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressQuery {
    /// Raw job id as supplied by the client
    Job(String),
    /// The conversation's latest job
    Conversation(ConversationRef),
}

/// Starts jobs and answers progress polls
#[derive(Clone)]
pub struct JobOrchestrator {
    settings: Arc<OrchestratorSettings>,
    ledger: ProgressLedger,
    registry: JobRegistry,
}

impl JobOrchestrator {
    pub fn new(settings: OrchestratorSettings, ledger: ProgressLedger, registry: JobRegistry) -> Self {
        Self {
            settings: Arc::new(settings),
            ledger,
            registry,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Start a job and return its id once it is registered
    ///
    /// The stages run on a spawned task; this returns before stage 1 exits.
    pub async fn start_job(&self, request: JobRequest) -> Result<JobId, JobError> {
        let owner = request.owner;
        debug!(%owner, artifact = %request.artifact_name, course = %request.course, "start_job: called");

        if let Some(job_id) = self.blocking_job(owner).await {
            return Err(JobError::AlreadyRunning {
                conversation: owner,
                job_id,
            });
        }

        let job_id = JobId::generate();
        self.ledger
            .write(&job_id, &ProgressRecord::starting(StageKind::Extraction))
            .await
            .map_err(|source| JobError::Ledger {
                job_id: job_id.clone(),
                source,
            })?;

        let job = Job::new(job_id.clone(), owner, &request.course, &request.artifact_name);
        let registration = match self.registry.insert(job, self.settings.on_active_job).await {
            Ok(registration) => registration,
            Err(e) => {
                // Lost a race with another start for the same conversation
                self.record(&job_id, &ProgressRecord::error(e.to_string())).await;
                return Err(e);
            }
        };

        if let Err(e) = self.ledger.write_latest(owner, &job_id).await {
            warn!(%owner, %job_id, error = %e, "failed to record latest job");
        }
        info!(%owner, %job_id, superseded = ?registration.superseded, "job started");

        let this = self.clone();
        let id = job_id.clone();
        tokio::spawn(async move { this.run_chain(id, request, registration.cancel).await });

        Ok(job_id)
    }

    /// Latest record for a job or conversation; `unknown` when unresolvable
    pub async fn progress(&self, query: &ProgressQuery) -> ProgressRecord {
        let job_id = match query {
            ProgressQuery::Job(raw) => JobId::parse(raw),
            ProgressQuery::Conversation(owner) => match self.registry.latest(*owner).await {
                Some(id) => Some(id),
                None => self.ledger.read_latest(*owner).await,
            },
        };
        match job_id {
            Some(id) => self.ledger.read(&id).await,
            None => {
                debug!(?query, "progress: nothing to resolve");
                ProgressRecord::unknown()
            }
        }
    }

    /// In-memory record of a job started by this process
    pub async fn job(&self, id: &JobId) -> Option<Job> {
        self.registry.get(id).await
    }

    /// Wait for a job to reach a terminal status
    pub async fn wait(&self, id: &JobId) -> Option<Job> {
        let mut rx = self.registry.subscribe(id).await?;
        let job = rx.wait_for(|job| job.status.is_terminal()).await.ok()?.clone();
        Some(job)
    }

    /// Running job that would make `start_job` refuse a new one for `owner`
    ///
    /// Only the `reject` policy refuses starts.
    pub async fn blocking_job(&self, owner: ConversationRef) -> Option<JobId> {
        if self.settings.on_active_job != OnActiveJob::Reject {
            return None;
        }
        let id = self.registry.latest(owner).await?;
        let job = self.registry.get(&id).await?;
        (!job.status.is_terminal()).then_some(id)
    }

    /// Write a ledger record from inside the chain; failures are logged only
    async fn record(&self, job_id: &JobId, record: &ProgressRecord) {
        if let Err(e) = self.ledger.write(job_id, record).await {
            error!(%job_id, error = %e, "failed to write progress record");
        }
    }

    async fn fail(&self, job_id: &JobId, message: String) {
        warn!(%job_id, %message, "job failed");
        self.record(job_id, &ProgressRecord::error(&message)).await;
        self.registry.finish(job_id, JobStatus::Error, &message).await;
    }

    async fn run_chain(self, job_id: JobId, request: JobRequest, mut cancel: watch::Receiver<bool>) {
        let progress_path = self.ledger.path_for(&job_id);

        for (index, kind) in PIPELINE.into_iter().enumerate() {
            if index > 0 {
                self.record(&job_id, &ProgressRecord::starting(kind)).await;
                self.registry.advance(&job_id, index, "starting").await;
            }

            let invocation = self.settings.invocation(kind, &request, &progress_path);
            match run_stage(&invocation, self.settings.stage_timeout, &mut cancel).await {
                Ok(StageOutcome::Succeeded) => {
                    debug!(%job_id, stage = %kind, "stage succeeded");
                }
                Ok(outcome) => {
                    self.fail(&job_id, outcome.describe(kind)).await;
                    return;
                }
                Err(e) => {
                    self.fail(&job_id, e.to_string()).await;
                    return;
                }
            }
        }

        self.record(&job_id, &ProgressRecord::done()).await;
        self.registry.finish(&job_id, JobStatus::Done, "complete").await;
        info!(%job_id, "job complete");
    }
}
