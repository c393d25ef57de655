use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tourcat_core::SchedulerConfig;
use tourcat_storage::SchedulerConfigStore;
use uuid::Uuid;

use crate::orchestrator::IngestionOrchestrator;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression `{cron}`: {message}")]
    InvalidCron { cron: String, message: String },
    #[error("scheduler failure: {0}")]
    Timer(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub enabled: bool,
    pub cron: String,
}

/// Convert a 5-field expression to the seconds-first form the timer expects.
pub fn timer_expression(cron: &str) -> Result<String, SchedulerError> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    let expression = match fields.len() {
        5 => format!("0 {}", fields.join(" ")),
        6 | 7 => fields.join(" "),
        n => {
            return Err(SchedulerError::InvalidCron {
                cron: cron.to_string(),
                message: format!("expected 5 fields, found {n}"),
            })
        }
    };
    Job::new_async(expression.as_str(), |_uuid, _l| Box::pin(async {})).map_err(|e| {
        SchedulerError::InvalidCron {
            cron: cron.to_string(),
            message: e.to_string(),
        }
    })?;
    Ok(expression)
}

struct ControllerState {
    scheduler: Option<JobScheduler>,
    job: Option<Uuid>,
    enabled: bool,
    cron: String,
}

impl ControllerState {
    fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.job.is_some(),
            enabled: self.enabled,
            cron: self.cron.clone(),
        }
    }
}

/// Owns the single recurring refresh job. Control calls are serialized.
pub struct SchedulerController {
    orchestrator: Arc<IngestionOrchestrator>,
    store: Arc<dyn SchedulerConfigStore>,
    state: Mutex<ControllerState>,
}

impl SchedulerController {
    pub fn new(
        orchestrator: Arc<IngestionOrchestrator>,
        store: Arc<dyn SchedulerConfigStore>,
        default_cron: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            store,
            state: Mutex::new(ControllerState {
                scheduler: None,
                job: None,
                enabled: false,
                cron: default_cron.into(),
            }),
        }
    }

    /// Restore persisted settings; the job is only started when `auto_resume` is set.
    pub async fn bootstrap(&self, auto_resume: bool) -> Result<SchedulerStatus, SchedulerError> {
        let run_log = self.orchestrator.run_log();
        let persisted = match self.store.load().await {
            Ok(config) => config,
            Err(err) => {
                run_log.warn(format!(
                    "scheduler config unreadable, starting disabled: {err:#}"
                ));
                None
            }
        };
        let resume = {
            let mut state = self.state.lock().await;
            if let Some(config) = persisted {
                state.enabled = config.enabled;
                state.cron = config.cron;
            }
            state.enabled
        };
        if !resume {
            return Ok(self.status().await);
        }
        if !auto_resume {
            run_log.info("scheduler was enabled; auto-resume is off, leaving it stopped");
            return Ok(self.status().await);
        }
        self.start(None).await
    }

    /// Install (or replace) the recurring job. Uses `cron`, else the last known expression.
    pub async fn start(&self, cron: Option<&str>) -> Result<SchedulerStatus, SchedulerError> {
        let mut state = self.state.lock().await;
        let cron = cron
            .map(|c| c.trim().to_string())
            .unwrap_or_else(|| state.cron.clone());
        let expression = timer_expression(&cron)?;

        self.remove_job(&mut state).await?;
        self.install_job(&mut state, &expression).await?;
        state.enabled = true;
        state.cron = cron;
        self.persist(&state).await;
        self.orchestrator
            .run_log()
            .info(format!("scheduler running with cron `{}`", state.cron));
        Ok(state.status())
    }

    pub async fn stop(&self) -> Result<SchedulerStatus, SchedulerError> {
        let mut state = self.state.lock().await;
        self.remove_job(&mut state).await?;
        state.enabled = false;
        self.persist(&state).await;
        self.orchestrator.run_log().info("scheduler stopped");
        Ok(state.status())
    }

    pub async fn status(&self) -> SchedulerStatus {
        self.state.lock().await.status()
    }

    /// Change the expression; a running job is restarted with it.
    pub async fn set_cron(&self, cron: &str) -> Result<SchedulerStatus, SchedulerError> {
        let cron = cron.trim().to_string();
        let expression = timer_expression(&cron)?;
        let mut state = self.state.lock().await;
        state.cron = cron;
        self.persist(&state).await;
        if state.job.is_some() {
            self.remove_job(&mut state).await?;
            self.install_job(&mut state, &expression).await?;
        }
        self.orchestrator
            .run_log()
            .info(format!("scheduler cron set to `{}`", state.cron));
        Ok(state.status())
    }

    #[cfg(test)]
    async fn timer(&self) -> (Option<JobScheduler>, Option<Uuid>) {
        let state = self.state.lock().await;
        (state.scheduler.clone(), state.job)
    }

    async fn install_job(
        &self,
        state: &mut ControllerState,
        expression: &str,
    ) -> Result<(), SchedulerError> {
        let scheduler = match state.scheduler.clone() {
            Some(scheduler) => scheduler,
            None => {
                let scheduler = JobScheduler::new()
                    .await
                    .map_err(|e| SchedulerError::Timer(e.to_string()))?;
                scheduler
                    .start()
                    .await
                    .map_err(|e| SchedulerError::Timer(e.to_string()))?;
                state.scheduler = Some(scheduler.clone());
                scheduler
            }
        };

        let orchestrator = Arc::clone(&self.orchestrator);
        let job = Job::new_async(expression, move |_uuid, _l| {
            let orchestrator = Arc::clone(&orchestrator);
            Box::pin(async move {
                run_tick(&orchestrator).await;
            })
        })
        .map_err(|e| SchedulerError::Timer(e.to_string()))?;
        let id = scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::Timer(e.to_string()))?;
        state.job = Some(id);
        Ok(())
    }

    async fn remove_job(&self, state: &mut ControllerState) -> Result<(), SchedulerError> {
        let (Some(id), Some(scheduler)) = (state.job, &state.scheduler) else {
            state.job = None;
            return Ok(());
        };
        scheduler
            .remove(&id)
            .await
            .map_err(|e| SchedulerError::Timer(e.to_string()))?;
        state.job = None;
        Ok(())
    }

    async fn persist(&self, state: &ControllerState) {
        let config = SchedulerConfig {
            enabled: state.enabled,
            cron: state.cron.clone(),
        };
        if let Err(err) = self.store.save(&config).await {
            self.orchestrator
                .run_log()
                .error(format!("could not persist scheduler config: {err:#}"));
        }
    }
}

/// One scheduled refresh. Errors are logged and never stop the timer.
pub(crate) async fn run_tick(orchestrator: &IngestionOrchestrator) {
    match orchestrator.run_all().await {
        Ok(summary) => {
            let failed = summary.cities.iter().filter(|c| c.error.is_some()).count();
            orchestrator.run_log().info(format!(
                "scheduled refresh {} covered {} cities ({failed} aborted)",
                summary.run_id,
                summary.cities.len()
            ));
        }
        Err(err) => {
            orchestrator
                .run_log()
                .error(format!("scheduled refresh failed: {err:#}"));
        }
    }
}
