//! Uploads pipeline runs to a LangSmith-compatible run-tracing service.
//!
//! Every answered question becomes one `chain` run with a child run per
//! stage. Uploads happen on a detached task; a slow or failing tracing
//! service never delays or fails the request that produced the run.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::RunTracingConfig;
use crate::error::ServiceError;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// One recorded stage of a pipeline run.
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub inputs: Value,
    pub outputs: Value,
    pub error: Option<String>,
}

/// A finished pipeline run and its stages.
#[derive(Debug, Clone)]
pub struct PipelineTrace {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub inputs: Value,
    pub outputs: Value,
    pub error: Option<String>,
    pub stages: Vec<StageRecord>,
}

pub struct RunTracer {
    client: Client,
    endpoint: String,
    api_key: String,
    project: String,
    enabled: bool,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl RunTracer {
    pub fn new(config: &RunTracingConfig) -> Result<Self, ServiceError> {
        let client = Client::builder().timeout(UPLOAD_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            project: config.project.clone(),
            enabled: config.enabled,
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Queues `trace` for upload and returns immediately.
    pub fn submit(&self, trace: &PipelineTrace) {
        if !self.enabled {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no async runtime, dropping run trace");
            return;
        };

        let payload = self.batch_payload(trace);
        let url = format!("{}/runs/batch", self.endpoint);
        let request = self
            .client
            .post(url)
            .header("x-api-key", self.api_key.clone())
            .json(&payload);

        let upload = runtime.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("uploaded run trace ({})", response.status());
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    warn!("run trace upload rejected with {}: {}", status, body);
                }
                Err(e) => warn!("run trace upload failed: {}", e),
            }
        });

        let mut pending = self.pending.lock();
        pending.retain(|handle| !handle.is_finished());
        pending.push(upload);
    }

    /// Waits for every upload queued so far. Short-lived processes call
    /// this before exiting so their traces are not dropped.
    pub async fn flush(&self) {
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return;
        }
        debug!("waiting for {} run trace upload(s)", pending.len());
        for upload in pending {
            if let Err(e) = upload.await {
                warn!("run trace upload task failed: {}", e);
            }
        }
    }

    /// Body for `POST /runs/batch`: the root run followed by its stages.
    pub fn batch_payload(&self, trace: &PipelineTrace) -> Value {
        let trace_id = Uuid::new_v4();
        let root_order = dotted_segment(trace.start, trace_id);

        let mut runs = Vec::with_capacity(trace.stages.len() + 1);
        runs.push(self.run_json(
            trace_id,
            trace_id,
            None,
            &root_order,
            &trace.name,
            "chain",
            (trace.start, trace.end),
            &trace.inputs,
            &trace.outputs,
            trace.error.as_deref(),
        ));

        for stage in &trace.stages {
            let id = Uuid::new_v4();
            let order = format!("{}.{}", root_order, dotted_segment(stage.start, id));
            runs.push(self.run_json(
                id,
                trace_id,
                Some(trace_id),
                &order,
                &stage.name,
                "chain",
                (stage.start, stage.end),
                &stage.inputs,
                &stage.outputs,
                stage.error.as_deref(),
            ));
        }

        json!({ "post": runs })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_json(
        &self,
        id: Uuid,
        trace_id: Uuid,
        parent: Option<Uuid>,
        dotted_order: &str,
        name: &str,
        run_type: &str,
        (start, end): (DateTime<Utc>, DateTime<Utc>),
        inputs: &Value,
        outputs: &Value,
        error: Option<&str>,
    ) -> Value {
        let mut run = json!({
            "id": id,
            "trace_id": trace_id,
            "dotted_order": dotted_order,
            "name": name,
            "run_type": run_type,
            "start_time": start.to_rfc3339(),
            "end_time": end.to_rfc3339(),
            "inputs": inputs,
            "outputs": outputs,
            "session_name": self.project,
        });
        if let Some(parent) = parent {
            run["parent_run_id"] = json!(parent);
        }
        if let Some(error) = error {
            run["error"] = json!(error);
        }
        run
    }
}

fn dotted_segment(start: DateTime<Utc>, id: Uuid) -> String {
    format!("{}Z{}", start.format("%Y%m%dT%H%M%S%6f"), id)
}
