//! Request/response command surface
//!
//! Commands are JSON objects tagged by `"command"`:
//!
//! ```json
//! {"command": "removeQueueItem", "id": "…", "requestId": 7}
//! ```
//!
//! Every response is either `{"ok": true, ...data}` or
//! `{"ok": false, "error": {"code", "message", "details"?}}`. A `requestId`
//! on the request is echoed back unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{QueueError, QueueResult};
use crate::queue::{LinkCandidate, QueueLifecycle};
use crate::store::{CollectorSettings, QueueSettings};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "command",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum QueueCommand {
    StartQueue,
    PauseQueue,
    ResumeQueue,
    StopQueue,
    RetryFailedQueue,
    ClearQueue,
    ClearArchivedQueue,
    RemoveQueueItem {
        id: String,
    },
    ReverseQueueItems,
    EnqueueLinks {
        links: Vec<LinkCandidate>,
    },
    GetQueueState,
    GetDiagnostics,
    GetSettings,
    UpdateSettings {
        #[serde(default)]
        queue_settings: Option<QueueSettings>,
        #[serde(default)]
        collector_settings: Option<CollectorSettings>,
    },
}

impl QueueCommand {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartQueue => "startQueue",
            Self::PauseQueue => "pauseQueue",
            Self::ResumeQueue => "resumeQueue",
            Self::StopQueue => "stopQueue",
            Self::RetryFailedQueue => "retryFailedQueue",
            Self::ClearQueue => "clearQueue",
            Self::ClearArchivedQueue => "clearArchivedQueue",
            Self::RemoveQueueItem { .. } => "removeQueueItem",
            Self::ReverseQueueItems => "reverseQueueItems",
            Self::EnqueueLinks { .. } => "enqueueLinks",
            Self::GetQueueState => "getQueueState",
            Self::GetDiagnostics => "getDiagnostics",
            Self::GetSettings => "getSettings",
            Self::UpdateSettings { .. } => "updateSettings",
        }
    }
}

/// A command plus an optional caller-chosen correlation id
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    #[serde(default)]
    pub request_id: Option<Value>,
    #[serde(flatten)]
    pub command: QueueCommand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl CommandResponse {
    #[must_use]
    pub fn success(data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => Map::from_iter([("result".to_string(), other)]),
        };
        Self {
            ok: true,
            request_id: None,
            data,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(error: &QueueError) -> Self {
        Self {
            ok: false,
            request_id: None,
            data: Map::new(),
            error: Some(ErrorBody {
                code: error.code().to_string(),
                message: error.to_string(),
                details: error.details().cloned(),
            }),
        }
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: Option<Value>) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Run one command and wrap the outcome.
pub async fn dispatch(lifecycle: &QueueLifecycle, command: QueueCommand) -> CommandResponse {
    let name = command.name();
    match execute(lifecycle, command).await {
        Ok(data) => CommandResponse::success(data),
        Err(e) => {
            debug!("Command {name} rejected: {e}");
            CommandResponse::failure(&e)
        }
    }
}

/// Parse one JSON request and dispatch it.
pub async fn handle_request(lifecycle: &QueueLifecycle, raw: &str) -> CommandResponse {
    let request: CommandRequest = match serde_json::from_str(raw) {
        Ok(request) => request,
        Err(e) => {
            let request_id = serde_json::from_str::<Value>(raw)
                .ok()
                .and_then(|value| value.get("requestId").cloned());
            return CommandResponse::failure(&QueueError::bad_request(format!(
                "Invalid command: {e}"
            )))
            .with_request_id(request_id);
        }
    };
    dispatch(lifecycle, request.command)
        .await
        .with_request_id(request.request_id)
}

async fn execute(lifecycle: &QueueLifecycle, command: QueueCommand) -> QueueResult<Value> {
    let result = match command {
        QueueCommand::StartQueue => lifecycle.start_queue().await?,
        QueueCommand::PauseQueue => lifecycle.pause_queue().await?,
        QueueCommand::ResumeQueue => lifecycle.resume_queue().await?,
        QueueCommand::StopQueue => lifecycle.stop_queue().await?,
        QueueCommand::RetryFailedQueue => lifecycle.retry_failed_queue().await?,
        QueueCommand::ClearQueue => lifecycle.clear_queue().await?,
        QueueCommand::ClearArchivedQueue => lifecycle.clear_archived_queue().await?,
        QueueCommand::RemoveQueueItem { id } => lifecycle.remove_queue_item(&id).await?,
        QueueCommand::ReverseQueueItems => lifecycle.reverse_queue_items().await?,
        QueueCommand::EnqueueLinks { links } => lifecycle.enqueue_links(&links).await?,
        QueueCommand::GetQueueState => lifecycle.get_queue_state().await?,
        QueueCommand::GetDiagnostics => {
            let resolved = lifecycle
                .engine()
                .orchestrator()
                .resolve_save_provider(None)
                .await;
            return Ok(json!({
                "diagnostics": resolved.diagnostics,
                "unavailableReason": resolved.unavailable_reason,
            }));
        }
        QueueCommand::GetSettings => return settings(lifecycle).await,
        QueueCommand::UpdateSettings {
            queue_settings,
            collector_settings,
        } => {
            let store = lifecycle.engine().store();
            if let Some(collector) = &collector_settings
                && collector.max_links == 0
            {
                return Err(QueueError::bad_request("maxLinks must be greater than zero."));
            }
            if let Some(queue) = &queue_settings {
                store.save_queue_settings(queue).await?;
            }
            if let Some(collector) = &collector_settings {
                store.save_collector_settings(collector).await?;
            }
            return settings(lifecycle).await;
        }
    };
    serde_json::to_value(result)
        .map_err(|e| QueueError::Internal(format!("Failed to encode response: {e}")))
}

async fn settings(lifecycle: &QueueLifecycle) -> QueueResult<Value> {
    let store = lifecycle.engine().store();
    Ok(json!({
        "queueSettings": store.load_queue_settings().await?,
        "collectorSettings": store.load_collector_settings().await?,
    }))
}
