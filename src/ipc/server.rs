//! Local IPC server for `scene-sync-ctl` commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Accepts line-delimited JSON commands and
//! routes them to the [`Harness`].
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "status"}
//! {"command": "edit", "file": "Screen1", "name": "visible", "type": "bool", "value": "False"}
//! {"command": "values", "module": "Screen1"}
//! {"command": "respawn", "path": "/assets/scene.kzb"}
//! {"command": "apply-common", "rank": 1}
//! {"command": "watch", "action": "folder", "path": "/assets"}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "missing required 'name' field"}
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::harness::Harness;
use crate::session::ViewFilter;
use crate::{AppError, Result};

/// Inbound IPC request from `scene-sync-ctl`.
#[derive(Debug, Default, Deserialize)]
pub struct IpcRequest {
    /// Command verb.
    pub command: String,
    /// Source file (module) of a value.
    #[serde(default)]
    pub file: Option<String>,
    /// Value name.
    #[serde(default)]
    pub name: Option<String>,
    /// Value type.
    #[serde(default, rename = "type")]
    pub value_type: Option<String>,
    /// Value text.
    #[serde(default)]
    pub value: Option<String>,
    /// File path (screenshot target, asset package, precondition script).
    #[serde(default)]
    pub path: Option<String>,
    /// Module filter for `values`.
    #[serde(default)]
    pub module: Option<String>,
    /// Name substring filter for `values`.
    #[serde(default)]
    pub filter: Option<String>,
    /// Sub-action for `watch` (`on`, `off`, `folder`, `status`) and
    /// `history` (`list`, `clear`).
    #[serde(default)]
    pub action: Option<String>,
    /// 1-based position in the history list for `apply-common`.
    #[serde(default)]
    pub rank: Option<usize>,
}

/// Outbound IPC response to `scene-sync-ctl`.
#[derive(Debug, Serialize)]
pub struct IpcResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    harness: Arc<Harness>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = harness.config().ipc_name.clone();

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let harness = Arc::clone(&harness);
                                tokio::spawn(handle_connection(stream, harness));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Handle a single IPC client connection.
async fn handle_connection(stream: interprocess::local_socket::tokio::Stream, harness: Arc<Harness>) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => dispatch_command(&request, &harness).await,
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        info!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

/// Route an IPC command to the harness.
pub async fn dispatch_command(request: &IpcRequest, harness: &Harness) -> IpcResponse {
    let span = info_span!("ipc_command", command = %request.command);
    async {
        match request.command.as_str() {
            "status" => handle_status(harness).await,
            "values" => handle_values(request, harness).await,
            "edit" => handle_edit(request, harness).await,
            "async" => handle_async(request, harness).await,
            "clear" => {
                let removed = harness.clear_session().await;
                IpcResponse::success(serde_json::json!({ "removed": removed }))
            }
            "resend" => match harness.resend().await {
                Some(report) => IpcResponse::success(
                    serde_json::json!({ "sent": report.sent, "failed": report.failed }),
                ),
                None => IpcResponse::error("client not connected"),
            },
            "history" => handle_history(request, harness),
            "apply-common" => handle_apply_common(request, harness).await,
            "watch" => handle_watch(request, harness),
            "screenshot" => handle_screenshot(request, harness).await,
            "precondition" => handle_precondition(request, harness).await,
            "start-client" => {
                let queued = harness.start_client();
                IpcResponse::success(serde_json::json!({ "queued": format!("{queued:?}").to_lowercase() }))
            }
            "respawn" => {
                let Some(ref path) = request.path else {
                    return IpcResponse::error("missing required 'path' field");
                };
                let queued = harness.respawn(PathBuf::from(path));
                IpcResponse::success(serde_json::json!({
                    "path": path,
                    "queued": format!("{queued:?}").to_lowercase(),
                }))
            }
            other => IpcResponse::error(format!("unknown command: {other}")),
        }
    }
    .instrument(span)
    .await
}

async fn handle_status(harness: &Harness) -> IpcResponse {
    let status = harness.status().await;
    match serde_json::to_value(status) {
        Ok(value) => IpcResponse::success(value),
        Err(err) => IpcResponse::error(format!("failed to encode status: {err}")),
    }
}

async fn handle_values(request: &IpcRequest, harness: &Harness) -> IpcResponse {
    let filter = (request.module.is_some() || request.filter.is_some()).then(|| ViewFilter {
        module: request.module.clone(),
        name_contains: request.filter.clone(),
    });
    let rows = harness.values(filter).await;
    match serde_json::to_value(&rows) {
        Ok(value) => IpcResponse::success(serde_json::json!({ "count": rows.len(), "rows": value })),
        Err(err) => IpcResponse::error(format!("failed to encode values: {err}")),
    }
}

/// The four value fields, or the name of the first missing one.
fn value_fields(request: &IpcRequest) -> std::result::Result<(&str, &str, &str, &str), IpcResponse> {
    fn field<'a>(
        value: Option<&'a str>,
        label: &str,
    ) -> std::result::Result<&'a str, IpcResponse> {
        value.ok_or_else(|| IpcResponse::error(format!("missing required '{label}' field")))
    }

    Ok((
        field(request.file.as_deref(), "file")?,
        field(request.name.as_deref(), "name")?,
        field(request.value_type.as_deref(), "type")?,
        field(request.value.as_deref(), "value")?,
    ))
}

async fn handle_edit(request: &IpcRequest, harness: &Harness) -> IpcResponse {
    let (file, name, value_type, value) = match value_fields(request) {
        Ok(fields) => fields,
        Err(response) => return response,
    };
    let outcome = harness.edit(file, name, value_type, value).await;
    info!(file, name, ?outcome, "edit via IPC");
    IpcResponse::success(serde_json::json!({ "outcome": outcome }))
}

async fn handle_async(request: &IpcRequest, harness: &Harness) -> IpcResponse {
    let (file, name, value_type, value) = match value_fields(request) {
        Ok(fields) => fields,
        Err(response) => return response,
    };
    let sent = harness.send_async(file, name, value_type, value).await;
    IpcResponse::success(serde_json::json!({ "sent": sent }))
}

async fn handle_screenshot(request: &IpcRequest, harness: &Harness) -> IpcResponse {
    match harness.screenshot(request.path.as_ref().map(PathBuf::from)).await {
        Ok((path, sent)) => IpcResponse::success(serde_json::json!({
            "path": path.display().to_string(),
            "sent": sent,
        })),
        Err(err) => IpcResponse::error(err.to_string()),
    }
}

async fn handle_precondition(request: &IpcRequest, harness: &Harness) -> IpcResponse {
    let Some(script) = request.path.as_deref().or(request.name.as_deref()) else {
        return match harness.preconditions() {
            Ok(scripts) => {
                let names: Vec<String> =
                    scripts.iter().map(|p| p.display().to_string()).collect();
                IpcResponse::success(serde_json::json!({ "scripts": names }))
            }
            Err(err) => IpcResponse::error(err.to_string()),
        };
    };
    match harness.load_precondition(script).await {
        Ok(report) => IpcResponse::success(serde_json::json!({
            "sent": report.sent,
            "failed": report.failed,
        })),
        Err(err) => IpcResponse::error(err.to_string()),
    }
}

fn handle_history(request: &IpcRequest, harness: &Harness) -> IpcResponse {
    match request.action.as_deref().unwrap_or("list") {
        "list" => {
            let entries = harness.history();
            match serde_json::to_value(&entries) {
                Ok(value) => IpcResponse::success(serde_json::json!({ "entries": value })),
                Err(err) => IpcResponse::error(format!("failed to encode history: {err}")),
            }
        }
        "clear" => {
            let removed = harness.clear_history();
            IpcResponse::success(serde_json::json!({ "removed": removed }))
        }
        other => IpcResponse::error(format!("unknown history action: {other}")),
    }
}

async fn handle_apply_common(request: &IpcRequest, harness: &Harness) -> IpcResponse {
    let (file, name, value) = if let Some(rank) = request.rank {
        let Some(entry) = rank
            .checked_sub(1)
            .and_then(|slot| harness.history().into_iter().nth(slot))
        else {
            return IpcResponse::error(format!("no history entry at rank {rank}"));
        };
        (entry.file, entry.name, entry.value)
    } else {
        match (&request.file, &request.name, &request.value) {
            (Some(file), Some(name), Some(value)) => (file.clone(), name.clone(), value.clone()),
            _ => return IpcResponse::error("either 'rank' or 'file', 'name' and 'value' are required"),
        }
    };

    match harness.apply_common(&file, &name, &value).await {
        Some(outcome) => IpcResponse::success(serde_json::json!({
            "file": file,
            "name": name,
            "value": value,
            "outcome": outcome,
        })),
        None => IpcResponse::error(format!("unknown value {file}.{name}")),
    }
}

fn handle_watch(request: &IpcRequest, harness: &Harness) -> IpcResponse {
    let changed = match request.action.as_deref().unwrap_or("status") {
        "status" => Ok(harness.watch_status()),
        "on" => harness.set_watch_enabled(true),
        "off" => harness.set_watch_enabled(false),
        "folder" => {
            let Some(ref path) = request.path else {
                return IpcResponse::error("missing required 'path' field");
            };
            harness.set_watch_folder(PathBuf::from(path))
        }
        other => return IpcResponse::error(format!("unknown watch action: {other}")),
    };
    match changed.map(serde_json::to_value) {
        Ok(Ok(value)) => IpcResponse::success(value),
        Ok(Err(err)) => IpcResponse::error(format!("failed to encode watch status: {err}")),
        Err(err) => IpcResponse::error(err.to_string()),
    }
}
