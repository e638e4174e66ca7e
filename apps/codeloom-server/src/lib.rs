//! HTTP control surface
//!
//! JSON-over-POST routes invoking the engine: one-off step passes, file
//! discovery, the two configuration documents, and the server-side task
//! runner. Every response uses the `{success, message?, data?, error?}`
//! envelope.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use codeloom_core::executor::{ExecError, StepExecutor};
use codeloom_core::io::{ContentStore, ContentStoreError};
use codeloom_core::llm::CompletionClient;
use codeloom_core::materialize::{materialize, MaterializeOptions, Selection};
use codeloom_core::prompt::PromptSegment;
use codeloom_core::types::{ApiEndpoint, ModelKind, StepResult, Task, WorkflowTemplate};
use codeloom_files::LocalContentStore;
use codeloom_llm::{ChatRelayClient, ProviderSettings, TransportRouter};
use codeloom_runtime::{ScheduleError, Scheduler, TaskRunner};
use codeloom_stores::{ConfigKind, ConfigStore, ConfigStoreError};

#[derive(Clone)]
struct AppState {
    scheduler: Arc<Scheduler>,
    config_store: Arc<ConfigStore>,
    content: Arc<dyn ContentStore>,
    executor: Arc<StepExecutor>,
    react_relay: Option<Arc<ChatRelayClient>>,
}

/// The uniform response envelope.
#[derive(Debug, Serialize)]
struct Envelope {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Envelope {
    fn ok(data: Value) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
        }
    }

    fn ok_message(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data,
            error: None,
        }
    }

    fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            data: None,
            error: Some(error.into()),
        }
    }
}

type ApiResult = Result<Json<Envelope>, (StatusCode, Json<Envelope>)>;

fn fail(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<Envelope>) {
    (status, Json(Envelope::err(error)))
}

/// Build the engine from settings and serve until shutdown.
pub async fn run_server(
    config_dir: PathBuf,
    listen: SocketAddr,
    settings: ProviderSettings,
) -> anyhow::Result<()> {
    let content: Arc<dyn ContentStore> = Arc::new(LocalContentStore::new());
    let client: Arc<dyn CompletionClient> = Arc::new(
        TransportRouter::from_settings(&settings).context("build completion transports failed")?,
    );
    let executor = Arc::new(StepExecutor::new(content.clone(), client.clone()));
    let runner = Arc::new(TaskRunner::new(content.clone(), client.clone()));
    let scheduler = Arc::new(Scheduler::new(runner));
    let config_store = Arc::new(ConfigStore::new(config_dir));

    let react_relay_url = settings
        .generate_react_api_url
        .clone()
        .or_else(|| settings.chat_api_url.clone());
    let react_relay = match react_relay_url {
        Some(url) => Some(Arc::new(
            ChatRelayClient::new(codeloom_llm::ChatRelayConfig::new(url))
                .context("build chat relay client failed")?,
        )),
        None => None,
    };

    let state = AppState {
        scheduler,
        config_store,
        content,
        executor,
        react_relay,
    };

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .context("bind server listener failed")?;
    println!("codeloom-server listening on http://{}", listen);
    axum::serve(listener, app)
        .await
        .context("server terminated with error")
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/process-file", post(process_file))
        .route("/api/process-file-direct", post(process_file_direct))
        .route("/api/generate-react", post(generate_react))
        .route("/api/list-files", post(list_files))
        .route("/api/config/save", post(config_save))
        .route("/api/config/load", get(config_load))
        .route("/api/config/delete", delete(config_delete))
        .route("/api/config/info", get(config_info))
        .route("/api/multi-stream/save", post(multi_stream_save))
        .route("/api/multi-stream/load", get(multi_stream_load))
        .route("/api/multi-stream/materialize", post(multi_stream_materialize))
        .route("/api/multi-stream/process", post(multi_stream_process))
        .route("/api/multi-stream/process-all", post(multi_stream_process_all))
        .route("/api/multi-stream/info", get(multi_stream_info))
        .route("/api/multi-stream/executions", get(multi_stream_executions))
        .route("/api/multi-stream/stop", post(multi_stream_stop))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

// ---- one-off step passes ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ProcessInputKind {
    File,
    Prompt,
}

#[derive(Debug, Deserialize)]
struct ProcessInput {
    #[serde(rename = "type")]
    kind: ProcessInputKind,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessFileRequest {
    inputs: Vec<ProcessInput>,
    output_file_name: String,
    output_folder: String,
}

#[derive(Debug, Deserialize)]
struct DirectModelQuery {
    model: ModelKind,
}

async fn process_file(State(state): State<AppState>, Json(req): Json<ProcessFileRequest>) -> ApiResult {
    run_process(&state, req, ApiEndpoint::ChatRelay).await
}

async fn process_file_direct(
    State(state): State<AppState>,
    Query(query): Query<DirectModelQuery>,
    Json(req): Json<ProcessFileRequest>,
) -> ApiResult {
    run_process(&state, req, ApiEndpoint::DirectStream { model: query.model }).await
}

async fn run_process(
    state: &AppState,
    req: ProcessFileRequest,
    endpoint: ApiEndpoint,
) -> ApiResult {
    if req.inputs.is_empty() {
        return Err(fail(StatusCode::BAD_REQUEST, "inputs must not be empty"));
    }
    if req.output_folder.trim().is_empty() || req.output_file_name.trim().is_empty() {
        return Err(fail(
            StatusCode::BAD_REQUEST,
            "outputFolder and outputFileName are required",
        ));
    }

    let segments: Vec<PromptSegment> = req
        .inputs
        .iter()
        .map(|input| match input.kind {
            ProcessInputKind::File => PromptSegment::File(input.value.clone()),
            ProcessInputKind::Prompt => PromptSegment::Prompt(input.value.clone()),
        })
        .collect();

    let result = state
        .executor
        .run_segments(
            &segments,
            &endpoint,
            &req.output_folder,
            &req.output_file_name,
            &CancellationToken::new(),
        )
        .await
        .map_err(map_exec_error)?;

    Ok(Json(step_result_envelope(result)))
}

fn step_result_envelope(result: StepResult) -> Envelope {
    let data = result
        .data
        .as_ref()
        .and_then(|d| serde_json::to_value(d).ok());
    Envelope::ok_message(result.message, data)
}

// ---- chat relay pass-through ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateReactRequest {
    message: String,
    session_id: Option<String>,
    system_prompt: Option<String>,
}

async fn generate_react(
    State(state): State<AppState>,
    Json(req): Json<GenerateReactRequest>,
) -> ApiResult {
    let relay = state.react_relay.as_ref().ok_or_else(|| {
        fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            "GENERATE_REACT_API_URL is not configured",
        )
    })?;

    let reply = relay
        .send(&req.message, req.session_id, req.system_prompt.as_deref())
        .await
        .map_err(|e| fail(StatusCode::BAD_GATEWAY, e.to_string()))?;

    Ok(Json(Envelope::ok(json!({"reply": reply}))))
}

// ---- file discovery ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFilesRequest {
    folder_path: String,
    file_type: String,
}

async fn list_files(State(state): State<AppState>, Json(req): Json<ListFilesRequest>) -> ApiResult {
    let files = state
        .content
        .list_files(&req.folder_path, &req.file_type)
        .await
        .map_err(map_content_error)?;

    Ok(Json(Envelope::ok(json!({
        "files": files,
        "count": files.len(),
    }))))
}

// ---- configuration documents ----

async fn config_save(State(state): State<AppState>, Json(document): Json<Value>) -> ApiResult {
    save_document(&state, ConfigKind::App, document).await
}

async fn config_load(State(state): State<AppState>) -> ApiResult {
    load_document(&state, ConfigKind::App).await
}

async fn config_delete(State(state): State<AppState>) -> ApiResult {
    delete_document(&state, ConfigKind::App).await
}

async fn config_info(State(state): State<AppState>) -> ApiResult {
    document_info(&state, ConfigKind::App).await
}

async fn multi_stream_save(State(state): State<AppState>, Json(document): Json<Value>) -> ApiResult {
    save_document(&state, ConfigKind::MultiStream, document).await
}

async fn multi_stream_load(State(state): State<AppState>) -> ApiResult {
    load_document(&state, ConfigKind::MultiStream).await
}

async fn save_document(state: &AppState, kind: ConfigKind, document: Value) -> ApiResult {
    state
        .config_store
        .save(kind, document)
        .await
        .map_err(map_store_error)?;
    Ok(Json(Envelope::ok_message("configuration saved", None)))
}

async fn load_document(state: &AppState, kind: ConfigKind) -> ApiResult {
    let document = state
        .config_store
        .load(kind)
        .await
        .map_err(map_store_error)?;
    Ok(Json(Envelope::ok(document)))
}

async fn delete_document(state: &AppState, kind: ConfigKind) -> ApiResult {
    state
        .config_store
        .delete(kind)
        .await
        .map_err(map_store_error)?;
    Ok(Json(Envelope::ok_message("configuration deleted", None)))
}

async fn document_info(state: &AppState, kind: ConfigKind) -> ApiResult {
    let info = state
        .config_store
        .info(kind)
        .await
        .map_err(map_store_error)?;
    Ok(Json(Envelope::ok(json!({
        "configPath": info.path,
        "exists": info.exists,
        "size": info.size,
        "lastModified": info.last_modified,
    }))))
}

async fn multi_stream_info(State(state): State<AppState>) -> ApiResult {
    let info = state
        .config_store
        .info(ConfigKind::MultiStream)
        .await
        .map_err(map_store_error)?;
    let stream_groups_count = match state.config_store.load(ConfigKind::MultiStream).await {
        Ok(document) => document
            .get("workflowGroups")
            .and_then(Value::as_array)
            .map(|groups| groups.len())
            .unwrap_or(0),
        Err(_) => 0,
    };

    Ok(Json(Envelope::ok(json!({
        "configPath": info.path,
        "exists": info.exists,
        "size": info.size,
        "lastModified": info.last_modified,
        "streamGroupsCount": stream_groups_count,
    }))))
}

// ---- bulk task creation ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectionBody {
    source_path: String,
    file: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaterializeRequest {
    template_id: String,
    selections: Vec<SelectionBody>,
    #[serde(default)]
    name_prefix: Option<String>,
    #[serde(default)]
    name_pattern: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Expand one stored template across the selected files and persist the
/// minted tasks.
async fn multi_stream_materialize(
    State(state): State<AppState>,
    Json(req): Json<MaterializeRequest>,
) -> ApiResult {
    if req.selections.is_empty() {
        return Err(fail(StatusCode::BAD_REQUEST, "selections must not be empty"));
    }

    let mut document = state
        .config_store
        .load(ConfigKind::MultiStream)
        .await
        .map_err(map_store_error)?;

    let templates: Vec<WorkflowTemplate> = document
        .get("workflowGroupTemplates")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| {
            fail(
                StatusCode::BAD_REQUEST,
                format!("malformed workflowGroupTemplates: {}", e),
            )
        })?
        .unwrap_or_default();

    let template = templates
        .iter()
        .find(|t| t.id == req.template_id)
        .ok_or_else(|| {
            fail(
                StatusCode::NOT_FOUND,
                format!("template not found: {}", req.template_id),
            )
        })?;

    let selections: Vec<Selection> = req
        .selections
        .iter()
        .map(|s| Selection::new(&s.source_path, &s.file))
        .collect();
    let options = MaterializeOptions {
        name_prefix: req.name_prefix.unwrap_or_default(),
        name_pattern: req.name_pattern,
        description: req.description,
    };

    let tasks = materialize(template, &selections, &options);
    let minted = serde_json::to_value(&tasks)
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let groups = document
        .as_object_mut()
        .ok_or_else(|| fail(StatusCode::BAD_REQUEST, "document is not an object"))?
        .entry("workflowGroups")
        .or_insert_with(|| Value::Array(Vec::new()));
    match (groups, minted) {
        (Value::Array(groups), Value::Array(minted)) => groups.extend(minted),
        _ => {
            return Err(fail(
                StatusCode::BAD_REQUEST,
                "workflowGroups is not an array",
            ))
        }
    }

    state
        .config_store
        .save(ConfigKind::MultiStream, document)
        .await
        .map_err(map_store_error)?;

    Ok(Json(Envelope::ok(json!({
        "created": tasks.len(),
        "taskIds": tasks.iter().map(|t| t.id.clone()).collect::<Vec<_>>(),
    }))))
}

// ---- server-side task runner ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessStreamRequest {
    stream_group_id: String,
}

async fn multi_stream_process(
    State(state): State<AppState>,
    Json(req): Json<ProcessStreamRequest>,
) -> ApiResult {
    let mut document = state
        .config_store
        .load(ConfigKind::MultiStream)
        .await
        .map_err(map_store_error)?;

    let tasks: Vec<Task> = document
        .get("workflowGroups")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| {
            tracing::warn!(error = %e, "stored workflowGroups failed to parse");
            fail(
                StatusCode::BAD_REQUEST,
                format!("malformed workflowGroups: {}", e),
            )
        })?
        .unwrap_or_default();

    let task = tasks
        .into_iter()
        .find(|t| t.id == req.stream_group_id)
        .ok_or_else(|| {
            fail(
                StatusCode::NOT_FOUND,
                format!("stream group not found: {}", req.stream_group_id),
            )
        })?;
    let task_id = task.id.clone();

    let handle = state
        .scheduler
        .execute(task)
        .await
        .map_err(map_schedule_error)?;
    let outcome = handle
        .await
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    // Persist the terminal status and results back into the document.
    if let Some(groups) = document
        .get_mut("workflowGroups")
        .and_then(Value::as_array_mut)
    {
        for group in groups {
            if group.get("id").and_then(Value::as_str) == Some(task_id.as_str()) {
                if let Value::Object(map) = group {
                    map.insert("status".to_string(), json!(outcome.status));
                    map.insert("executionResults".to_string(), json!(outcome.results));
                }
            }
        }
    }
    state
        .config_store
        .save(ConfigKind::MultiStream, document)
        .await
        .map_err(map_store_error)?;

    Ok(Json(Envelope::ok(json!({
        "taskId": task_id,
        "status": outcome.status,
        "cancelled": outcome.cancelled,
        "executionResults": outcome.results,
    }))))
}

/// Batch-execute every idle task in the stored document.
async fn multi_stream_process_all(State(state): State<AppState>) -> ApiResult {
    let mut document = state
        .config_store
        .load(ConfigKind::MultiStream)
        .await
        .map_err(map_store_error)?;

    let tasks: Vec<Task> = document
        .get("workflowGroups")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| {
            fail(
                StatusCode::BAD_REQUEST,
                format!("malformed workflowGroups: {}", e),
            )
        })?
        .unwrap_or_default();

    let results = state.scheduler.batch_execute_all(tasks).await;

    if let Some(groups) = document
        .get_mut("workflowGroups")
        .and_then(Value::as_array_mut)
    {
        for result in &results {
            for group in groups.iter_mut() {
                if group.get("id").and_then(Value::as_str) == Some(result.task_id.as_str()) {
                    if let Value::Object(map) = group {
                        map.insert("status".to_string(), json!(result.outcome.status));
                        map.insert(
                            "executionResults".to_string(),
                            json!(result.outcome.results),
                        );
                    }
                }
            }
        }
    }
    state
        .config_store
        .save(ConfigKind::MultiStream, document)
        .await
        .map_err(map_store_error)?;

    let summary: Vec<Value> = results
        .iter()
        .map(|r| {
            json!({
                "taskId": r.task_id,
                "status": r.outcome.status,
                "executionResults": r.outcome.results,
            })
        })
        .collect();
    Ok(Json(Envelope::ok(json!({
        "executed": summary.len(),
        "results": summary,
    }))))
}

async fn multi_stream_executions(State(state): State<AppState>) -> ApiResult {
    let executions = state.scheduler.executions().await;
    Ok(Json(Envelope::ok(json!({ "executions": executions }))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopRequest {
    /// Stop one task; stop everything when absent.
    task_id: Option<String>,
}

async fn multi_stream_stop(State(state): State<AppState>, Json(req): Json<StopRequest>) -> ApiResult {
    match req.task_id {
        Some(task_id) => {
            state
                .scheduler
                .stop(&task_id)
                .await
                .map_err(map_schedule_error)?;
            Ok(Json(Envelope::ok_message("stop requested", None)))
        }
        None => {
            state.scheduler.stop_all().await;
            Ok(Json(Envelope::ok_message("all tasks stopped", None)))
        }
    }
}

// ---- error mapping ----

fn map_exec_error(err: ExecError) -> (StatusCode, Json<Envelope>) {
    let status = match &err {
        ExecError::ConfigInvalid(_) | ExecError::DependencyMissing(_) => StatusCode::BAD_REQUEST,
        ExecError::InputMissing(_) => StatusCode::NOT_FOUND,
        ExecError::Llm(_) => StatusCode::BAD_GATEWAY,
        ExecError::Io(_) | ExecError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    };
    fail(status, err.to_string())
}

fn map_content_error(err: ContentStoreError) -> (StatusCode, Json<Envelope>) {
    let status = match &err {
        ContentStoreError::InputMissing(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    fail(status, err.to_string())
}

fn map_store_error(err: ConfigStoreError) -> (StatusCode, Json<Envelope>) {
    let status = match &err {
        ConfigStoreError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    fail(status, err.to_string())
}

fn map_schedule_error(err: ScheduleError) -> (StatusCode, Json<Envelope>) {
    let status = match &err {
        ScheduleError::ConcurrencyLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
        ScheduleError::AlreadyRunning(_) => StatusCode::CONFLICT,
        ScheduleError::NotRunning(_) => StatusCode::NOT_FOUND,
        ScheduleError::NotExecutable(_) => StatusCode::BAD_REQUEST,
    };
    fail(status, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_omits_absent_fields() {
        let ok = serde_json::to_value(Envelope::ok(json!({"n": 1}))).unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["data"]["n"], 1);
        assert!(ok.get("error").is_none());
        assert!(ok.get("message").is_none());

        let err = serde_json::to_value(Envelope::err("boom")).unwrap();
        assert_eq!(err["success"], false);
        assert_eq!(err["error"], "boom");
        assert!(err.get("data").is_none());
    }

    #[test]
    fn test_process_request_wire_shape() {
        let req: ProcessFileRequest = serde_json::from_value(json!({
            "inputs": [
                {"type": "prompt", "value": "convert this"},
                {"type": "file", "value": "/in/a.jsp"}
            ],
            "outputFileName": "A.tsx",
            "outputFolder": "/out"
        }))
        .expect("parse");

        assert_eq!(req.inputs.len(), 2);
        assert!(matches!(req.inputs[0].kind, ProcessInputKind::Prompt));
        assert!(matches!(req.inputs[1].kind, ProcessInputKind::File));
        assert_eq!(req.output_folder, "/out");
    }

    #[test]
    fn test_direct_model_query_parses_both_models() {
        let q: DirectModelQuery = serde_json::from_value(json!({"model": "qianwen"})).unwrap();
        assert_eq!(q.model, ModelKind::Qianwen);
        let q: DirectModelQuery = serde_json::from_value(json!({"model": "deepseek"})).unwrap();
        assert_eq!(q.model, ModelKind::Deepseek);
        assert!(serde_json::from_value::<DirectModelQuery>(json!({"model": "gpt"})).is_err());
    }

    #[test]
    fn test_schedule_error_maps_to_status() {
        let (status, _) = map_schedule_error(ScheduleError::ConcurrencyLimit { running: 6, max: 6 });
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        let (status, _) = map_schedule_error(ScheduleError::NotRunning("x".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
