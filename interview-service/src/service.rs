use axum::{
    Router,
    extract::{Multipart, Path, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::Json,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use sim_flow::{InMemorySessionStorage, Pipeline, Session, SessionStorage};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::catalog;
use crate::config::AppConfig;
use crate::evaluation::{CoachEvaluation, SoapEvaluationResult, SoapNote};
use crate::llm::{authoring_agent, clean_json_reply};
use crate::models::{
    Case, CaseImportResponse, ChatRequest, FinishSessionRequest, KnowledgeItem, KnowledgeSummary,
    Message, SessionSummary, SpeakerRole, StartSessionRequest, StartSessionResponse, TurnReply,
};
use crate::prompts::{TURN_ERROR_REPLY, coach_system_prompt, format_transcript};
use crate::store::{
    CaseRepository, CaseStore, FileCaseStore, FileKnowledgeStore, KnowledgeStore,
    PostgresCaseStore, PostgresKnowledgeStore,
};
use crate::tasks::{assign_unique_id, generate_case, send_turn, session_keys};
use crate::workflow::{evaluation_pipeline, import_pipeline, run_case_import, run_soap_evaluation};

type ApiResult<T> = Result<Json<T>, ApiError>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "id": id
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub cases: Arc<CaseRepository>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub sessions: Arc<dyn SessionStorage>,
    pub eval_pipeline: Arc<Pipeline>,
    pub import_pipeline: Arc<Pipeline>,
}

pub async fn create_app(config: AppConfig) -> Router {
    let state = create_app_state(config).await;
    build_router(state)
}

async fn create_app_state(config: AppConfig) -> AppState {
    let (case_store, knowledge) = create_stores(&config).await;

    AppState {
        eval_pipeline: Arc::new(evaluation_pipeline(&config.llm)),
        import_pipeline: Arc::new(import_pipeline(&config.llm)),
        cases: Arc::new(CaseRepository::new(case_store)),
        knowledge,
        sessions: Arc::new(InMemorySessionStorage::new()),
        config: Arc::new(config),
    }
}

/// Postgres when DATABASE_URL is set and reachable, the file trees otherwise.
async fn create_stores(
    config: &AppConfig,
) -> (Option<Arc<dyn CaseStore>>, Arc<dyn KnowledgeStore>) {
    if let Some(url) = &config.database_url {
        match PostgresCaseStore::connect(url).await {
            Ok(cases) => match PostgresKnowledgeStore::connect(url).await {
                Ok(knowledge) => {
                    info!("Using PostgreSQL case and knowledge storage");
                    return (Some(Arc::new(cases)), Arc::new(knowledge));
                }
                Err(e) => error!(
                    "Failed to connect knowledge store to PostgreSQL: {e}. Falling back to file storage."
                ),
            },
            Err(e) => error!(
                "Failed to connect to PostgreSQL: {e}. Falling back to file storage."
            ),
        }
    } else {
        info!("Using file storage (set DATABASE_URL to use PostgreSQL)");
    }

    (
        Some(Arc::new(FileCaseStore::new(&config.cases_dir))),
        Arc::new(FileKnowledgeStore::new(&config.knowledge_dir)),
    )
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/session/start", post(start_session))
        .route("/session/finish", post(finish_session))
        .route("/session/{id}", get(get_session))
        .route("/chat", post(chat_turn))
        .route("/evaluate/soap", post(evaluate_soap))
        .route("/admin/case", post(save_case))
        .route("/admin/import/case", post(import_case))
        .route("/admin/import/knowledge", post(import_knowledge))
        .route("/admin/knowledge", get(list_knowledge))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Attach a correlation id to every request and wrap it in a tracing span.
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();

    request.headers_mut().insert(
        "x-correlation-id",
        HeaderValue::from_str(&correlation_id).unwrap(),
    );

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Clinical Interview Trainer",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "LLM-driven medical interview role-play with rubric-based evaluation",
        "endpoints": {
            "POST /session/start": "Resolve or generate a case and open a session",
            "GET /session/{id}": "Fetch a session summary",
            "POST /chat": "Run one interview turn",
            "POST /session/finish": "mini-CEX evaluation of the session",
            "POST /evaluate/soap": "Two-pass SOAP note evaluation",
            "POST /admin/import/case": "Extract a case draft from an uploaded PDF",
            "POST /admin/import/knowledge": "Store an uploaded PDF as reference knowledge",
            "POST /admin/case": "Persist a reviewed case",
            "GET /admin/knowledge": "List stored knowledge",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> ApiResult<StartSessionResponse> {
    if request.archetype_id.trim().is_empty()
        || request.region_id.trim().is_empty()
        || request.category_id.trim().is_empty()
    {
        return Err(bad_request_error(
            "archetypeId, regionId and categoryId are required",
        ));
    }

    let archetype = catalog::archetype(&request.archetype_id)
        .ok_or_else(|| bad_request_error("Invalid selection parameters"))?;
    let region = catalog::resolve_region(archetype, &request.region_id)
        .ok_or_else(|| bad_request_error("Invalid selection parameters"))?;

    let existing = state
        .cases
        .find_by_classification(&request.archetype_id, &request.region_id, &request.category_id)
        .await
        .map_err(|e| internal_error("Failed to look up cases", &e.to_string()))?;

    let case = match existing.into_iter().next() {
        Some(case) => case,
        None => {
            info!(
                archetype_id = %request.archetype_id,
                region_id = %request.region_id,
                category_id = %request.category_id,
                "No existing case found, generating dynamically"
            );
            let mut generated =
                generate_case(&state.config.llm, archetype, region, &request.category_id)
                    .await
                    .map_err(|e| {
                        error!("Failed to generate dynamic case: {e:#}");
                        internal_error("Failed to generate case scenario", &e.to_string())
                    })?;
            assign_unique_id(&state.cases, &mut generated)
                .await
                .map_err(|e| internal_error("Failed to check case id", &e.to_string()))?;
            state
                .cases
                .upsert(&generated)
                .await
                .map_err(|e| internal_error("Failed to persist generated case", &e.to_string()))?;
            generated
        }
    };

    let session_id = Uuid::new_v4().to_string();
    let mut session = Session::new_from_stage(session_id.clone(), "interview");
    session.pipeline_id = "interview".to_string();
    session.status_message = Some("Interview in progress".to_string());
    session.context.set(session_keys::CASE_ID, &case.id).await;
    session
        .context
        .set(session_keys::CASE_TITLE, &case.title)
        .await;
    state
        .sessions
        .save(session)
        .await
        .map_err(|e| internal_error("Failed to create session", &e.to_string()))?;

    info!(session_id = %session_id, case_id = %case.id, "Session started");

    Ok(Json(StartSessionResponse {
        session_id,
        case_id: case.id.clone(),
        case_title: case.title.clone(),
        patient_label: catalog::archetype_label(&case.archetype_id),
        interview_frames: archetype.interview_frames.clone(),
        patient_profile: case.patient_profile.clone(),
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionSummary> {
    match state.sessions.get(&session_id).await {
        Ok(Some(session)) => {
            let case_id: String = session
                .context
                .get(session_keys::CASE_ID)
                .await
                .unwrap_or_default();
            let case_title: String = session
                .context
                .get(session_keys::CASE_TITLE)
                .await
                .unwrap_or_default();

            let mut context = HashMap::new();
            context.insert("caseId".to_string(), json!(case_id));
            context.insert("caseTitle".to_string(), json!(case_title));

            Ok(Json(SessionSummary {
                session_id: session.id.clone(),
                case_id,
                case_title,
                status_message: session.status_message.clone(),
                context,
            }))
        }
        Ok(None) => Err(not_found_error("Session not found", &session_id)),
        Err(e) => {
            error!("Failed to load session {session_id}: {e}");
            Err(internal_error("Failed to load session", &e.to_string()))
        }
    }
}

async fn chat_turn(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<TurnReply> {
    if request.case_id.trim().is_empty() || request.messages.is_empty() {
        return Err(bad_request_error("caseId and messages are required"));
    }

    let case = load_case(&state, &request.case_id).await?;
    let archetype = catalog::archetype(&case.archetype_id).ok_or_else(|| {
        internal_error(
            "Case references an unknown archetype",
            &case.archetype_id,
        )
    })?;

    let knowledge = state
        .knowledge
        .find(&case.archetype_id, &case.region_id, &case.category_id)
        .await
        .map_err(|e| internal_error("Failed to retrieve knowledge", &e.to_string()))?;

    match send_turn(
        &state.config.llm,
        &case,
        archetype,
        &knowledge,
        &request.messages,
    )
    .await
    {
        Ok(reply) => Ok(Json(reply)),
        // Per-turn failure: surface one instructor-voiced error message in
        // the conversation instead of failing the request. No retries.
        Err(e) => {
            warn!(case_id = %case.id, error = %e, "Turn failed, surfacing error reply");
            Ok(Json(TurnReply {
                role: SpeakerRole::Instructor,
                content: TURN_ERROR_REPLY.to_string(),
            }))
        }
    }
}

async fn finish_session(
    State(state): State<AppState>,
    Json(request): Json<FinishSessionRequest>,
) -> ApiResult<CoachEvaluation> {
    if request.case_id.trim().is_empty() || request.messages.is_empty() {
        return Err(bad_request_error("caseId and messages are required"));
    }

    let case = load_case(&state, &request.case_id).await?;
    let transcript = format_transcript(&request.messages);
    let prompt = coach_system_prompt(&case, &transcript, &request.user_summary);

    let evaluation = match coach_evaluation(&state, &prompt).await {
        Ok(evaluation) => evaluation.normalized(),
        Err(e) => {
            warn!(case_id = %case.id, error = %e, "Coaching call failed, returning fallback");
            CoachEvaluation::fallback()
        }
    };

    Ok(Json(evaluation))
}

async fn coach_evaluation(state: &AppState, prompt: &str) -> anyhow::Result<CoachEvaluation> {
    use rig::completion::Prompt as _;

    let agent = authoring_agent(&state.config.llm, prompt);
    let raw = agent
        .prompt("Evaluate the session now. Return ONLY the JSON object.")
        .await?;
    Ok(serde_json::from_str(clean_json_reply(&raw))?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateSoapRequest {
    case_id: String,
    soap: SoapNote,
    messages: Vec<Message>,
}

async fn evaluate_soap(
    State(state): State<AppState>,
    Json(request): Json<EvaluateSoapRequest>,
) -> ApiResult<SoapEvaluationResult> {
    if request.case_id.trim().is_empty() || request.soap.is_empty() {
        return Err(bad_request_error("caseId and soap are required"));
    }

    // The evaluation itself only reads the note and the transcript, but an
    // unknown case id still gets the distinct not-found treatment.
    load_case(&state, &request.case_id).await?;

    info!(case_id = %request.case_id, "Starting two-pass SOAP evaluation");
    run_soap_evaluation(&state.eval_pipeline, &request.soap, &request.messages)
        .await
        .map(Json)
        .map_err(|e| {
            error!(case_id = %request.case_id, "SOAP evaluation failed: {e:#}");
            internal_error("Failed to evaluate SOAP", &e.to_string())
        })
}

async fn save_case(
    State(state): State<AppState>,
    Json(case): Json<Case>,
) -> ApiResult<Value> {
    if case.id.trim().is_empty()
        || case.title.trim().is_empty()
        || case.initial_complaint.trim().is_empty()
    {
        return Err(bad_request_error("Invalid case data"));
    }

    state
        .cases
        .upsert(&case)
        .await
        .map_err(|e| internal_error("Failed to save case", &e.to_string()))?;

    Ok(Json(json!({ "success": true, "id": case.id })))
}

async fn import_case(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<CaseImportResponse> {
    let upload = read_upload(multipart).await?;
    let pdf_path = stash_upload(&upload.bytes)
        .await
        .map_err(|e| internal_error("Failed to store upload", &e.to_string()))?;

    info!(file = %upload.file_name, "Importing case document");
    let result = run_case_import(&state.import_pipeline, &pdf_path).await;
    discard_upload(&pdf_path).await;

    let (text_preview, extracted) = result.map_err(|e| {
        error!("Case import failed: {e:#}");
        internal_error("Failed to extract case from document", &e.to_string())
    })?;

    Ok(Json(CaseImportResponse {
        text_preview,
        extracted,
    }))
}

async fn import_knowledge(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<KnowledgeSummary> {
    let upload = read_upload(multipart).await?;
    let (archetype_id, region_id, category_id) = match (
        upload.fields.get("archetypeId"),
        upload.fields.get("regionId"),
        upload.fields.get("categoryId"),
    ) {
        (Some(a), Some(r), Some(c))
            if !a.trim().is_empty() && !r.trim().is_empty() && !c.trim().is_empty() =>
        {
            (a.clone(), r.clone(), c.clone())
        }
        _ => {
            return Err(bad_request_error(
                "Missing metadata (Archetype/Region/Category)",
            ));
        }
    };

    let pdf_path = stash_upload(&upload.bytes)
        .await
        .map_err(|e| internal_error("Failed to store upload", &e.to_string()))?;

    info!(file = %upload.file_name, "Importing knowledge document");
    let text = crate::tasks::extract_pdf_text(&state.config.llm, &pdf_path.display().to_string())
        .await;
    discard_upload(&pdf_path).await;

    let text = text.map_err(|e| {
        error!("Knowledge import failed: {e:#}");
        internal_error("Failed to extract document text", &e.to_string())
    })?;

    let title = std::path::Path::new(&upload.file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&upload.file_name)
        .to_string();

    let item = KnowledgeItem {
        id: Uuid::new_v4().to_string(),
        title,
        file_name: upload.file_name,
        content: text,
        archetype_id,
        region_id,
        category_id,
        uploaded_at: chrono::Utc::now(),
    };

    state
        .knowledge
        .save(&item)
        .await
        .map_err(|e| internal_error("Failed to save knowledge", &e.to_string()))?;

    Ok(Json((&item).into()))
}

async fn list_knowledge(State(state): State<AppState>) -> ApiResult<Vec<KnowledgeSummary>> {
    state
        .knowledge
        .list()
        .await
        .map(Json)
        .map_err(|e| internal_error("Failed to list knowledge", &e.to_string()))
}

async fn load_case(state: &AppState, case_id: &str) -> Result<Case, ApiError> {
    match state.cases.get(case_id).await {
        Ok(Some(case)) => Ok(case),
        Ok(None) => Err(not_found_error("Case not found", case_id)),
        Err(e) => {
            error!("Failed to load case {case_id}: {e}");
            Err(internal_error("Failed to load case", &e.to_string()))
        }
    }
}

struct Upload {
    file_name: String,
    bytes: Vec<u8>,
    fields: HashMap<String, String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut fields = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request_error(&format!("Invalid multipart payload: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or("upload.pdf").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| bad_request_error(&format!("Failed to read upload: {e}")))?;
            file = Some((file_name, bytes.to_vec()));
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| bad_request_error(&format!("Failed to read field {name}: {e}")))?;
            fields.insert(name, value);
        }
    }

    let (file_name, bytes) = file.ok_or_else(|| bad_request_error("No file uploaded"))?;
    Ok(Upload {
        file_name,
        bytes,
        fields,
    })
}

async fn stash_upload(bytes: &[u8]) -> std::io::Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("import-{}.pdf", Uuid::new_v4()));
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

async fn discard_upload(path: &PathBuf) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), "Failed to remove upload: {e}");
    }
}
