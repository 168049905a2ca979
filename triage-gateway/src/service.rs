use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json},
    routing::{delete, get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use triage_core::{
    AuthApi, AuthError, AuthSession, DiagnosisResult, Doctor, DoctorDirectory, FileStorage,
    FilterCriteria, HttpAuthApi, HttpDoctorDirectory, HttpInferenceClient, ImageUpload,
    InferenceClient, KeyValueStorage, ResultStore, SimulatedAuthApi, SimulatedInferenceClient,
    StaticDoctorDirectory, StorageInfo, TransportError, ValidationError,
    auth::DEFAULT_AUTH_TIMEOUT, filter, regions, validation::MAX_UPLOAD_BYTES,
};

use crate::{
    config::GatewayConfig,
    models::{
        DiagnosisResponse, DoctorSearchResponse, DoctorView, LoginRequest, RegisterRequest,
        SessionResponse,
    },
};

const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(30);

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn unauthorized_error(message: &str) -> ApiError {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message })))
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

fn upstream_error(err: &TransportError) -> ApiError {
    let status = if err.is_unauthorized() {
        StatusCode::UNAUTHORIZED
    } else {
        StatusCode::BAD_GATEWAY
    };
    (
        status,
        Json(json!({
            "error": err.user_message(),
            "details": err.to_string()
        })),
    )
}

#[derive(Clone)]
pub struct AppState {
    pub results: ResultStore,
    pub auth: Arc<AuthSession>,
    pub inference: Arc<dyn InferenceClient>,
    pub directory: Arc<dyn DoctorDirectory>,
    /// Doctor list, fetched on first use and kept for the life of the process.
    pub doctors: Arc<OnceCell<Vec<Doctor>>>,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn KeyValueStorage>,
        auth_api: Arc<dyn AuthApi>,
        inference: Arc<dyn InferenceClient>,
        directory: Arc<dyn DoctorDirectory>,
    ) -> Self {
        Self {
            results: ResultStore::new(storage.clone()),
            auth: Arc::new(AuthSession::new(storage, auth_api)),
            inference,
            directory,
            doctors: Arc::new(OnceCell::new()),
        }
    }
}

pub async fn create_app(config: &GatewayConfig) -> anyhow::Result<Router> {
    let app_state = create_app_state(config)?;

    if let Err(e) = app_state.auth.restore().await {
        warn!("Could not restore previous session: {}", e);
    }

    Ok(build_router(app_state))
}

fn create_app_state(config: &GatewayConfig) -> anyhow::Result<AppState> {
    info!("Using local storage at {}", config.storage_path.display());
    let storage: Arc<dyn KeyValueStorage> = Arc::new(FileStorage::new(&config.storage_path));

    let auth_api: Arc<dyn AuthApi> = if config.simulate_auth {
        info!("Using simulated authentication");
        Arc::new(SimulatedAuthApi::new())
    } else {
        Arc::new(HttpAuthApi::new(config.api_url.clone(), DEFAULT_AUTH_TIMEOUT)?)
    };

    let inference: Arc<dyn InferenceClient> = match &config.inference_url {
        Some(url) => {
            info!("Using inference endpoint {}", url);
            Arc::new(
                HttpInferenceClient::new(url.clone(), config.inference_timeout)?
                    .with_field_name(config.inference_field.clone())
                    .with_token_storage(storage.clone()),
            )
        }
        None => {
            warn!("TRIAGE_INFERENCE_URL not set, using simulated inference");
            Arc::new(SimulatedInferenceClient::new())
        }
    };

    let directory: Arc<dyn DoctorDirectory> = match &config.directory_url {
        Some(url) => Arc::new(HttpDoctorDirectory::new(url.clone(), DIRECTORY_TIMEOUT)?),
        None => {
            warn!("TRIAGE_DIRECTORY_URL not set, doctor directory is empty");
            Arc::new(StaticDoctorDirectory::default())
        }
    };

    Ok(AppState::new(storage, auth_api, inference, directory))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(current_session))
        .route("/diagnosis", post(diagnose))
        .route("/results", get(list_results).delete(clear_results))
        .route("/results/export", get(export_results))
        .route("/results/import", post(import_results))
        .route("/results/info", get(storage_info))
        .route("/results/{id}", delete(remove_result))
        .route("/doctors", get(search_doctors))
        .route("/doctors/regions", get(list_regions))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 1024 * 1024))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Chest X-ray Triage Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Pneumonia screening uploads, local result history and doctor search",
        "endpoints": {
            "POST /auth/login": "Sign in",
            "POST /auth/register": "Create an account",
            "POST /auth/logout": "Sign out",
            "GET /auth/me": "Current session",
            "POST /diagnosis": "Upload a chest X-ray (multipart field 'image' or 'file')",
            "GET /results": "Stored results, newest first",
            "DELETE /results": "Clear stored results",
            "DELETE /results/{id}": "Remove one stored result",
            "GET /results/export": "Export stored results as JSON",
            "POST /results/import": "Import a JSON export",
            "GET /results/info": "Storage usage",
            "GET /doctors?region=&search=": "Search referral doctors",
            "GET /doctors/regions": "Selectable regions",
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

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<SessionResponse> {
    let user = state
        .auth
        .login(&request.email, &request.password)
        .await
        .map_err(|e| auth_error(e, StatusCode::UNAUTHORIZED))?;
    Ok(Json(SessionResponse {
        authenticated: true,
        user: Some(user),
    }))
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<SessionResponse> {
    let user = state
        .auth
        .register(&request.name, &request.email, &request.password)
        .await
        .map_err(|e| auth_error(e, StatusCode::BAD_REQUEST))?;
    Ok(Json(SessionResponse {
        authenticated: true,
        user: Some(user),
    }))
}

fn auth_error(err: AuthError, rejected_status: StatusCode) -> ApiError {
    match err {
        AuthError::Rejected(message) => (rejected_status, Json(json!({ "error": message }))),
        AuthError::NotAuthenticated => unauthorized_error("Please login to continue"),
        AuthError::Transport(e) => upstream_error(&e),
        AuthError::Storage(e) => {
            error!("Failed to persist session: {}", e);
            internal_error("Failed to persist session", &e.to_string())
        }
    }
}

async fn logout(State(state): State<AppState>) -> Json<SessionResponse> {
    state.auth.logout().await;
    Json(SessionResponse {
        authenticated: false,
        user: None,
    })
}

async fn current_session(State(state): State<AppState>) -> Json<SessionResponse> {
    Json(SessionResponse {
        authenticated: state.auth.is_authenticated().await,
        user: state.auth.current_user().await,
    })
}

async fn require_session(state: &AppState) -> Result<(), ApiError> {
    if state.auth.is_authenticated().await {
        Ok(())
    } else {
        Err(auth_error(AuthError::NotAuthenticated, StatusCode::UNAUTHORIZED))
    }
}

async fn diagnose(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<DiagnosisResponse> {
    require_session(&state).await?;

    let upload = read_upload(multipart).await?;
    upload.validate().map_err(|e| {
        info!("Rejected upload {}: {}", upload.filename, e);
        bad_request_error(&e.to_string())
    })?;

    info!(
        "Classifying {} ({} bytes, {})",
        upload.filename,
        upload.size(),
        upload.content_type
    );

    let result = match state.inference.classify(&upload).await {
        Ok(result) => result,
        Err(e) => {
            error!("Inference failed for {}: {}", upload.filename, e);
            state.auth.handle_transport_error(&e).await;
            return Err(upstream_error(&e));
        }
    };

    let stored = state.results.save(result);
    Ok(Json(DiagnosisResponse::from(stored)))
}

async fn read_upload(mut multipart: Multipart) -> Result<ImageUpload, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (e.status(), Json(json!({ "error": e.body_text() }))))?
    {
        if !matches!(field.name(), Some("image") | Some("file")) {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| (e.status(), Json(json!({ "error": e.body_text() }))))?;

        return Ok(ImageUpload::new(filename, content_type, bytes.to_vec()));
    }

    Err(bad_request_error(&ValidationError::MissingFile.to_string()))
}

async fn list_results(State(state): State<AppState>) -> ApiResult<Vec<DiagnosisResult>> {
    require_session(&state).await?;
    Ok(Json(state.results.get_all()))
}

async fn clear_results(State(state): State<AppState>) -> ApiResult<Value> {
    require_session(&state).await?;
    state.results.clear_all();
    Ok(Json(json!({ "cleared": true })))
}

async fn remove_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    require_session(&state).await?;
    state.results.remove(&id);
    Ok(Json(json!({ "removed": id })))
}

async fn export_results(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    require_session(&state).await?;
    let body = state.results.export_as_json();
    if body.is_empty() {
        return Err(internal_error("Failed to export results", "serialization failed"));
    }
    Ok((
        [
            (header::CONTENT_TYPE, "application/json"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"diagnosis-results.json\"",
            ),
        ],
        body,
    ))
}

async fn import_results(State(state): State<AppState>, body: String) -> ApiResult<Value> {
    require_session(&state).await?;
    if !state.results.import_from_json(&body) {
        return Err(bad_request_error("Invalid import format"));
    }
    Ok(Json(json!({
        "imported": true,
        "totalResults": state.results.get_all().len()
    })))
}

async fn storage_info(State(state): State<AppState>) -> ApiResult<StorageInfo> {
    require_session(&state).await?;
    Ok(Json(state.results.storage_info()))
}

async fn search_doctors(
    State(state): State<AppState>,
    Query(criteria): Query<FilterCriteria>,
) -> ApiResult<DoctorSearchResponse> {
    let doctors = state
        .doctors
        .get_or_try_init(|| async { state.directory.fetch_all().await })
        .await
        .map_err(|e| {
            error!("Failed to fetch doctor directory: {}", e);
            upstream_error(&e)
        })?;

    let matched = filter(doctors, &criteria);
    Ok(Json(DoctorSearchResponse {
        total: doctors.len(),
        matched: matched.len(),
        doctors: matched.into_iter().map(DoctorView::from).collect(),
    }))
}

async fn list_regions() -> Json<Value> {
    Json(json!(regions()))
}
