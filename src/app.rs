use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{
        ConnectInfo, DefaultBodyLimit, Multipart, Query, Request, State, rejection::JsonRejection,
    },
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use handlebars::Handlebars;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::services::ServeDir;
use uuid::Uuid;

use crate::composer::{Composer, MessageTemplate};
use crate::config::AppConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ComposeError, ConfigError, FileError, QueryError};
use crate::export::{self, XLSX_CONTENT_TYPE};
use crate::grouping::GroupingPolicy;
use crate::loader::{Ingestor, UploadedFile, discard_upload, store_upload};
use crate::mailer::MailTransport;
use crate::query::{self, Direction};
use crate::roster::{RosterSet, VENDOR_REQUIRED_COLUMNS};
use crate::store::{Domain, RosterStore, StoredRoster};

pub const SESSION_COOKIE: &str = "session";

/// Multipart framing on top of the file itself
const UPLOAD_OVERHEAD: usize = 1024 * 1024;

/// Shared state handed to every handler
pub struct AppState<T> {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn RosterStore>,
    pub composer: Arc<Composer>,
    pages: Arc<Handlebars<'static>>,
    /// `None` when SMTP credentials are not configured
    pub transport: Option<Arc<T>>,
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            composer: Arc::clone(&self.composer),
            pages: Arc::clone(&self.pages),
            transport: self.transport.clone(),
        }
    }
}

impl<T: MailTransport> AppState<T> {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn RosterStore>,
        transport: Option<Arc<T>>,
    ) -> Result<Self, ComposeError> {
        let mut pages = Handlebars::new();
        pages
            .register_template_string("roster", include_str!("./static/roster.hbs"))
            .map_err(|e| ComposeError::Template(e.to_string()))?;
        pages
            .register_template_string("template", include_str!("./static/template.hbs"))
            .map_err(|e| ComposeError::Template(e.to_string()))?;

        Ok(Self {
            composer: Arc::new(Composer::new(&config)?),
            config: Arc::new(config),
            store,
            pages: Arc::new(pages),
            transport,
        })
    }

    fn render(&self, name: &str, data: &serde_json::Value) -> Result<Html<String>, AppError> {
        self.pages
            .render(name, data)
            .map(Html)
            .map_err(|e| AppError::Compose(ComposeError::Template(e.to_string())))
    }
}

/// Errors surfaced to HTTP clients as `{"error": message}`
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid JSON format")]
    InvalidJson,

    #[error("No data found. Please upload a valid file first.")]
    NoData,

    #[error("Access denied")]
    Forbidden,

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Compose(#[from] ComposeError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidJson | AppError::NoData | AppError::Query(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Config(_) | AppError::Compose(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Id from the `session` cookie, placed in request extensions by [`session_layer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(pub String);

#[derive(Deserialize, Default)]
struct Flash {
    error: Option<String>,
    success: Option<String>,
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    search: String,
}

#[derive(Deserialize)]
struct SortParams {
    column: String,
    #[serde(default)]
    direction: Direction,
}

#[derive(Deserialize)]
struct SendRequest {
    #[serde(default)]
    top_template: String,
    #[serde(default)]
    bottom_template: String,
    #[serde(default)]
    selected_details: Vec<String>,
}

#[derive(Serialize)]
struct SendResponse {
    status: &'static str,
    success_count: usize,
    total_count: usize,
    failed_count: usize,
    failed_recipients: Vec<String>,
    skipped_count: usize,
}

/// Build the application router
pub fn router<T: MailTransport>(state: AppState<T>) -> Router {
    let body_limit = state.config.limits.max_file_size + UPLOAD_OVERHEAD;
    let static_files = ServeDir::new(&state.config.static_dir);
    let config = Arc::clone(&state.config);

    Router::new()
        .route("/", get(serve_landing))
        .route("/session/clear", post(end_session::<T>))
        .nest("/employee", domain_routes::<T>(Domain::Employee))
        .nest("/vendor", domain_routes::<T>(Domain::Vendor))
        .nest_service("/static", static_files)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(session_layer))
        .layer(middleware::from_fn_with_state(config, allowlist))
        .with_state(state)
}

fn domain_routes<T: MailTransport>(domain: Domain) -> Router<AppState<T>> {
    Router::new()
        .route("/", get(serve_roster::<T>).post(upload_roster::<T>))
        .route("/search", get(search_rows::<T>))
        .route("/sort", get(sort_rows::<T>))
        .route("/columns", get(list_columns::<T>))
        .route("/template", get(serve_template::<T>))
        .route("/send", post(send_notifications::<T>))
        .route("/export", get(export_roster::<T>))
        .layer(Extension(domain))
}

/// Reject peers outside `ALLOWED_HOSTS`. An empty list lets everyone in.
async fn allowlist(State(config): State<Arc<AppConfig>>, request: Request, next: Next) -> Response {
    if config.allowed_hosts.is_empty() {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    match peer {
        Some(ip) if config.allowed_hosts.contains(&ip) => next.run(request).await,
        _ => {
            warn!("Rejected request from {:?} to {}", peer, request.uri());
            AppError::Forbidden.into_response()
        }
    }
}

/// Issue a session cookie on first contact and expose the id to handlers
async fn session_layer(jar: CookieJar, mut request: Request, next: Next) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        request
            .extensions_mut()
            .insert(SessionId(cookie.value().to_string()));
        return next.run(request).await;
    }

    let id = Uuid::new_v4().to_string();
    request.extensions_mut().insert(SessionId(id.clone()));
    let response = next.run(request).await;

    let mut cookie = Cookie::new(SESSION_COOKIE, id);
    cookie.set_path("/");
    cookie.set_http_only(true);
    (jar.add(cookie), response).into_response()
}

/// Forget this session's rosters and delete their saved files
async fn end_session<T: MailTransport>(
    State(state): State<AppState<T>>,
    Extension(SessionId(session)): Extension<SessionId>,
) -> Redirect {
    state.store.clear(&session);
    info!("Session cleared");
    Redirect::to("/")
}

async fn serve_landing() -> Html<&'static str> {
    Html(include_str!("./static/index.html"))
}

async fn serve_roster<T: MailTransport>(
    State(state): State<AppState<T>>,
    Extension(domain): Extension<Domain>,
    Extension(SessionId(session)): Extension<SessionId>,
    Query(flash): Query<Flash>,
) -> Result<Html<String>, AppError> {
    let stored = state.store.get(&session, domain);
    let (columns, rows) = match &stored {
        Some(stored) => (
            stored.roster.columns().to_vec(),
            stored
                .roster
                .rows()
                .iter()
                .map(|row| row.values().map(ToString::to_string).collect::<Vec<_>>())
                .collect::<Vec<_>>(),
        ),
        None => (Vec::new(), Vec::new()),
    };

    state.render(
        "roster",
        &json!({
            "title": domain.title(),
            "domain": domain.as_str(),
            "upload_field": domain.upload_field(),
            "columns": columns,
            "rows": rows,
            "row_count": rows.len(),
            "error": flash.error,
            "success": flash.success,
        }),
    )
}

async fn upload_roster<T: MailTransport>(
    State(state): State<AppState<T>>,
    Extension(domain): Extension<Domain>,
    Extension(SessionId(session)): Extension<SessionId>,
    multipart: Multipart,
) -> Redirect {
    let outcome = match read_upload(multipart, domain.upload_field()).await {
        Ok(file) => {
            let config = Arc::clone(&state.config);
            tokio::task::spawn_blocking(move || process_upload(&config, domain, file.as_ref()))
                .await
                .unwrap_or_else(|e| Err(FileError::Unreadable(e.to_string())))
        }
        Err(e) => Err(e),
    };

    let flash = match outcome {
        Ok(stored) => {
            let rows = stored.roster.len();
            state.store.set(&session, domain, stored);
            format!(
                "success={}",
                urlencoding::encode(&format!("File processed successfully! {} rows loaded.", rows))
            )
        }
        Err(e) => {
            warn!("Rejected {} upload: {}", domain, e);
            format!("error={}", urlencoding::encode(&e.to_string()))
        }
    };

    Redirect::to(&format!("/{}?{}", domain, flash))
}

/// Pull the named file field out of a multipart body
async fn read_upload(
    mut multipart: Multipart,
    field_name: &str,
) -> Result<Option<UploadedFile>, FileError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| FileError::Unreadable(e.to_string()))?
    {
        if field.name() != Some(field_name) {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| FileError::Unreadable(e.to_string()))?;
        if name.is_empty() && bytes.is_empty() {
            return Ok(None);
        }
        return Ok(Some(UploadedFile::new(name, bytes.to_vec())));
    }
    Ok(None)
}

/// Validate, save and parse an upload. The saved file is removed again when parsing fails.
fn process_upload(
    config: &AppConfig,
    domain: Domain,
    file: Option<&UploadedFile>,
) -> Result<StoredRoster, FileError> {
    let mut ingestor = Ingestor::new(config.limits.clone());
    if domain == Domain::Vendor {
        ingestor = ingestor.with_required_columns(VENDOR_REQUIRED_COLUMNS);
    }

    let file = ingestor.validate(file)?;
    let file_path = store_upload(&config.upload_dir, domain.as_str(), file)
        .map_err(|e| FileError::Unreadable(format!("could not save upload: {}", e)))?;

    match ingestor.parse(file) {
        Ok(roster) => Ok(StoredRoster { roster, file_path }),
        Err(e) => {
            discard_upload(&file_path);
            Err(e)
        }
    }
}

fn stored_roster<T>(state: &AppState<T>, session: &str, domain: Domain) -> Option<Arc<StoredRoster>> {
    state.store.get(session, domain)
}

async fn search_rows<T: MailTransport>(
    State(state): State<AppState<T>>,
    Extension(domain): Extension<Domain>,
    Extension(SessionId(session)): Extension<SessionId>,
    Query(params): Query<SearchParams>,
) -> Json<serde_json::Value> {
    let stored = stored_roster(&state, &session, domain);
    let empty = RosterSet::default();
    let roster = stored.as_ref().map_or(&empty, |s| &s.roster);
    Json(json!({ "data": query::search(roster, &params.search) }))
}

async fn sort_rows<T: MailTransport>(
    State(state): State<AppState<T>>,
    Extension(domain): Extension<Domain>,
    Extension(SessionId(session)): Extension<SessionId>,
    Query(params): Query<SortParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Some(stored) = stored_roster(&state, &session, domain) else {
        return Ok(Json(json!({ "data": [] })));
    };
    let rows = query::sort_by(&stored.roster, &params.column, params.direction)?;
    Ok(Json(json!({ "data": rows })))
}

async fn list_columns<T: MailTransport>(
    State(state): State<AppState<T>>,
    Extension(domain): Extension<Domain>,
    Extension(SessionId(session)): Extension<SessionId>,
) -> Json<serde_json::Value> {
    let columns = stored_roster(&state, &session, domain)
        .map(|stored| query::columns(&stored.roster))
        .unwrap_or_default();
    Json(json!({ "columns": columns }))
}

async fn serve_template<T: MailTransport>(
    State(state): State<AppState<T>>,
    Extension(domain): Extension<Domain>,
    Extension(SessionId(session)): Extension<SessionId>,
) -> Result<Html<String>, AppError> {
    let columns = stored_roster(&state, &session, domain)
        .map(|stored| query::columns(&stored.roster))
        .unwrap_or_default();
    state.render(
        "template",
        &json!({
            "title": domain.title(),
            "domain": domain.as_str(),
            "columns": columns,
        }),
    )
}

async fn send_notifications<T: MailTransport>(
    State(state): State<AppState<T>>,
    Extension(domain): Extension<Domain>,
    Extension(SessionId(session)): Extension<SessionId>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, AppError> {
    let Json(request) = payload.map_err(|e| {
        warn!("Bad send request: {}", e);
        AppError::InvalidJson
    })?;

    let stored = stored_roster(&state, &session, domain)
        .filter(|stored| !stored.roster.is_empty())
        .ok_or(AppError::NoData)?;
    let transport = state
        .transport
        .clone()
        .ok_or(ConfigError::MissingCredentials)?;

    info!(
        "Sending {} notifications with fields {:?}",
        domain, request.selected_details
    );
    let template = MessageTemplate {
        top: request.top_template,
        bottom: request.bottom_template,
        selected: request.selected_details,
    };
    // Workbooks and route images are built off the async workers
    let composer = Arc::clone(&state.composer);
    let notifications = tokio::task::spawn_blocking(move || match domain {
        Domain::Employee => composer.employee_notifications(&stored.roster, &template),
        Domain::Vendor => {
            composer.vendor_notifications(&stored.roster, GroupingPolicy::default(), &template)
        }
    })
    .await
    .map_err(|e| ComposeError::Interrupted(e.to_string()))??;

    let report = Dispatcher::new(transport, state.config.dispatch.clone())
        .dispatch(notifications)
        .await;

    Ok(Json(SendResponse {
        status: "success",
        success_count: report.sent_count,
        total_count: report.total_count,
        failed_count: report.failed_count(),
        failed_recipients: report.failed_recipients,
        skipped_count: report.skipped_count,
    }))
}

async fn export_roster<T: MailTransport>(
    State(state): State<AppState<T>>,
    Extension(domain): Extension<Domain>,
    Extension(SessionId(session)): Extension<SessionId>,
) -> Result<Response, AppError> {
    let stored = stored_roster(&state, &session, domain).ok_or(AppError::NoData)?;
    let bytes = export::roster_to_xlsx(&stored.roster, domain.title())?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}_roster.xlsx\"", domain),
            ),
        ],
        Body::from(bytes),
    )
        .into_response())
}
