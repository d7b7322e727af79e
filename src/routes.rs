use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt as _;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::auth::{Auth, TokenService};
use crate::config::AppConfig;
use crate::credentials;
use crate::error::ApiError;
use crate::gamification::GamificationEngine;
use crate::images::{ImagePipeline, MAX_UPLOAD_BYTES};
use crate::models::*;
use crate::oauth::FederatedLoginBroker;
use crate::repo::{AccountRepo, CommentRepo, ReportRepo, Repo};
use crate::storage::ImageStore;

const MAX_TEXT_FIELD_BYTES: usize = 16 * 1024;
const MIN_PASSWORD_LEN: usize = 6;
const DEFAULT_LEADERBOARD_LIMIT: u32 = 10;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/accounts").route(web::post().to(register)))
            .service(web::resource("/accounts/{id}").route(web::delete().to(delete_account)))
            .service(web::resource("/accounts/{id}/rank").route(web::get().to(account_rank)))
            .service(web::resource("/auth/login").route(web::post().to(login)))
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(web::resource("/auth/password").route(web::put().to(change_password)))
            .service(web::resource("/auth/google/login").route(web::get().to(google_login)))
            .service(web::resource("/auth/google/callback").route(web::get().to(google_callback)))
            .service(
                web::resource("/reports")
                    .route(web::get().to(list_reports))
                    .route(web::post().to(create_report)),
            )
            .service(
                web::resource("/reports/{id}")
                    .route(web::get().to(get_report))
                    .route(web::delete().to(delete_report)),
            )
            .service(
                web::resource("/reports/{id}/comments")
                    .route(web::get().to(list_comments))
                    .route(web::post().to(create_comment)),
            )
            .service(web::resource("/leaderboard").route(web::get().to(leaderboard))),
    );
    cfg.route("/health", web::get().to(health));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub tokens: Arc<TokenService>,
    pub images: ImagePipeline,
    pub engine: GamificationEngine,
    pub broker: Option<Arc<FederatedLoginBroker>>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wires every service from one config. Fails only if the outbound HTTP
    /// client for federated login cannot be built.
    pub fn new(
        config: AppConfig,
        repo: Arc<dyn Repo>,
        store: Arc<dyn ImageStore>,
    ) -> Result<Self, reqwest::Error> {
        let broker = config
            .oauth
            .as_ref()
            .map(FederatedLoginBroker::new)
            .transpose()?
            .map(Arc::new);
        Ok(Self {
            tokens: Arc::new(TokenService::new(&config)),
            images: ImagePipeline::new(store),
            engine: GamificationEngine::new(repo.clone()),
            broker,
            repo,
            config: Arc::new(config),
        })
    }

    /// The caller's account. A valid token for a deleted account is rejected.
    async fn caller(&self, auth: &Auth) -> Result<Account, ApiError> {
        self.repo
            .get_account(auth.0)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("account no longer exists".into()))
    }

    async fn admin(&self, auth: &Auth) -> Result<Account, ApiError> {
        let account = self.caller(auth).await?;
        if !account.is_admin {
            return Err(ApiError::Forbidden);
        }
        Ok(account)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
    pub account: Account,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommentRequest {
    pub content: String,
}

/// Multipart fields accepted by report submission. Documentation only.
#[allow(dead_code)]
#[derive(ToSchema)]
pub struct ReportUpload {
    latitude: f64,
    longitude: f64,
    description: String,
    trail: Option<String>,
    #[schema(value_type = Option<String>, format = Binary)]
    image: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RangeQuery {
    /// RFC 3339 instant, inclusive.
    pub start: Option<String>,
    /// RFC 3339 instant, inclusive.
    pub end: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LeaderboardQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackQuery {
    pub code: Option<String>,
}

fn check_new_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/v1/accounts",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = Account),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn register(
    data: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let name = req.name.trim();
    let email = req.email.trim().to_lowercase();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }
    if !email.contains('@') {
        return Err(ApiError::BadRequest("email is invalid".into()));
    }
    check_new_password(&req.password)?;

    let mut new = NewAccount::new(name, email.as_str());
    new.is_admin = data.config.is_bootstrap_admin(&email);
    new.set_password(&req.password)?;
    let account = data.repo.create_account(new).await?;
    info!(account_id = account.id, is_admin = account.is_admin, "account registered");
    Ok(HttpResponse::Created().json(account))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session token", body = TokenResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let email = req.email.trim().to_lowercase();
    let account = match data.repo.get_account_by_email(&email).await? {
        Some(account) if account.check_password(&req.password) => account,
        Some(account) => {
            warn!(account_id = account.id, "login rejected: wrong password");
            return Err(ApiError::Unauthorized("invalid credentials".into()));
        }
        None => {
            credentials::verify_against_dummy(&req.password);
            return Err(ApiError::Unauthorized("invalid credentials".into()));
        }
    };
    let token = data.tokens.issue(account.id)?;
    Ok(HttpResponse::Ok().json(TokenResponse { token, account }))
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current account", body = Account),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearerAuth" = []))
)]
pub async fn auth_me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let account = data.caller(&auth).await?;
    Ok(HttpResponse::Ok().json(account))
}

#[utoipa::path(
    put,
    path = "/api/v1/auth/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "New password too short"),
        (status = 401, description = "Current password wrong")
    ),
    security(("bearerAuth" = []))
)]
pub async fn change_password(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<ChangePasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let mut account = data.caller(&auth).await?;
    if !account.check_password(&req.current_password) {
        return Err(ApiError::Unauthorized("invalid credentials".into()));
    }
    check_new_password(&req.new_password)?;
    account.set_password(&req.new_password)?;
    data.repo.update_password(account.id, &account.password_hash).await?;
    info!(account_id = account.id, "password changed");
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/google/login",
    responses(
        (status = 302, description = "Redirect to the provider"),
        (status = 503, description = "Federated login not configured")
    )
)]
pub async fn google_login(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let broker = data
        .broker
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("google login is not configured".into()))?;
    Ok(HttpResponse::Found()
        .insert_header(("Location", broker.begin_login()))
        .finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/google/callback",
    params(CallbackQuery),
    responses(
        (status = 200, description = "Session token", body = TokenResponse),
        (status = 401, description = "Code rejected by the provider"),
        (status = 502, description = "Provider or store failure"),
        (status = 503, description = "Federated login not configured")
    )
)]
pub async fn google_callback(
    data: web::Data<AppState>,
    query: web::Query<CallbackQuery>,
) -> Result<HttpResponse, ApiError> {
    let broker = data
        .broker
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("google login is not configured".into()))?;
    let code = query
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("code is required".into()))?;
    let login = broker.complete_login(data.repo.as_ref(), &data.tokens, code).await?;
    Ok(HttpResponse::Ok().json(TokenResponse { token: login.token, account: login.account }))
}

#[derive(Default)]
struct ReportForm {
    latitude: Option<String>,
    longitude: Option<String>,
    description: Option<String>,
    trail: Option<String>,
    image: Option<Vec<u8>>,
}

fn field_text(name: &str, bytes: Vec<u8>) -> Result<String, ApiError> {
    String::from_utf8(bytes).map_err(|_| ApiError::BadRequest(format!("{name} must be utf-8 text")))
}

fn parse_coordinate(name: &'static str, raw: Option<String>) -> Result<f64, ApiError> {
    raw.ok_or(ValidationError::Missing(name))?
        .trim()
        .parse::<f64>()
        .map_err(|_| ApiError::BadRequest(format!("{name} is not a number")))
}

async fn read_report_form(mut payload: Multipart) -> Result<ReportForm, ApiError> {
    let mut form = ReportForm::default();
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let name = field.content_disposition().get_name().unwrap_or_default().to_string();
        let limit = if name == "image" { MAX_UPLOAD_BYTES } else { MAX_TEXT_FIELD_BYTES };
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| ApiError::BadRequest(format!("multipart read error: {e}")))?
        {
            if bytes.len() + chunk.len() > limit {
                return Err(ApiError::PayloadTooLarge);
            }
            bytes.extend_from_slice(&chunk);
        }
        match name.as_str() {
            "latitude" => form.latitude = Some(field_text(&name, bytes)?),
            "longitude" => form.longitude = Some(field_text(&name, bytes)?),
            "description" => form.description = Some(field_text(&name, bytes)?),
            "trail" => form.trail = Some(field_text(&name, bytes)?),
            "image" if !bytes.is_empty() => form.image = Some(bytes),
            _ => {}
        }
    }
    Ok(form)
}

#[utoipa::path(
    post,
    path = "/api/v1/reports",
    request_body(content = ReportUpload, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Report created", body = Report),
        (status = 400, description = "Invalid fields"),
        (status = 413, description = "Image too large"),
        (status = 415, description = "Image not decodable")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_report(
    auth: Auth,
    data: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let form = read_report_form(payload).await?;
    let account = data.caller(&auth).await?;

    let mut new = NewReport {
        account_id: account.id,
        latitude: parse_coordinate("latitude", form.latitude)?,
        longitude: parse_coordinate("longitude", form.longitude)?,
        image_path: None,
        description: form.description.unwrap_or_default(),
        trail: form.trail.filter(|t| !t.trim().is_empty()),
    };
    new.validate()?;

    if let Some(raw) = form.image {
        new.image_path = Some(data.images.ingest(raw).await?);
    }
    let stored_image = new.image_path.clone();
    match data.repo.create_report(new).await {
        Ok(report) => {
            info!(report_id = report.id, account_id = account.id, "report submitted");
            Ok(HttpResponse::Created().json(report))
        }
        Err(e) => {
            if let Some(path) = stored_image {
                if let Err(err) = data.images.store().remove(&path).await {
                    warn!(%path, %err, "orphaned image left behind");
                }
            }
            Err(e.into())
        }
    }
}

fn parse_instant(name: &str, raw: Option<&str>) -> Result<DateTime<Utc>, ApiError> {
    let raw = raw.ok_or_else(|| ApiError::BadRequest(format!("{name} is required")))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ApiError::BadRequest(format!("{name} must be an RFC 3339 timestamp")))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports",
    params(RangeQuery),
    responses(
        (status = 200, description = "Reports created within [start, end], newest first", body = [Report]),
        (status = 400, description = "Missing or malformed range")
    )
)]
pub async fn list_reports(
    data: web::Data<AppState>,
    query: web::Query<RangeQuery>,
) -> Result<HttpResponse, ApiError> {
    let start = parse_instant("start", query.start.as_deref())?;
    let end = parse_instant("end", query.end.as_deref())?;
    let reports = data.repo.reports_between(start, end).await?;
    Ok(HttpResponse::Ok().json(reports))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/{id}",
    params(("id" = Id, Path, description = "Report id")),
    responses(
        (status = 200, description = "Report", body = Report),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_report(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let report = data.repo.get_report(path.into_inner()).await?.ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(report))
}

#[utoipa::path(
    delete,
    path = "/api/v1/reports/{id}",
    params(("id" = Id, Path, description = "Report id")),
    responses(
        (status = 204, description = "Report and its comments removed"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_report(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let admin = data.admin(&auth).await?;
    let id = path.into_inner();
    let report = data.repo.get_report(id).await?.ok_or(ApiError::NotFound)?;
    data.repo.delete_report(id).await?;
    if let Some(image) = report.image_path.as_deref() {
        if let Err(err) = data.images.store().remove(image).await {
            warn!(report_id = id, %err, "report image not removed");
        }
    }
    info!(report_id = id, admin_id = admin.id, "report deleted");
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/{id}/comments",
    params(("id" = Id, Path, description = "Report id")),
    responses(
        (status = 200, description = "Comments, oldest first", body = [Comment]),
        (status = 404, description = "Report not found")
    )
)]
pub async fn list_comments(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    data.repo.get_report(id).await?.ok_or(ApiError::NotFound)?;
    let comments = data.repo.list_comments(id).await?;
    Ok(HttpResponse::Ok().json(comments))
}

#[utoipa::path(
    post,
    path = "/api/v1/reports/{id}/comments",
    params(("id" = Id, Path, description = "Report id")),
    request_body = CommentRequest,
    responses(
        (status = 201, description = "Comment created", body = Comment),
        (status = 400, description = "Empty content"),
        (status = 404, description = "Report not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<CommentRequest>,
) -> Result<HttpResponse, ApiError> {
    let content = payload.into_inner().content;
    if content.trim().is_empty() {
        return Err(ValidationError::Missing("content").into());
    }
    let account = data.caller(&auth).await?;
    let report = data.repo.get_report(path.into_inner()).await?.ok_or(ApiError::NotFound)?;
    let comment = data
        .repo
        .create_comment(NewComment { report_id: report.id, account_id: account.id, content })
        .await?;
    data.engine.reward_comment(&comment, report.account_id).await;
    Ok(HttpResponse::Created().json(comment))
}

#[utoipa::path(
    get,
    path = "/api/v1/leaderboard",
    params(LeaderboardQuery),
    responses(
        (status = 200, description = "Top accounts by experience", body = [LeaderboardEntry])
    )
)]
pub async fn leaderboard(
    data: web::Data<AppState>,
    query: web::Query<LeaderboardQuery>,
) -> Result<HttpResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT);
    let entries = data.engine.leaderboard(limit).await?;
    Ok(HttpResponse::Ok().json(entries))
}

#[utoipa::path(
    get,
    path = "/api/v1/accounts/{id}/rank",
    params(("id" = Id, Path, description = "Account id")),
    responses(
        (status = 200, description = "Rank and experience", body = Rank),
        (status = 404, description = "Account not found")
    )
)]
pub async fn account_rank(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let rank = data.engine.rank(path.into_inner()).await?.ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(rank))
}

#[utoipa::path(
    delete,
    path = "/api/v1/accounts/{id}",
    params(("id" = Id, Path, description = "Account id")),
    responses(
        (status = 204, description = "Account and everything it owns removed"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_account(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let admin = data.admin(&auth).await?;
    let id = path.into_inner();
    let images = data.repo.image_paths_of(id).await?;
    data.repo.delete_account(id).await?;
    for image in &images {
        if let Err(err) = data.images.store().remove(image).await {
            warn!(account_id = id, %image, %err, "report image not removed");
        }
    }
    info!(account_id = id, admin_id = admin.id, images = images.len(), "account deleted");
    Ok(HttpResponse::NoContent().finish())
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}
