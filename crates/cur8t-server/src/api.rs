use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    middleware,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use cur8t_shared::constants::SIGNATURE_HEADER;
use cur8t_shared::{CollectionId, RequestId, Visibility};
use cur8t_store::{
    AccessRequest, Collection, Database, Favorite, IncomingAccessRequest, Link, User,
};

use crate::access::{self, RequestStatusView, ResponseSummary};
use crate::auth::Caller;
use crate::billing::{self, SubscriptionStatus, WebhookAck};
use crate::collections::{self, CollectionDetail, FeedPage};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::favorites;
use crate::rate_limit::{rate_limit_middleware, InMemoryRateLimitStore, RateLimiter};
use crate::social;
use crate::users::{self, UserProfile};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig) -> Self {
        let rate_limiter = RateLimiter::new(
            Arc::new(InMemoryRateLimitStore::new()),
            config.rate_limits_enabled,
        );
        Self {
            db: Arc::new(Mutex::new(db)),
            rate_limiter,
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/me", put(sync_user))
        .route("/me/pinned", get(list_pinned))
        .route("/me/saved", get(list_saved))
        .route("/me/favorites", get(list_favorites).post(create_favorite))
        .route(
            "/me/favorites/{id}",
            patch(rename_favorite).delete(delete_favorite),
        )
        .route("/collections", post(create_collection))
        .route("/collections/mine", get(list_my_collections))
        .route("/collections/protected", get(list_protected_collections))
        .route(
            "/collections/{id}",
            get(get_collection)
                .patch(update_collection)
                .delete(delete_collection),
        )
        .route("/collections/{id}/visibility", put(change_visibility))
        .route("/collections/{id}/shared-emails", post(add_shared_email))
        .route(
            "/collections/{id}/shared-emails/{email}",
            delete(remove_shared_email),
        )
        .route("/collections/{id}/duplicate", post(duplicate_collection))
        .route("/collections/{id}/links", post(add_link))
        .route("/links/{id}", delete(remove_link))
        .route("/collections/{id}/like", post(like).delete(unlike))
        .route("/collections/{id}/save", post(save).delete(unsave))
        .route("/collections/{id}/pin", post(pin).delete(unpin))
        .route("/explore", get(explore))
        .route("/collections/{id}/access-requests", post(request_access))
        .route(
            "/collections/{id}/access-requests/status",
            get(access_request_status),
        )
        .route("/access-requests/incoming", get(incoming_requests))
        .route("/access-requests/{id}/approve", post(approve_request))
        .route("/access-requests/{id}/deny", post(deny_request))
        .route("/subscription", get(subscription))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        // Routed after the limiter layer: the webhook is never throttled.
        .route("/webhooks/lemonsqueezy", post(lemonsqueezy_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type ApiResult<T> = Result<Json<T>, ServerError>;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

const SUCCESS: Json<SuccessResponse> = Json(SuccessResponse { success: true });

#[derive(Deserialize)]
struct CreateCollectionRequest {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    visibility: Option<Visibility>,
}

#[derive(Deserialize)]
struct UpdateCollectionRequest {
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VisibilityRequest {
    visibility: Visibility,
    #[serde(default)]
    shared_emails: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct SharedEmailRequest {
    email: String,
}

#[derive(Deserialize)]
struct AddLinkRequest {
    #[serde(default)]
    title: String,
    url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DuplicateRequest {
    #[serde(default = "default_true")]
    include_links: bool,
    #[serde(default)]
    visibility: Option<Visibility>,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct FavoriteRequest {
    title: String,
    url: String,
}

#[derive(Deserialize)]
struct RenameFavoriteRequest {
    title: String,
}

#[derive(Deserialize)]
struct AccessRequestBody {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ExploreQuery {
    q: Option<String>,
    page: Option<usize>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Users ───

async fn sync_user(
    State(state): State<AppState>,
    caller: Caller,
    Json(profile): Json<UserProfile>,
) -> ApiResult<User> {
    Ok(Json(users::sync_user(&state, &caller, &profile).await?))
}

// ─── Collections ───

async fn create_collection(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<CreateCollectionRequest>,
) -> ApiResult<Collection> {
    let collection =
        collections::create(&state, &caller, &req.title, &req.description, req.visibility).await?;
    Ok(Json(collection))
}

async fn list_my_collections(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<Vec<Collection>> {
    Ok(Json(collections::list_mine(&state, &caller).await?))
}

async fn list_protected_collections(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<Vec<Collection>> {
    Ok(Json(collections::list_protected(&state, &caller).await?))
}

async fn get_collection(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<CollectionId>,
) -> ApiResult<CollectionDetail> {
    Ok(Json(collections::get(&state, &caller, id).await?))
}

async fn update_collection(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<CollectionId>,
    Json(req): Json<UpdateCollectionRequest>,
) -> ApiResult<Collection> {
    let collection =
        collections::update_details(&state, &caller, id, &req.title, &req.description).await?;
    Ok(Json(collection))
}

async fn delete_collection(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<CollectionId>,
) -> ApiResult<SuccessResponse> {
    collections::delete(&state, &caller, id).await?;
    Ok(SUCCESS)
}

async fn change_visibility(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<CollectionId>,
    Json(req): Json<VisibilityRequest>,
) -> ApiResult<Collection> {
    let collection = collections::change_visibility(
        &state,
        &caller,
        id,
        req.visibility,
        req.shared_emails.as_deref(),
    )
    .await?;
    Ok(Json(collection))
}

async fn add_shared_email(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<CollectionId>,
    Json(req): Json<SharedEmailRequest>,
) -> ApiResult<Collection> {
    Ok(Json(
        collections::add_shared_email(&state, &caller, id, &req.email).await?,
    ))
}

async fn remove_shared_email(
    State(state): State<AppState>,
    caller: Caller,
    Path((id, email)): Path<(CollectionId, String)>,
) -> ApiResult<Collection> {
    Ok(Json(
        collections::remove_shared_email(&state, &caller, id, &email).await?,
    ))
}

async fn add_link(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<CollectionId>,
    Json(req): Json<AddLinkRequest>,
) -> ApiResult<Link> {
    Ok(Json(
        collections::add_link(&state, &caller, id, &req.title, &req.url).await?,
    ))
}

async fn remove_link(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<SuccessResponse> {
    collections::remove_link(&state, &caller, id).await?;
    Ok(SUCCESS)
}

async fn duplicate_collection(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<CollectionId>,
    Json(req): Json<DuplicateRequest>,
) -> ApiResult<Collection> {
    let copy =
        collections::duplicate(&state, &caller, id, req.include_links, req.visibility).await?;
    Ok(Json(copy))
}

async fn explore(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ExploreQuery>,
) -> ApiResult<FeedPage> {
    let page = collections::public_feed(
        &state,
        &caller,
        query.q.as_deref(),
        query.page.unwrap_or(1),
    )
    .await?;
    Ok(Json(page))
}

// ─── Social ───

async fn like(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<CollectionId>,
) -> ApiResult<SuccessResponse> {
    social::like(&state, &caller, id).await?;
    Ok(SUCCESS)
}

async fn unlike(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<CollectionId>,
) -> ApiResult<SuccessResponse> {
    social::unlike(&state, &caller, id).await?;
    Ok(SUCCESS)
}

async fn save(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<CollectionId>,
) -> ApiResult<SuccessResponse> {
    social::save(&state, &caller, id).await?;
    Ok(SUCCESS)
}

async fn unsave(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<CollectionId>,
) -> ApiResult<SuccessResponse> {
    social::unsave(&state, &caller, id).await?;
    Ok(SUCCESS)
}

async fn pin(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<CollectionId>,
) -> ApiResult<SuccessResponse> {
    social::pin(&state, &caller, id).await?;
    Ok(SUCCESS)
}

async fn unpin(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<CollectionId>,
) -> ApiResult<SuccessResponse> {
    social::unpin(&state, &caller, id).await?;
    Ok(SUCCESS)
}

async fn list_pinned(State(state): State<AppState>, caller: Caller) -> ApiResult<Vec<Collection>> {
    Ok(Json(social::list_pinned(&state, &caller).await?))
}

async fn list_saved(State(state): State<AppState>, caller: Caller) -> ApiResult<Vec<Collection>> {
    Ok(Json(social::list_saved(&state, &caller).await?))
}

// ─── Favorites ───

async fn list_favorites(State(state): State<AppState>, caller: Caller) -> ApiResult<Vec<Favorite>> {
    Ok(Json(favorites::list(&state, &caller).await?))
}

async fn create_favorite(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<FavoriteRequest>,
) -> ApiResult<Favorite> {
    Ok(Json(
        favorites::create(&state, &caller, &req.title, &req.url).await?,
    ))
}

async fn rename_favorite(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<RenameFavoriteRequest>,
) -> ApiResult<Favorite> {
    Ok(Json(favorites::rename(&state, &caller, id, &req.title).await?))
}

async fn delete_favorite(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<SuccessResponse> {
    favorites::delete(&state, &caller, id).await?;
    Ok(SUCCESS)
}

// ─── Access requests ───

async fn request_access(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<CollectionId>,
    Json(body): Json<AccessRequestBody>,
) -> ApiResult<AccessRequest> {
    Ok(Json(
        access::request_access(&state, &caller, id, &body.message).await?,
    ))
}

async fn access_request_status(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<CollectionId>,
) -> ApiResult<RequestStatusView> {
    Ok(Json(access::request_status(&state, &caller, id).await?))
}

async fn incoming_requests(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<Vec<IncomingAccessRequest>> {
    Ok(Json(access::list_incoming(&state, &caller).await?))
}

async fn approve_request(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<RequestId>,
) -> ApiResult<ResponseSummary> {
    Ok(Json(access::approve(&state, &caller, id).await?))
}

async fn deny_request(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<RequestId>,
) -> ApiResult<ResponseSummary> {
    Ok(Json(access::deny(&state, &caller, id).await?))
}

// ─── Billing ───

async fn subscription(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<SubscriptionStatus> {
    Ok(Json(billing::subscription_status(&state, &caller).await?))
}

/// Raw body: the signature covers the exact bytes the provider sent.
async fn lemonsqueezy_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookAck> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    Ok(Json(
        billing::process_webhook(&state, signature, &body).await?,
    ))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
