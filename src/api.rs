use axum::{
    Json, Router,
    extract::{FromRequest, Path, Query, Request, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use crate::{
    engine::{BookSnapshot, OrderFilter, OrderRequest},
    errors::EngineError,
    ledger::{AccountId, AccountView},
    orders::{OrderId, OrderRecord, OrderStatus, Side},
    state::AppState,
};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 100;
const DEFAULT_DEPTH: usize = 10;
const MAX_DEPTH: usize = 100;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    Body { status: StatusCode, message: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Engine(err) => {
                let status = match err {
                    EngineError::UnknownAccount(_)
                    | EngineError::UnknownAsset(_)
                    | EngineError::UnknownOrder(_) => StatusCode::NOT_FOUND,
                    EngineError::InvalidAmount { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    EngineError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
                };
                (status, err.code())
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            ApiError::Body { status, .. } => (*status, "INVALID_BODY"),
        };
        let body = Json(json!({
            "error": code,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// `Json<T>` whose rejections are logged and reported in the same
/// `{error, message}` shape as every other API error.
pub struct LoggedJson<T>(pub T);

impl<S, T> FromRequest<S> for LoggedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(LoggedJson(value)),
            Err(rejection) => {
                warn!(status = %rejection.status(), body = %rejection.body_text(), "rejected request body");
                Err(body_error(rejection))
            }
        }
    }
}

fn body_error(rejection: JsonRejection) -> ApiError {
    ApiError::Body {
        status: rejection.status(),
        message: rejection.body_text(),
    }
}

fn parse_account_id(raw: &str) -> Result<AccountId, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid account id: `{raw}`")))
}

fn parse_order_id(raw: &str) -> Result<OrderId, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid order id: `{raw}`")))
}

#[derive(Debug, Deserialize)]
pub struct CreateAccount {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBalance {
    pub amount: Decimal,
    pub asset_code: String,
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrder {
    pub account_id: AccountId,
    pub asset_code: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub order_type: Side,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub size: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub page: usize,
    pub size: usize,
    pub total: usize,
    pub items: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct OrderQuery {
    pub asset_code: Option<String>,
    pub account_id: Option<String>,
    pub status: Option<OrderStatus>,
    pub page: Option<usize>,
    pub size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DepthQuery {
    pub depth: Option<usize>,
}

pub async fn create_account(
    State(state): State<AppState>,
    LoggedJson(payload): LoggedJson<CreateAccount>,
) -> Result<(StatusCode, Json<AccountView>), ApiError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("name is required".into()));
    }
    let id = state.engine.create_account(name);
    Ok((StatusCode::CREATED, Json(state.engine.account(id)?)))
}

pub async fn list_accounts(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Json<Page<AccountView>> {
    let page = q.page.unwrap_or(1).max(1);
    let size = q.size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let (items, total) = state.engine.ledger().accounts(page, size);
    Json(Page {
        page,
        size,
        total,
        items,
    })
}

pub async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AccountView>, ApiError> {
    let id = parse_account_id(&id)?;
    Ok(Json(state.engine.account(id)?))
}

/// Credits an account. Despite the route name this is a plain deposit.
pub async fn charge_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
    LoggedJson(payload): LoggedJson<UpdateBalance>,
) -> Result<StatusCode, ApiError> {
    let id = parse_account_id(&id)?;
    state
        .engine
        .fund_account(id, &payload.asset_code, payload.amount)?;
    Ok(StatusCode::OK)
}

pub async fn remove_from_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
    LoggedJson(payload): LoggedJson<UpdateBalance>,
) -> Result<StatusCode, ApiError> {
    let id = parse_account_id(&id)?;
    state
        .engine
        .withdraw(id, &payload.asset_code, payload.amount)?;
    Ok(StatusCode::OK)
}

/// Places a limit order. Trade details are not returned; their effect is
/// visible through the account endpoints as soon as this responds.
pub async fn place_order(
    State(state): State<AppState>,
    LoggedJson(payload): LoggedJson<PlaceOrder>,
) -> Result<StatusCode, ApiError> {
    state.engine.place_order(OrderRequest {
        account_id: payload.account_id,
        asset_code: payload.asset_code,
        side: payload.order_type,
        price: payload.price,
        quantity: payload.quantity,
    })?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(q): Query<OrderQuery>,
) -> Result<Json<Page<OrderRecord>>, ApiError> {
    let page = q.page.unwrap_or(1).max(1);
    let size = q.size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let filter = OrderFilter {
        asset_code: q.asset_code,
        account_id: q.account_id.as_deref().map(parse_account_id).transpose()?,
        status: q.status,
    };
    let (items, total) = state.engine.orders(&filter, page, size)?;
    Ok(Json(Page {
        page,
        size,
        total,
        items,
    }))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path((asset_code, order_id)): Path<(String, String)>,
) -> Result<Json<OrderRecord>, ApiError> {
    let order_id = parse_order_id(&order_id)?;
    Ok(Json(state.engine.order(&asset_code, order_id)?))
}

pub async fn order_book(
    State(state): State<AppState>,
    Path(asset_code): Path<String>,
    Query(q): Query<DepthQuery>,
) -> Result<(HeaderMap, Json<BookSnapshot>), ApiError> {
    let depth = q.depth.unwrap_or(DEFAULT_DEPTH).clamp(1, MAX_DEPTH);
    let snapshot = state.engine.depth(&asset_code, depth)?;
    let mut headers = HeaderMap::new();
    headers.insert("x-effective-depth", HeaderValue::from(depth));
    Ok((headers, Json(snapshot)))
}

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/accounts", post(create_account).get(list_accounts))
        .route("/accounts/{id}", get(get_account))
        .route("/accounts/{id}/charge", post(charge_account))
        .route("/accounts/{id}/remove", post(remove_from_account))
        .route("/order_book", post(place_order).get(list_orders))
        .route("/order_book/{asset_code}", get(order_book))
        .route("/order_book/{asset_code}/{order_id}", get(get_order));

    Router::new()
        .nest("/v1", v1)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
