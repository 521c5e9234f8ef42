use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use super::ws;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{TokenId, TradeSide, WalletId};
use crate::realtime::RealtimeBroadcaster;
use crate::services::{MarketService, NewToken, WalletService, DEFAULT_TRANSACTION_LIMIT};

const IDENTITY_HEADER: &str = "x-wallet-id";
const MAX_BODY_BYTES: u64 = 16 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub market: Arc<MarketService>,
    pub wallets: Arc<WalletService>,
    pub broadcaster: Arc<RealtimeBroadcaster>,
    pub metrics_enabled: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TradeRequest {
    pub side: TradeSide,
    pub amount: f64,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TokensQuery {
    pub creator: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    pub side: TradeSide,
    pub amount: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let health = warp::path!("health").and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({
            "status": "ok",
            "timestamp": chrono::Utc::now().to_rfc3339()
        }))
    });

    let metrics = warp::path!("metrics")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_metrics);

    let list_tokens = warp::path!("tokens")
        .and(warp::get())
        .and(warp::query::<TokensQuery>())
        .and(with_state(state.clone()))
        .and_then(list_tokens);

    let create_token = warp::path!("tokens")
        .and(warp::post())
        .and(identity())
        .and(json_body::<NewToken>())
        .and(with_state(state.clone()))
        .and_then(create_token);

    let get_token = warp::path!("tokens" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_token);

    let token_state = warp::path!("tokens" / String / "state")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_token_state);

    let token_transactions = warp::path!("tokens" / String / "transactions")
        .and(warp::get())
        .and(warp::query::<LimitQuery>())
        .and(with_state(state.clone()))
        .and_then(get_token_transactions);

    let quote = warp::path!("tokens" / String / "quote")
        .and(warp::get())
        .and(warp::query::<QuoteQuery>())
        .and(with_state(state.clone()))
        .and_then(get_quote);

    let trade = warp::path!("tokens" / String / "trade")
        .and(warp::post())
        .and(identity())
        .and(json_body::<TradeRequest>())
        .and(with_state(state.clone()))
        .and_then(place_trade);

    let recent = warp::path!("transactions")
        .and(warp::get())
        .and(warp::query::<LimitQuery>())
        .and(with_state(state.clone()))
        .and_then(recent_transactions);

    let open_wallet = warp::path!("wallets" / String)
        .and(warp::post())
        .and(identity())
        .and(with_state(state.clone()))
        .and_then(open_wallet);

    let get_wallet = warp::path!("wallets" / String)
        .and(warp::get())
        .and(identity())
        .and(with_state(state.clone()))
        .and_then(get_wallet);

    let faucet = warp::path!("wallets" / String / "faucet")
        .and(warp::post())
        .and(identity())
        .and(with_state(state.clone()))
        .and_then(faucet);

    let socket = warp::path!("ws")
        .and(warp::ws())
        .and(with_state(state))
        .map(|upgrade: warp::ws::Ws, state: AppState| {
            let broadcaster = state.broadcaster.clone();
            upgrade.on_upgrade(move |socket| ws::handle_socket(socket, broadcaster))
        });

    health
        .or(metrics)
        .or(list_tokens)
        .or(create_token)
        .or(get_token)
        .or(token_state)
        .or(token_transactions)
        .or(quote)
        .or(trade)
        .or(recent)
        .or(open_wallet)
        .or(get_wallet)
        .or(faucet)
        .or(socket)
        .recover(handle_rejection)
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn identity() -> impl Filter<Extract = (WalletId,), Error = Rejection> + Clone {
    warp::header::<String>(IDENTITY_HEADER).map(WalletId::from)
}

fn json_body<T: serde::de::DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn require_owner(caller: &WalletId, wallet_id: &WalletId) -> Result<()> {
    if caller != wallet_id {
        return Err(Error::Unauthorized(format!(
            "{} cannot act for wallet {}",
            caller, wallet_id
        )));
    }
    Ok(())
}

fn respond<T: Serialize>(result: Result<T>, success: StatusCode) -> Response {
    match result {
        Ok(body) => warp::reply::with_status(warp::reply::json(&body), success).into_response(),
        Err(e) => error_response(&e),
    }
}

fn error_response(e: &Error) -> Response {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("Request failed: {}", e);
    } else {
        debug!("Request rejected: {}", e);
    }
    let body = ErrorBody {
        error: e.to_string(),
        kind: e.kind().to_string(),
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

async fn get_metrics(state: AppState) -> std::result::Result<Response, Rejection> {
    if !state.metrics_enabled {
        return Err(warp::reject::not_found());
    }
    match metrics::gather() {
        Ok(text) => Ok(warp::reply::with_header(text, "content-type", "text/plain; version=0.0.4").into_response()),
        Err(e) => Ok(error_response(&Error::from(e))),
    }
}

async fn list_tokens(query: TokensQuery, state: AppState) -> std::result::Result<Response, Rejection> {
    let result = match query.creator {
        Some(creator) => state.market.tokens_by_creator(&WalletId::from(creator)).await,
        None => state.market.list_tokens().await,
    };
    Ok(respond(result, StatusCode::OK))
}

async fn create_token(
    caller: WalletId,
    request: NewToken,
    state: AppState,
) -> std::result::Result<Response, Rejection> {
    Ok(respond(
        state.market.create_token(&caller, request).await,
        StatusCode::CREATED,
    ))
}

async fn get_token(token_id: String, state: AppState) -> std::result::Result<Response, Rejection> {
    Ok(respond(
        state.market.get_token(&TokenId::from(token_id)).await,
        StatusCode::OK,
    ))
}

async fn get_token_state(token_id: String, state: AppState) -> std::result::Result<Response, Rejection> {
    Ok(respond(
        state.market.get_token_state(&TokenId::from(token_id)).await,
        StatusCode::OK,
    ))
}

async fn get_token_transactions(
    token_id: String,
    query: LimitQuery,
    state: AppState,
) -> std::result::Result<Response, Rejection> {
    let limit = query.limit.unwrap_or(DEFAULT_TRANSACTION_LIMIT);
    Ok(respond(
        state.market.get_transactions(&TokenId::from(token_id), limit).await,
        StatusCode::OK,
    ))
}

async fn get_quote(
    token_id: String,
    query: QuoteQuery,
    state: AppState,
) -> std::result::Result<Response, Rejection> {
    Ok(respond(
        state
            .market
            .quote(&TokenId::from(token_id), query.side, query.amount)
            .await,
        StatusCode::OK,
    ))
}

async fn place_trade(
    token_id: String,
    caller: WalletId,
    request: TradeRequest,
    state: AppState,
) -> std::result::Result<Response, Rejection> {
    Ok(respond(
        state
            .market
            .trade(&TokenId::from(token_id), &caller, request.side, request.amount)
            .await,
        StatusCode::OK,
    ))
}

async fn recent_transactions(query: LimitQuery, state: AppState) -> std::result::Result<Response, Rejection> {
    let limit = query.limit.unwrap_or(DEFAULT_TRANSACTION_LIMIT);
    Ok(respond(state.market.recent_transactions(limit).await, StatusCode::OK))
}

async fn open_wallet(
    wallet_id: String,
    caller: WalletId,
    state: AppState,
) -> std::result::Result<Response, Rejection> {
    let wallet_id = WalletId::from(wallet_id);
    let result = match require_owner(&caller, &wallet_id) {
        Ok(()) => state.wallets.open_wallet(&wallet_id).await,
        Err(e) => Err(e),
    };
    Ok(respond(result, StatusCode::OK))
}

async fn get_wallet(
    wallet_id: String,
    caller: WalletId,
    state: AppState,
) -> std::result::Result<Response, Rejection> {
    let wallet_id = WalletId::from(wallet_id);
    let result = match require_owner(&caller, &wallet_id) {
        Ok(()) => state.wallets.wallet(&wallet_id).await,
        Err(e) => Err(e),
    };
    Ok(respond(result, StatusCode::OK))
}

async fn faucet(
    wallet_id: String,
    caller: WalletId,
    state: AppState,
) -> std::result::Result<Response, Rejection> {
    let wallet_id = WalletId::from(wallet_id);
    let result = match require_owner(&caller, &wallet_id) {
        Ok(()) => state.wallets.faucet(&wallet_id).await,
        Err(e) => Err(e),
    };
    Ok(respond(result, StatusCode::OK))
}

async fn handle_rejection(rejection: Rejection) -> std::result::Result<Response, Infallible> {
    let (status, kind, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not_found", "Not found".to_string())
    } else if let Some(missing) = rejection.find::<warp::reject::MissingHeader>() {
        (
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            format!("Missing {} header", missing.name()),
        )
    } else if let Some(e) = rejection.find::<warp::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "validation_error", e.to_string())
    } else if let Some(e) = rejection.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, "validation_error", e.to_string())
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "validation_error", "Request body too large".to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", "Method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", rejection);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Internal server error".to_string(),
        )
    };

    let body = ErrorBody {
        error: message,
        kind: kind.to_string(),
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), status).into_response())
}
