use crate::auth::verify_token;
use crate::context::AppContext;
use crate::error::{CommandError, CustomError};
use crate::trading::{self, AlertRequest, OrderRequest};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

const DEFAULT_TRADE_LIMIT: i32 = 25;
const MAX_TRADE_LIMIT: i32 = 100;
const MAX_BODY_BYTES: u64 = 16 * 1024;

#[derive(Deserialize)]
struct TradesQuery {
    limit: Option<i32>,
}

/// All routes with rejections rendered as JSON errors.
pub fn api(
    ctx: AppContext,
    jwt_secret: Arc<String>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    routes(ctx, jwt_secret).recover(handle_rejection)
}

pub fn routes(
    ctx: AppContext,
    jwt_secret: Arc<String>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let health = warp::path!("health")
        .and(warp::get())
        .map(|| "Bot is running...");

    let quote = warp::path!("quote" / String)
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(quote_handler);

    let get_portfolio = warp::path!("portfolio")
        .and(warp::get())
        .and(with_user(jwt_secret.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(get_portfolio_handler);

    let reset_portfolio = warp::path!("portfolio")
        .and(warp::delete())
        .and(with_user(jwt_secret.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(reset_portfolio_handler);

    let place_order = warp::path!("orders")
        .and(warp::post())
        .and(with_user(jwt_secret.clone()))
        .and(with_ctx(ctx.clone()))
        .and(json_body())
        .and_then(place_order_handler);

    let list_orders = warp::path!("orders")
        .and(warp::get())
        .and(with_user(jwt_secret.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(list_orders_handler);

    let cancel_order = warp::path!("orders" / String)
        .and(warp::delete())
        .and(with_user(jwt_secret.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(cancel_order_handler);

    let add_alert = warp::path!("alerts")
        .and(warp::post())
        .and(with_user(jwt_secret.clone()))
        .and(with_ctx(ctx.clone()))
        .and(json_body())
        .and_then(add_alert_handler);

    let list_alerts = warp::path!("alerts")
        .and(warp::get())
        .and(with_user(jwt_secret.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(list_alerts_handler);

    let remove_alert = warp::path!("alerts" / String)
        .and(warp::delete())
        .and(with_user(jwt_secret.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(remove_alert_handler);

    let trades = warp::path!("trades")
        .and(warp::get())
        .and(with_user(jwt_secret))
        .and(with_ctx(ctx))
        .and(warp::query::<TradesQuery>())
        .and_then(trades_handler);

    health
        .or(quote)
        .or(get_portfolio)
        .or(reset_portfolio)
        .or(place_order)
        .or(list_orders)
        .or(cancel_order)
        .or(add_alert)
        .or(list_alerts)
        .or(remove_alert)
        .or(trades)
}

fn with_ctx(
    ctx: AppContext,
) -> impl Filter<Extract = (AppContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

/// Resolves the bearer token to the user id it was issued for.
fn with_user(
    jwt_secret: Arc<String>,
) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::<String>("authorization").and_then(move |header: String| {
        let jwt_secret = jwt_secret.clone();
        async move {
            let token = header
                .strip_prefix("Bearer ")
                .ok_or_else(|| unauthorized("expected a bearer token"))?;
            verify_token(token, &jwt_secret).map_err(|e| {
                warn!("Rejected token: {}", e);
                unauthorized("invalid or expired token")
            })
        }
    })
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: for<'de> Deserialize<'de> + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn unauthorized(message: &str) -> Rejection {
    warp::reject::custom(CustomError {
        status: StatusCode::UNAUTHORIZED,
        message: message.to_string(),
    })
}

fn reject(action: &str, err: CommandError) -> Rejection {
    if err.status().is_server_error() {
        error!("Failed to {}: {}", action, err);
    } else {
        info!("Refused to {}: {}", action, err);
    }
    warp::reject::custom(CustomError::from(err))
}

async fn quote_handler(ticker: String, ctx: AppContext) -> Result<impl Reply, Rejection> {
    match trading::quote(&ctx, &ticker).await {
        Ok(quote) => Ok(warp::reply::json(&quote)),
        Err(e) => Err(reject("fetch quote", e)),
    }
}

async fn get_portfolio_handler(user_id: String, ctx: AppContext) -> Result<impl Reply, Rejection> {
    match trading::portfolio_summary(&ctx, &user_id).await {
        Ok(summary) => Ok(warp::reply::json(&summary)),
        Err(e) => Err(reject("retrieve portfolio", e)),
    }
}

async fn reset_portfolio_handler(user_id: String, ctx: AppContext) -> Result<impl Reply, Rejection> {
    match trading::reset_portfolio(&ctx, &user_id).await {
        Ok(()) => Ok(warp::reply::with_status(
            "Portfolio reset",
            StatusCode::OK,
        )),
        Err(e) => Err(reject("reset portfolio", e)),
    }
}

async fn place_order_handler(
    user_id: String,
    ctx: AppContext,
    request: OrderRequest,
) -> Result<impl Reply, Rejection> {
    match trading::place_order(&ctx, &user_id, request).await {
        Ok(placed) => Ok(warp::reply::with_status(
            warp::reply::json(&placed),
            StatusCode::CREATED,
        )),
        Err(e) => Err(reject("place order", e)),
    }
}

async fn list_orders_handler(user_id: String, ctx: AppContext) -> Result<impl Reply, Rejection> {
    match trading::list_orders(&ctx, &user_id).await {
        Ok(orders) => Ok(warp::reply::json(&orders)),
        Err(e) => Err(reject("list orders", e)),
    }
}

async fn cancel_order_handler(
    id: String,
    user_id: String,
    ctx: AppContext,
) -> Result<impl Reply, Rejection> {
    match trading::cancel_order(&ctx, &user_id, &id).await {
        Ok(()) => Ok(warp::reply::with_status("Order cancelled", StatusCode::OK)),
        Err(e) => Err(reject("cancel order", e)),
    }
}

async fn add_alert_handler(
    user_id: String,
    ctx: AppContext,
    request: AlertRequest,
) -> Result<impl Reply, Rejection> {
    match trading::add_price_alert(&ctx, &user_id, &request.ticker, request.target_price).await {
        Ok(alert) => Ok(warp::reply::with_status(
            warp::reply::json(&alert),
            StatusCode::CREATED,
        )),
        Err(e) => Err(reject("add price alert", e)),
    }
}

async fn list_alerts_handler(user_id: String, ctx: AppContext) -> Result<impl Reply, Rejection> {
    match trading::list_price_alerts(&ctx, &user_id).await {
        Ok(alerts) => Ok(warp::reply::json(&alerts)),
        Err(e) => Err(reject("list price alerts", e)),
    }
}

async fn remove_alert_handler(
    id: String,
    user_id: String,
    ctx: AppContext,
) -> Result<impl Reply, Rejection> {
    match trading::remove_price_alert(&ctx, &user_id, &id).await {
        Ok(()) => Ok(warp::reply::with_status("Price alert removed", StatusCode::OK)),
        Err(e) => Err(reject("remove price alert", e)),
    }
}

async fn trades_handler(
    user_id: String,
    ctx: AppContext,
    query: TradesQuery,
) -> Result<impl Reply, Rejection> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_TRADE_LIMIT)
        .clamp(1, MAX_TRADE_LIMIT);
    match trading::trade_history(&ctx, &user_id, limit).await {
        Ok(trades) => Ok(warp::reply::json(&trades)),
        Err(e) => Err(reject("fetch trade history", e)),
    }
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = err.find::<CustomError>() {
        (e.status, e.message.clone())
    } else if err.find::<warp::reject::MissingHeader>().is_some() {
        (StatusCode::UNAUTHORIZED, "missing bearer token".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "invalid query string".to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "request body too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "error": message })),
        status,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::create_token;
    use crate::context::testing::harness;
    use serde_json::Value;

    const SECRET: &str = "test-secret";

    fn bearer(user_id: &str) -> String {
        format!("Bearer {}", create_token(user_id, SECRET).unwrap())
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let h = harness();
        let filter = api(h.ctx, Arc::new(SECRET.to_string()));
        let res = warp::test::request().path("/health").reply(&filter).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body(), "Bot is running...");
    }

    #[tokio::test]
    async fn portfolio_requires_token() {
        let h = harness();
        let filter = api(h.ctx, Arc::new(SECRET.to_string()));

        let res = warp::test::request().path("/portfolio").reply(&filter).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = warp::test::request()
            .path("/portfolio")
            .header("authorization", "Bearer not-a-token")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn new_user_gets_starting_portfolio() {
        let h = harness();
        let filter = api(h.ctx, Arc::new(SECRET.to_string()));
        let res = warp::test::request()
            .path("/portfolio")
            .header("authorization", bearer("u1"))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["cash"], 100_000.0);
        assert_eq!(body["holdings_count"], 0);
    }

    #[tokio::test]
    async fn places_market_and_limit_orders() {
        let h = harness();
        h.quotes.set("AAPL", 150.0);
        let filter = api(h.ctx, Arc::new(SECRET.to_string()));

        let res = warp::test::request()
            .method("POST")
            .path("/orders")
            .header("authorization", bearer("u1"))
            .json(&json!({"ticker": "aapl", "side": "BUY", "quantity": 2}))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["status"], "filled");
        assert_eq!(body["total"], 300.0);

        let res = warp::test::request()
            .method("POST")
            .path("/orders")
            .header("authorization", bearer("u1"))
            .json(&json!({"ticker": "AAPL", "side": "SELL", "quantity": 1,
                "order_type": "limit", "execute_price": 175.0}))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["status"], "pending");
        let id = body["id"].as_str().unwrap().to_string();

        let res = warp::test::request()
            .method("DELETE")
            .path(&format!("/orders/{}", id))
            .header("authorization", bearer("u2"))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = warp::test::request()
            .method("DELETE")
            .path(&format!("/orders/{}", id))
            .header("authorization", bearer("u1"))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn insufficient_funds_is_conflict() {
        let h = harness();
        h.quotes.set("BRK-A", 600_000.0);
        let filter = api(h.ctx, Arc::new(SECRET.to_string()));
        let res = warp::test::request()
            .method("POST")
            .path("/orders")
            .header("authorization", bearer("u1"))
            .json(&json!({"ticker": "BRK-A", "side": "BUY", "quantity": 1}))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::CONFLICT);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert!(body["error"].as_str().unwrap().contains("enough money"));
    }

    #[tokio::test]
    async fn alerts_are_grouped_by_ticker() {
        let h = harness();
        h.quotes.set("BTC-USD", 59_000.0);
        let filter = api(h.ctx, Arc::new(SECRET.to_string()));

        let res = warp::test::request()
            .method("POST")
            .path("/alerts")
            .header("authorization", bearer("u1"))
            .json(&json!({"ticker": "btc-usd", "target_price": 60000}))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);

        let res = warp::test::request()
            .path("/alerts")
            .header("authorization", bearer("u1"))
            .reply(&filter)
            .await;
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["BTC-USD"][0]["direction"], "ABOVE");
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let h = harness();
        let filter = api(h.ctx, Arc::new(SECRET.to_string()));
        let res = warp::test::request()
            .method("POST")
            .path("/orders")
            .header("authorization", bearer("u1"))
            .header("content-type", "application/json")
            .body("{\"ticker\": 5}")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
