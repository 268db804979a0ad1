use crate::context::AppContext;
use crate::error::CommandError;
use crate::models::{
    normalize_ticker, round_cash, round_to, Direction, LimitOrder, Portfolio, PriceAlert, Quote,
    Shortfall, Side, Task, TradeOrigin, TradeRecord, MAX_ALERTS_PER_TICKER, TARGET_PRECISION,
};
use chrono::Utc;
use futures::future::join_all;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Deserialize, Clone, Debug)]
pub struct OrderRequest {
    pub ticker: String,
    pub side: Side,
    pub quantity: u64,
    #[serde(default = "default_order_type")]
    pub order_type: OrderType,
    pub execute_price: Option<f64>,
}

fn default_order_type() -> OrderType {
    OrderType::Market
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrderPlaced {
    Filled(TradeRecord),
    Pending(LimitOrder),
}

#[derive(Deserialize, Clone, Debug)]
pub struct AlertRequest {
    pub ticker: String,
    pub target_price: f64,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct HoldingSummary {
    pub ticker: String,
    pub quantity: u64,
    pub buy_price: f64,
    pub price: f64,
    /// Set when no quote was available and the buy price stands in.
    pub price_stale: bool,
    pub total_value: f64,
    pub change_dollar: f64,
    pub change_pct: f64,
    pub invested_weight: f64,
    pub total_weight: f64,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct PortfolioSummary {
    pub user_id: String,
    pub cash: f64,
    pub total_value: f64,
    pub net_worth: f64,
    pub cash_pct: f64,
    pub change_dollar: f64,
    pub change_pct: f64,
    pub holdings_count: usize,
    pub shares_count: u64,
    pub holdings: Vec<HoldingSummary>,
}

fn pct(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        round_to(part / whole * 100.0, 2)
    }
}

fn validate_quantity(quantity: u64) -> Result<u64, CommandError> {
    if quantity == 0 {
        return Err(CommandError::InvalidQuantity);
    }
    Ok(quantity)
}

fn validate_price(price: f64) -> Result<f64, CommandError> {
    if !price.is_finite() || price <= 0.0 {
        return Err(CommandError::InvalidPrice);
    }
    Ok(price)
}

fn shortfall_error(ticker: &str, quantity: u64, shortfall: Shortfall) -> CommandError {
    match shortfall {
        Shortfall::Funds { needed, available } => {
            CommandError::InsufficientFunds { needed, available }
        }
        Shortfall::Shares { .. } => CommandError::InsufficientShares {
            ticker: ticker.to_string(),
            requested: quantity,
        },
        Shortfall::NotHeld => CommandError::NotHeld(ticker.to_string()),
    }
}

pub async fn quote(ctx: &AppContext, ticker: &str) -> Result<Quote, CommandError> {
    Ok(ctx.quotes.fetch_price(&normalize_ticker(ticker)).await?)
}

/// Returns the user's portfolio, creating it with the starting balance on first use.
pub async fn open_portfolio(ctx: &AppContext, user_id: &str) -> Result<Portfolio, CommandError> {
    let _guard = ctx.locks.lock(user_id).await;
    ensure_portfolio(ctx, user_id).await
}

// Callers must hold the user's lock.
async fn ensure_portfolio(ctx: &AppContext, user_id: &str) -> Result<Portfolio, CommandError> {
    if let Some(portfolio) = ctx.portfolios.get_portfolio(user_id).await? {
        return Ok(portfolio);
    }
    let portfolio = Portfolio::new(user_id, ctx.starting_balance);
    ctx.portfolios.put_portfolio(&portfolio).await?;
    info!("Created portfolio for {} with ${}", user_id, portfolio.balance);
    Ok(portfolio)
}

pub async fn reset_portfolio(ctx: &AppContext, user_id: &str) -> Result<(), CommandError> {
    let _guard = ctx.locks.lock(user_id).await;
    ctx.portfolios.delete_portfolio(user_id).await?;
    info!("Reset portfolio for {}", user_id);
    Ok(())
}

pub async fn place_order(
    ctx: &AppContext,
    user_id: &str,
    request: OrderRequest,
) -> Result<OrderPlaced, CommandError> {
    match request.order_type {
        OrderType::Market => market_order(
            ctx,
            user_id,
            request.side,
            &request.ticker,
            request.quantity,
        )
        .await
        .map(OrderPlaced::Filled),
        OrderType::Limit => {
            let execute_price = request
                .execute_price
                .ok_or(CommandError::MissingExecutePrice)?;
            place_limit_order(
                ctx,
                user_id,
                request.side,
                &request.ticker,
                request.quantity,
                execute_price,
            )
            .await
            .map(OrderPlaced::Pending)
        }
    }
}

/// Buys or sells immediately at the current price.
pub async fn market_order(
    ctx: &AppContext,
    user_id: &str,
    side: Side,
    ticker: &str,
    quantity: u64,
) -> Result<TradeRecord, CommandError> {
    let quantity = validate_quantity(quantity)?;
    let quote = quote(ctx, ticker).await?;
    let price = quote.price;

    let _guard = ctx.locks.lock(user_id).await;
    let mut portfolio = ensure_portfolio(ctx, user_id).await?;
    let applied = match side {
        Side::Buy => portfolio.apply_buy(&quote.ticker, quantity, price),
        Side::Sell => portfolio.apply_sell(&quote.ticker, quantity, price),
    };
    let total = applied.map_err(|s| shortfall_error(&quote.ticker, quantity, s))?;
    ctx.portfolios.put_portfolio(&portfolio).await?;

    let trade = TradeRecord::new(
        user_id,
        side,
        &quote.ticker,
        quantity,
        price,
        total,
        TradeOrigin::Market,
    );
    if let Err(e) = ctx.trades.log_trade(&trade).await {
        error!("Failed to log trade {} for {}: {}", trade.id, user_id, e);
    }
    info!("{} {} {} @ ${} for {}", side, quantity, quote.ticker, price, user_id);
    Ok(trade)
}

pub async fn place_limit_order(
    ctx: &AppContext,
    user_id: &str,
    side: Side,
    ticker: &str,
    quantity: u64,
    execute_price: f64,
) -> Result<LimitOrder, CommandError> {
    let quantity = validate_quantity(quantity)?;
    let execute_price = round_cash(validate_price(execute_price)?);
    let quote = quote(ctx, ticker).await?;
    open_portfolio(ctx, user_id).await?;

    let order = LimitOrder {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        ticker: quote.ticker,
        side,
        quantity,
        execute_price,
        created_at: Utc::now(),
        notified: false,
    };
    ctx.tasks.insert_task(&Task::LimitOrder(order.clone())).await?;
    info!(
        "Placed limit {} of {} {} @ ${} for {}",
        side, quantity, order.ticker, execute_price, user_id
    );
    Ok(order)
}

pub async fn list_orders(ctx: &AppContext, user_id: &str) -> Result<Vec<LimitOrder>, CommandError> {
    let mut orders: Vec<LimitOrder> = ctx
        .tasks
        .list_for_user(user_id)
        .await?
        .into_iter()
        .filter_map(|task| match task {
            Task::LimitOrder(order) => Some(order),
            _ => None,
        })
        .collect();
    orders.sort_by_key(|o| o.created_at);
    Ok(orders)
}

pub async fn cancel_order(ctx: &AppContext, user_id: &str, id: &str) -> Result<(), CommandError> {
    let _guard = ctx.locks.lock(user_id).await;
    match ctx.tasks.get_task(id).await? {
        Some(Task::LimitOrder(order)) if order.user_id == user_id => {
            ctx.tasks.delete_task(id).await?;
            info!("Cancelled limit order {} for {}", id, user_id);
            Ok(())
        }
        _ => Err(CommandError::NotFound("limit order")),
    }
}

/// Adds an alert; its direction is inferred from where the target sits
/// relative to the current price.
pub async fn add_price_alert(
    ctx: &AppContext,
    user_id: &str,
    ticker: &str,
    target_price: f64,
) -> Result<PriceAlert, CommandError> {
    let target_price = validate_price(target_price)?;
    let quote = quote(ctx, ticker).await?;
    let direction = if target_price > quote.price {
        Direction::Above
    } else if target_price < quote.price {
        Direction::Below
    } else {
        return Err(CommandError::TargetEqualsPrice);
    };

    let existing = list_price_alerts(ctx, user_id)
        .await?
        .remove(&quote.ticker)
        .unwrap_or_default();
    if existing.len() >= MAX_ALERTS_PER_TICKER {
        return Err(CommandError::TooManyAlerts(MAX_ALERTS_PER_TICKER));
    }

    let alert = PriceAlert {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        ticker: quote.ticker,
        target_price: round_to(target_price, TARGET_PRECISION),
        direction,
    };
    ctx.tasks.insert_task(&Task::PriceAlert(alert.clone())).await?;
    info!(
        "{} will be notified when {} goes {} ${}",
        user_id, alert.ticker, alert.direction, alert.target_price
    );
    Ok(alert)
}

/// The user's alerts grouped by ticker.
pub async fn list_price_alerts(
    ctx: &AppContext,
    user_id: &str,
) -> Result<BTreeMap<String, Vec<PriceAlert>>, CommandError> {
    let mut grouped: BTreeMap<String, Vec<PriceAlert>> = BTreeMap::new();
    for task in ctx.tasks.list_for_user(user_id).await? {
        if let Task::PriceAlert(alert) = task {
            grouped.entry(alert.ticker.clone()).or_default().push(alert);
        }
    }
    Ok(grouped)
}

pub async fn remove_price_alert(ctx: &AppContext, user_id: &str, id: &str) -> Result<(), CommandError> {
    let _guard = ctx.locks.lock(user_id).await;
    match ctx.tasks.get_task(id).await? {
        Some(Task::PriceAlert(alert)) if alert.user_id == user_id => {
            ctx.tasks.delete_task(id).await?;
            info!("Removed price target {} for {}", id, user_id);
            Ok(())
        }
        _ => Err(CommandError::NotFound("price alert")),
    }
}

pub async fn trade_history(
    ctx: &AppContext,
    user_id: &str,
    limit: i32,
) -> Result<Vec<TradeRecord>, CommandError> {
    Ok(ctx.trades.trade_history(user_id, limit).await?)
}

/// Values the portfolio at current prices. Quotes are fetched concurrently.
pub async fn portfolio_summary(ctx: &AppContext, user_id: &str) -> Result<PortfolioSummary, CommandError> {
    let portfolio = open_portfolio(ctx, user_id).await?;
    let fetches = portfolio
        .stocks
        .iter()
        .map(|stock| ctx.quotes.fetch_price(&stock.symbol));
    let mut prices = HashMap::new();
    for (stock, result) in portfolio.stocks.iter().zip(join_all(fetches).await) {
        match result {
            Ok(quote) => {
                prices.insert(stock.symbol.clone(), quote.price);
            }
            Err(e) => warn!("No quote for {} in {}'s portfolio: {}", stock.symbol, user_id, e),
        }
    }
    Ok(summarize(&portfolio, &prices))
}

pub fn summarize(portfolio: &Portfolio, prices: &HashMap<String, f64>) -> PortfolioSummary {
    let mut holdings: Vec<HoldingSummary> = portfolio
        .stocks
        .iter()
        .map(|stock| {
            let (price, price_stale) = match prices.get(&stock.symbol) {
                Some(price) => (*price, false),
                None => (stock.buy_price, true),
            };
            HoldingSummary {
                ticker: stock.symbol.clone(),
                quantity: stock.quantity,
                buy_price: stock.buy_price,
                price,
                price_stale,
                total_value: round_cash(price * stock.quantity as f64),
                change_dollar: round_cash((price - stock.buy_price) * stock.quantity as f64),
                change_pct: pct(price - stock.buy_price, stock.buy_price),
                invested_weight: 0.0,
                total_weight: 0.0,
            }
        })
        .collect();
    holdings.sort_by(|a, b| a.ticker.cmp(&b.ticker));

    let total_value = round_cash(holdings.iter().map(|h| h.total_value).sum());
    let net_worth = round_cash(portfolio.balance + total_value);
    for holding in holdings.iter_mut() {
        holding.invested_weight = pct(holding.total_value, total_value);
        holding.total_weight = pct(holding.total_value, net_worth);
    }
    let cost_basis: f64 = portfolio
        .stocks
        .iter()
        .map(|s| s.buy_price * s.quantity as f64)
        .sum();
    let change_dollar = round_cash(total_value - cost_basis);

    PortfolioSummary {
        user_id: portfolio.user_id.clone(),
        cash: portfolio.balance,
        total_value,
        net_worth,
        cash_pct: pct(portfolio.balance, net_worth),
        change_dollar,
        change_pct: pct(change_dollar, cost_basis),
        holdings_count: portfolio.stocks.len(),
        shares_count: portfolio.stocks.iter().map(|s| s.quantity).sum(),
        holdings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::harness;
    use crate::db::{PortfolioStore, TradeLog};
    use crate::models::Stock;

    #[tokio::test]
    async fn first_use_creates_portfolio() {
        let h = harness();
        let portfolio = open_portfolio(&h.ctx, "u1").await.unwrap();
        assert_eq!(portfolio.balance, 100_000.0);
        assert!(h.store.get_portfolio("u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn market_buy_and_sell() {
        let h = harness();
        h.quotes.set("KO", 63.26);

        let buy = market_order(&h.ctx, "u1", Side::Buy, "ko", 10).await.unwrap();
        assert_eq!(buy.ticker, "KO");
        assert_eq!(buy.total, 632.6);
        let sell = market_order(&h.ctx, "u1", Side::Sell, "KO", 4).await.unwrap();
        assert_eq!(sell.origin, TradeOrigin::Market);

        let portfolio = h.store.get_portfolio("u1").await.unwrap().unwrap();
        assert_eq!(portfolio.holding("KO").unwrap().quantity, 6);
        assert_eq!(portfolio.balance, round_cash(100_000.0 - 632.6 + 253.04));
        assert_eq!(h.store.trade_history("u1", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn market_fill_uses_quoted_price() {
        let h = harness();
        h.quotes.set("DOGE-USD", 0.12345);
        let trade = market_order(&h.ctx, "u1", Side::Buy, "DOGE-USD", 1_000).await.unwrap();
        assert_eq!(trade.price, 0.12345);
        assert_eq!(trade.total, 123.45);
    }

    #[tokio::test]
    async fn market_orders_validate() {
        let h = harness();
        h.quotes.set("KO", 63.26);
        h.quotes.set("BRK-A", 600_000.0);

        assert!(matches!(
            market_order(&h.ctx, "u1", Side::Buy, "KO", 0).await,
            Err(CommandError::InvalidQuantity)
        ));
        assert!(matches!(
            market_order(&h.ctx, "u1", Side::Buy, "NOPE", 1).await,
            Err(CommandError::InvalidTicker(_))
        ));
        assert!(matches!(
            market_order(&h.ctx, "u1", Side::Buy, "BRK-A", 1).await,
            Err(CommandError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            market_order(&h.ctx, "u1", Side::Sell, "KO", 1).await,
            Err(CommandError::NotHeld(_))
        ));
    }

    #[tokio::test]
    async fn limit_orders_are_queued_and_cancellable() {
        let h = harness();
        h.quotes.set("AAPL", 150.0);

        let request = OrderRequest {
            ticker: "aapl".to_string(),
            side: Side::Buy,
            quantity: 2,
            order_type: OrderType::Limit,
            execute_price: Some(140.0),
        };
        let order = match place_order(&h.ctx, "u1", request).await.unwrap() {
            OrderPlaced::Pending(order) => order,
            other => panic!("expected pending order, got {:?}", other),
        };
        assert_eq!(order.ticker, "AAPL");
        assert_eq!(list_orders(&h.ctx, "u1").await.unwrap(), vec![order.clone()]);

        assert!(matches!(
            cancel_order(&h.ctx, "someone-else", &order.id).await,
            Err(CommandError::NotFound(_))
        ));
        cancel_order(&h.ctx, "u1", &order.id).await.unwrap();
        assert!(list_orders(&h.ctx, "u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn limit_order_needs_price() {
        let h = harness();
        h.quotes.set("AAPL", 150.0);
        let request = OrderRequest {
            ticker: "AAPL".to_string(),
            side: Side::Sell,
            quantity: 1,
            order_type: OrderType::Limit,
            execute_price: None,
        };
        assert!(matches!(
            place_order(&h.ctx, "u1", request).await,
            Err(CommandError::MissingExecutePrice)
        ));
    }

    #[tokio::test]
    async fn alerts_infer_direction_and_cap_per_ticker() {
        let h = harness();
        h.quotes.set("TSLA", 800.0);

        let above = add_price_alert(&h.ctx, "u1", "tsla", 800.012345678).await.unwrap();
        assert_eq!(above.direction, Direction::Above);
        assert_eq!(above.target_price, 800.01235);
        let below = add_price_alert(&h.ctx, "u1", "TSLA", 700.0).await.unwrap();
        assert_eq!(below.direction, Direction::Below);

        assert!(matches!(
            add_price_alert(&h.ctx, "u1", "TSLA", 800.0).await,
            Err(CommandError::TargetEqualsPrice)
        ));

        add_price_alert(&h.ctx, "u1", "TSLA", 900.0).await.unwrap();
        assert!(matches!(
            add_price_alert(&h.ctx, "u1", "TSLA", 950.0).await,
            Err(CommandError::TooManyAlerts(3))
        ));
        // The cap is per user.
        add_price_alert(&h.ctx, "u2", "TSLA", 950.0).await.unwrap();

        let grouped = list_price_alerts(&h.ctx, "u1").await.unwrap();
        assert_eq!(grouped["TSLA"].len(), 3);

        remove_price_alert(&h.ctx, "u1", &below.id).await.unwrap();
        assert!(matches!(
            remove_price_alert(&h.ctx, "u1", &below.id).await,
            Err(CommandError::NotFound(_))
        ));
    }

    #[test]
    fn summarizes_holdings() {
        let mut portfolio = Portfolio::new("u1", 1_000.0);
        portfolio.stocks.push(Stock {
            symbol: "MSFT".to_string(),
            quantity: 10,
            buy_price: 100.0,
        });
        portfolio.stocks.push(Stock {
            symbol: "AAPL".to_string(),
            quantity: 10,
            buy_price: 50.0,
        });
        let prices = HashMap::from([("MSFT".to_string(), 150.0)]);

        let summary = summarize(&portfolio, &prices);
        assert_eq!(summary.total_value, 2_000.0);
        assert_eq!(summary.net_worth, 3_000.0);
        assert_eq!(summary.change_dollar, 500.0);
        assert_eq!(summary.change_pct, 33.33);
        assert_eq!(summary.cash_pct, 33.33);
        assert_eq!(summary.shares_count, 20);

        let aapl = &summary.holdings[0];
        assert_eq!(aapl.ticker, "AAPL");
        assert!(aapl.price_stale);
        assert_eq!(aapl.invested_weight, 25.0);
        let msft = &summary.holdings[1];
        assert_eq!(msft.change_pct, 50.0);
        assert_eq!(msft.total_weight, 50.0);
    }
}
