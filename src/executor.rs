use crate::context::AppContext;
use crate::error::StoreError;
use crate::models::{LimitOrder, PriceAlert, Shortfall, Side, Task, TradeOrigin, TradeRecord};
use crate::notify::{Delivery, Notification};
use log::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    /// Owner notified and the alert removed.
    Delivered,
    /// Owner unreachable; the alert stays and fires again next cycle.
    Undelivered,
    /// The alert was removed before it could fire.
    Vanished,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    Filled(TradeRecord),
    /// Shortfall; the order stays pending. `notified_now` is set on the one
    /// cycle that sent the failure notice.
    Deferred { notified_now: bool },
    /// Stale order removed without notice.
    Discarded,
    /// The order was cancelled or already executed.
    Vanished,
}

/// Notifies the owner of a reached price target. The owner's lock is held
/// until the alert is deleted, so a concurrent removal either wins outright
/// or waits for the notification.
pub async fn execute_alert(
    ctx: &AppContext,
    alert: &PriceAlert,
    price: f64,
) -> Result<AlertOutcome, StoreError> {
    let _guard = ctx.locks.lock(&alert.user_id).await;
    if ctx.tasks.get_task(&alert.id).await?.is_none() {
        return Ok(AlertOutcome::Vanished);
    }

    let notification = Notification::target_reached(alert, price);
    match ctx.notifier.notify(&alert.user_id, &notification).await {
        Delivery::Delivered => {
            ctx.tasks.delete_task(&alert.id).await?;
            info!(
                "Price target {} {} ${} reached for {} at ${}",
                alert.ticker, alert.direction, alert.target_price, alert.user_id, price
            );
            Ok(AlertOutcome::Delivered)
        }
        Delivery::Unreachable => {
            warn!(
                "Unable to notify {} about price target on {} for ${}; keeping it",
                alert.user_id, alert.ticker, alert.target_price
            );
            Ok(AlertOutcome::Undelivered)
        }
    }
}

/// Applies a triggered limit order to its owner's portfolio.
///
/// The order and portfolio are both re-read under the owner's lock, so a
/// cancelled or already-executed order is never applied. The portfolio is
/// written before the order is deleted; an error from either aborts the step
/// and leaves the order for the next cycle.
pub async fn execute_order(
    ctx: &AppContext,
    order: &LimitOrder,
    price: f64,
) -> Result<OrderOutcome, StoreError> {
    let guard = ctx.locks.lock(&order.user_id).await;

    let order = match ctx.tasks.get_task(&order.id).await? {
        Some(Task::LimitOrder(current)) => current,
        _ => return Ok(OrderOutcome::Vanished),
    };

    let mut portfolio = match ctx.portfolios.get_portfolio(&order.user_id).await? {
        Some(portfolio) => portfolio,
        None => return discard(ctx, &order, "owner has no portfolio").await,
    };

    let applied = match order.side {
        Side::Buy => portfolio.apply_buy(&order.ticker, order.quantity, price),
        Side::Sell => portfolio.apply_sell(&order.ticker, order.quantity, price),
    };
    let total = match applied {
        Ok(total) => total,
        Err(Shortfall::NotHeld) => return discard(ctx, &order, "holding no longer exists").await,
        Err(Shortfall::Funds { needed, available }) => {
            let notice = Notification::insufficient_funds(&order, needed, available);
            return defer(ctx, &order, notice).await;
        }
        Err(Shortfall::Shares { held, .. }) => {
            let notice = Notification::insufficient_shares(&order, held);
            return defer(ctx, &order, notice).await;
        }
    };

    ctx.portfolios.put_portfolio(&portfolio).await?;
    let trade = TradeRecord::new(
        &order.user_id,
        order.side,
        &order.ticker,
        order.quantity,
        price,
        total,
        TradeOrigin::Limit,
    );
    if let Err(e) = ctx.trades.log_trade(&trade).await {
        error!("Failed to log trade {} for {}: {}", trade.id, trade.user_id, e);
    }
    ctx.tasks.delete_task(&order.id).await?;
    drop(guard);

    info!(
        "Filled limit {} of {} {} @ ${} for {}",
        order.side, order.quantity, order.ticker, price, order.user_id
    );
    ctx.notifier
        .notify(&order.user_id, &Notification::filled(&trade))
        .await;
    Ok(OrderOutcome::Filled(trade))
}

async fn discard(
    ctx: &AppContext,
    order: &LimitOrder,
    reason: &str,
) -> Result<OrderOutcome, StoreError> {
    ctx.tasks.delete_task(&order.id).await?;
    info!(
        "Discarded stale limit {} {} for {}: {}",
        order.side, order.ticker, order.user_id, reason
    );
    Ok(OrderOutcome::Discarded)
}

async fn defer(
    ctx: &AppContext,
    order: &LimitOrder,
    notification: Notification,
) -> Result<OrderOutcome, StoreError> {
    if order.notified {
        debug!("Limit order {} still pending: {}", order.id, notification);
        return Ok(OrderOutcome::Deferred {
            notified_now: false,
        });
    }

    // The flag is set whether or not delivery succeeded: one attempt per order.
    if ctx.notifier.notify(&order.user_id, &notification).await == Delivery::Unreachable {
        warn!("Could not deliver shortfall notice for order {}", order.id);
    }
    ctx.tasks.set_notified(&order.id, true).await?;
    info!("Limit order {} deferred: {}", order.id, notification);
    Ok(OrderOutcome::Deferred { notified_now: true })
}
