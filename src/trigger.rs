use crate::models::{Direction, LimitOrder, PriceAlert, Side};

/// Alerts fire strictly past their target; a price equal to the target never fires.
pub fn alert_triggered(alert: &PriceAlert, price: f64) -> bool {
    match alert.direction {
        Direction::Above => price > alert.target_price,
        Direction::Below => price < alert.target_price,
    }
}

/// Orders fill at their execute price or better.
pub fn order_triggered(order: &LimitOrder, price: f64) -> bool {
    match order.side {
        Side::Buy => price <= order.execute_price,
        Side::Sell => price >= order.execute_price,
    }
}
