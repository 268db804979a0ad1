use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Decimal places kept on cash balances, prices and averages.
pub const CASH_PRECISION: i32 = 3;
/// Decimal places kept on alert targets.
pub const TARGET_PRECISION: i32 = 5;
/// Maximum number of alerts a user may hold on a single ticker.
pub const MAX_ALERTS_PER_TICKER: usize = 3;

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub fn round_cash(value: f64) -> f64 {
    round_to(value, CASH_PRECISION)
}

pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Above,
    Below,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Above => write!(f, "ABOVE"),
            Direction::Below => write!(f, "BELOW"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Stock {
    pub symbol: String,
    pub quantity: u64,
    pub buy_price: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Portfolio {
    pub user_id: String,
    pub balance: f64,
    pub stocks: Vec<Stock>,
}

/// Why a portfolio could not absorb a trade.
#[derive(Clone, Debug, PartialEq)]
pub enum Shortfall {
    Funds { needed: f64, available: f64 },
    Shares { held: u64, requested: u64 },
    NotHeld,
}

impl Portfolio {
    pub fn new(user_id: &str, balance: f64) -> Self {
        Portfolio {
            user_id: user_id.to_string(),
            balance,
            stocks: Vec::new(),
        }
    }

    pub fn holding(&self, symbol: &str) -> Option<&Stock> {
        self.stocks.iter().find(|s| s.symbol == symbol)
    }

    /// Debits `quantity * price` and merges the shares into the holding,
    /// keeping a weighted-average buy price. Returns the order total.
    pub fn apply_buy(&mut self, symbol: &str, quantity: u64, price: f64) -> Result<f64, Shortfall> {
        let cost = quantity as f64 * price;
        if cost > self.balance {
            return Err(Shortfall::Funds {
                needed: cost,
                available: self.balance,
            });
        }
        let total = round_cash(cost);
        self.balance = round_cash(self.balance - total);
        match self.stocks.iter_mut().find(|s| s.symbol == symbol) {
            Some(stock) => {
                let held = stock.quantity as f64;
                let bought = quantity as f64;
                stock.buy_price = round_cash((stock.buy_price * held + price * bought) / (held + bought));
                stock.quantity += quantity;
            }
            None => self.stocks.push(Stock {
                symbol: symbol.to_string(),
                quantity,
                buy_price: round_cash(price),
            }),
        }
        Ok(total)
    }

    /// Removes shares and credits the proceeds. Returns the order total.
    pub fn apply_sell(&mut self, symbol: &str, quantity: u64, price: f64) -> Result<f64, Shortfall> {
        let index = self
            .stocks
            .iter()
            .position(|s| s.symbol == symbol)
            .ok_or(Shortfall::NotHeld)?;
        let held = self.stocks[index].quantity;
        if held < quantity {
            return Err(Shortfall::Shares {
                held,
                requested: quantity,
            });
        }
        let total = round_cash(quantity as f64 * price);
        self.stocks[index].quantity -= quantity;
        if self.stocks[index].quantity == 0 {
            self.stocks.remove(index);
        }
        self.balance = round_cash(self.balance + total);
        Ok(total)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PriceAlert {
    pub id: String,
    pub user_id: String,
    pub ticker: String,
    pub target_price: f64,
    pub direction: Direction,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LimitOrder {
    pub id: String,
    pub user_id: String,
    pub ticker: String,
    pub side: Side,
    pub quantity: u64,
    pub execute_price: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub notified: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    PriceAlert,
    LimitOrder,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::PriceAlert => "price_alert",
            TaskKind::LimitOrder => "limit_order",
        }
    }
}

/// A pending background task, stored as a tagged document.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "_type", rename_all = "snake_case")]
pub enum Task {
    PriceAlert(PriceAlert),
    LimitOrder(LimitOrder),
}

impl Task {
    pub fn id(&self) -> &str {
        match self {
            Task::PriceAlert(a) => &a.id,
            Task::LimitOrder(o) => &o.id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Task::PriceAlert(a) => &a.user_id,
            Task::LimitOrder(o) => &o.user_id,
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Task::PriceAlert(_) => TaskKind::PriceAlert,
            Task::LimitOrder(_) => TaskKind::LimitOrder,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeOrigin {
    Market,
    Limit,
}

/// Immutable entry in a user's trade history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TradeRecord {
    pub id: String,
    pub user_id: String,
    pub side: Side,
    pub ticker: String,
    pub quantity: u64,
    pub price: f64,
    pub total: f64,
    pub origin: TradeOrigin,
    pub executed_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn new(
        user_id: &str,
        side: Side,
        ticker: &str,
        quantity: u64,
        price: f64,
        total: f64,
        origin: TradeOrigin,
    ) -> Self {
        TradeRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            side,
            ticker: ticker.to_string(),
            quantity,
            price,
            total,
            origin,
            executed_at: Utc::now(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Quote {
    pub ticker: String,
    pub price: f64,
    pub fetched_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_merges_with_weighted_average() {
        let mut portfolio = Portfolio::new("u1", 10_000.0);
        portfolio.apply_buy("AAPL", 10, 100.0).unwrap();
        portfolio.apply_buy("AAPL", 10, 120.0).unwrap();

        let stock = portfolio.holding("AAPL").unwrap();
        assert_eq!(stock.quantity, 20);
        assert_eq!(stock.buy_price, 110.0);
        assert_eq!(portfolio.balance, 7_800.0);
        assert_eq!(portfolio.stocks.len(), 1);
    }

    #[test]
    fn buy_rejects_when_total_exceeds_balance() {
        let mut portfolio = Portfolio::new("u1", 500.0);
        let err = portfolio.apply_buy("MSFT", 2, 300.0).unwrap_err();
        assert_eq!(
            err,
            Shortfall::Funds {
                needed: 600.0,
                available: 500.0
            }
        );
        assert_eq!(portfolio, Portfolio::new("u1", 500.0));
    }

    #[test]
    fn buy_checks_unrounded_cost() {
        let mut portfolio = Portfolio::new("u1", 0.0);
        let err = portfolio.apply_buy("SHIB-USD", 40, 0.00001).unwrap_err();
        assert!(matches!(err, Shortfall::Funds { available, .. } if available == 0.0));
        assert!(portfolio.stocks.is_empty());

        let mut portfolio = Portfolio::new("u1", 0.0004);
        let err = portfolio.apply_buy("SHIB-USD", 41, 0.00001).unwrap_err();
        assert!(matches!(err, Shortfall::Funds { .. }));
    }

    #[test]
    fn sell_removes_holding_at_zero() {
        let mut portfolio = Portfolio::new("u1", 0.0);
        portfolio.stocks.push(Stock {
            symbol: "KO".to_string(),
            quantity: 5,
            buy_price: 60.0,
        });

        assert_eq!(portfolio.apply_sell("KO", 2, 63.26), Ok(126.52));
        assert_eq!(portfolio.holding("KO").unwrap().quantity, 3);
        portfolio.apply_sell("KO", 3, 63.26).unwrap();
        assert!(portfolio.holding("KO").is_none());
        assert_eq!(portfolio.balance, 316.3);
    }

    #[test]
    fn sell_reports_shortfalls() {
        let mut portfolio = Portfolio::new("u1", 0.0);
        assert_eq!(portfolio.apply_sell("KO", 1, 1.0), Err(Shortfall::NotHeld));

        portfolio.stocks.push(Stock {
            symbol: "KO".to_string(),
            quantity: 1,
            buy_price: 60.0,
        });
        assert_eq!(
            portfolio.apply_sell("KO", 4, 1.0),
            Err(Shortfall::Shares {
                held: 1,
                requested: 4
            })
        );
    }

    #[test]
    fn buy_then_sell_restores_balance() {
        let mut portfolio = Portfolio::new("u1", 100_000.0);
        portfolio.apply_buy("DOGE-USD", 7, 0.081886).unwrap();
        portfolio.apply_sell("DOGE-USD", 7, 0.081886).unwrap();
        assert!((portfolio.balance - 100_000.0).abs() < 1e-9);
        assert!(portfolio.stocks.is_empty());
    }

    #[test]
    fn tasks_serialize_with_type_tag() {
        let task = Task::PriceAlert(PriceAlert {
            id: "a1".to_string(),
            user_id: "u1".to_string(),
            ticker: "AAPL".to_string(),
            target_price: 210.98,
            direction: Direction::Above,
        });
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["_type"], "price_alert");
        assert_eq!(json["direction"], "ABOVE");
        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn limit_order_defaults_notified_to_false() {
        let json = r#"{"_type":"limit_order","id":"o1","user_id":"u1","ticker":"AAPL",
            "side":"SELL","quantity":3,"execute_price":150.0,"created_at":"2024-01-01T00:00:00Z"}"#;
        match serde_json::from_str::<Task>(json).unwrap() {
            Task::LimitOrder(order) => assert!(!order.notified),
            other => panic!("unexpected task {:?}", other),
        }
    }

    #[test]
    fn normalizes_and_rounds() {
        assert_eq!(normalize_ticker(" btc-usd "), "BTC-USD");
        assert_eq!(round_to(210.987654, TARGET_PRECISION), 210.98765);
        assert_eq!(round_cash(0.1 + 0.2), 0.3);
    }
}
