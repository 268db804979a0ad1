use crate::models::{Direction, LimitOrder, PriceAlert, Side, TradeRecord};
use async_trait::async_trait;
use log::{error, info, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::fmt;

const DISCORD_API: &str = "https://discord.com/api/v10";

/// Outcome of a delivery attempt. An unreachable user is an expected result,
/// not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Unreachable,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    PriceTargetReached {
        ticker: String,
        target_price: f64,
        direction: Direction,
        price: f64,
    },
    OrderFilled {
        side: Side,
        ticker: String,
        quantity: u64,
        price: f64,
        total: f64,
    },
    InsufficientFunds {
        ticker: String,
        quantity: u64,
        needed: f64,
        available: f64,
    },
    InsufficientShares {
        ticker: String,
        quantity: u64,
        held: u64,
    },
}

impl Notification {
    pub fn target_reached(alert: &PriceAlert, price: f64) -> Self {
        Notification::PriceTargetReached {
            ticker: alert.ticker.clone(),
            target_price: alert.target_price,
            direction: alert.direction,
            price,
        }
    }

    pub fn filled(trade: &TradeRecord) -> Self {
        Notification::OrderFilled {
            side: trade.side,
            ticker: trade.ticker.clone(),
            quantity: trade.quantity,
            price: trade.price,
            total: trade.total,
        }
    }

    pub fn insufficient_funds(order: &LimitOrder, needed: f64, available: f64) -> Self {
        Notification::InsufficientFunds {
            ticker: order.ticker.clone(),
            quantity: order.quantity,
            needed,
            available,
        }
    }

    pub fn insufficient_shares(order: &LimitOrder, held: u64) -> Self {
        Notification::InsufficientShares {
            ticker: order.ticker.clone(),
            quantity: order.quantity,
            held,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::PriceTargetReached {
                ticker,
                target_price,
                direction,
                price,
            } => write!(
                f,
                ":dart: Price Target Reached: `{}` went {} `${}` (now `${}`)",
                ticker,
                direction.to_string().to_lowercase(),
                target_price,
                price
            ),
            Notification::OrderFilled {
                side,
                ticker,
                quantity,
                price,
                total,
            } => write!(
                f,
                ":white_check_mark: Limit {} filled: {} `{}` @ `${}` (total `${}`)",
                side, quantity, ticker, price, total
            ),
            Notification::InsufficientFunds {
                ticker,
                quantity,
                needed,
                available,
            } => write!(
                f,
                ":x: Your limit BUY of {} `{}` could not execute: it costs `${}` but you have `${}`. It stays open until you can afford it.",
                quantity, ticker, needed, available
            ),
            Notification::InsufficientShares {
                ticker,
                quantity,
                held,
            } => write!(
                f,
                ":x: Your limit SELL of {} `{}` could not execute: you only have {} shares. It stays open until you do.",
                quantity, ticker, held
            ),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, notification: &Notification) -> Delivery;
}

/// Sends notifications as Discord direct messages through the REST API.
pub struct DiscordNotifier {
    client: Client,
    token: String,
}

#[derive(Deserialize)]
struct DmChannel {
    id: String,
}

impl DiscordNotifier {
    pub fn new(client: Client, token: &str) -> Self {
        DiscordNotifier {
            client,
            token: token.to_string(),
        }
    }

    async fn send_dm(&self, user_id: &str, content: &str) -> Result<Delivery, reqwest::Error> {
        let auth = format!("Bot {}", self.token);
        let response = self
            .client
            .post(format!("{}/users/@me/channels", DISCORD_API))
            .header("Authorization", &auth)
            .json(&json!({ "recipient_id": user_id }))
            .send()
            .await?;
        if is_unreachable(response.status()) {
            return Ok(Delivery::Unreachable);
        }
        let channel = response.error_for_status()?.json::<DmChannel>().await?;

        let response = self
            .client
            .post(format!("{}/channels/{}/messages", DISCORD_API, channel.id))
            .header("Authorization", &auth)
            .json(&json!({ "content": content }))
            .send()
            .await?;
        if is_unreachable(response.status()) {
            return Ok(Delivery::Unreachable);
        }
        response.error_for_status()?;
        Ok(Delivery::Delivered)
    }
}

fn is_unreachable(status: StatusCode) -> bool {
    status == StatusCode::FORBIDDEN || status == StatusCode::NOT_FOUND
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, user_id: &str, notification: &Notification) -> Delivery {
        match self.send_dm(user_id, &notification.to_string()).await {
            Ok(Delivery::Unreachable) => {
                warn!("Unable to notify {} (DMs closed or unknown user)", user_id);
                Delivery::Unreachable
            }
            Ok(delivery) => delivery,
            Err(e) => {
                error!("Failed to notify {}: {}", user_id, e);
                Delivery::Unreachable
            }
        }
    }
}

/// Used when no bot token is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: &str, notification: &Notification) -> Delivery {
        info!("Notification for {}: {}", user_id, notification);
        Delivery::Delivered
    }
}
