use crate::error::QuoteError;
use crate::models::{normalize_ticker, Quote};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;

const ALPHAVANTAGE_URL: &str = "https://www.alphavantage.co/query";
const CRYPTO_SUFFIX: &str = "-USD";

#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_price(&self, ticker: &str) -> Result<Quote, QuoteError>;
}

#[derive(Deserialize)]
struct GlobalQuote {
    #[serde(rename = "05. price")]
    price: Option<String>,
}

#[derive(Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    quote: Option<GlobalQuote>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Deserialize)]
struct ExchangeRate {
    #[serde(rename = "5. Exchange Rate")]
    rate: Option<String>,
}

#[derive(Deserialize)]
struct ExchangeRateResponse {
    #[serde(rename = "Realtime Currency Exchange Rate")]
    rate: Option<ExchangeRate>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

/// Validates a raw provider price into a quote snapshot.
pub fn make_quote(ticker: &str, raw: &str) -> Result<Quote, QuoteError> {
    let price: f64 = raw
        .trim()
        .parse()
        .map_err(|_| QuoteError::NotFound(ticker.to_string()))?;
    if !price.is_finite() || price <= 0.0 {
        return Err(QuoteError::InvalidPrice {
            ticker: ticker.to_string(),
            price,
        });
    }
    Ok(Quote {
        ticker: ticker.to_string(),
        price,
        fetched_at: Utc::now(),
    })
}

/// `BTC` becomes `BTC-USD` and `BTC-USD` becomes `BTC`.
pub fn alternate_ticker(ticker: &str) -> String {
    match ticker.strip_suffix(CRYPTO_SUFFIX) {
        Some(base) => base.to_string(),
        None => format!("{}{}", ticker, CRYPTO_SUFFIX),
    }
}

fn throttled(note: Option<String>, information: Option<String>) -> Option<QuoteError> {
    note.or(information).map(QuoteError::Unavailable)
}

fn parse_global_quote(ticker: &str, body: GlobalQuoteResponse) -> Result<Quote, QuoteError> {
    if let Some(err) = throttled(body.note, body.information) {
        return Err(err);
    }
    match body.quote.and_then(|q| q.price) {
        Some(raw) => make_quote(ticker, &raw),
        None => Err(QuoteError::NotFound(ticker.to_string())),
    }
}

fn parse_exchange_rate(ticker: &str, body: ExchangeRateResponse) -> Result<Quote, QuoteError> {
    if let Some(err) = throttled(body.note, body.information) {
        return Err(err);
    }
    match body.rate.and_then(|r| r.rate) {
        Some(raw) => make_quote(ticker, &raw),
        None => Err(QuoteError::NotFound(ticker.to_string())),
    }
}

pub struct AlphaVantage {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AlphaVantage {
    pub fn new(client: Client, api_key: &str) -> Self {
        AlphaVantage {
            client,
            api_key: api_key.to_string(),
            base_url: ALPHAVANTAGE_URL.to_string(),
        }
    }

    async fn fetch_exact(&self, ticker: &str) -> Result<Quote, QuoteError> {
        match ticker.strip_suffix(CRYPTO_SUFFIX) {
            Some(base) => {
                let body = self
                    .client
                    .get(&self.base_url)
                    .query(&[
                        ("function", "CURRENCY_EXCHANGE_RATE"),
                        ("from_currency", base),
                        ("to_currency", "USD"),
                        ("apikey", self.api_key.as_str()),
                    ])
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<ExchangeRateResponse>()
                    .await?;
                parse_exchange_rate(ticker, body)
            }
            None => {
                let body = self
                    .client
                    .get(&self.base_url)
                    .query(&[
                        ("function", "GLOBAL_QUOTE"),
                        ("symbol", ticker),
                        ("apikey", self.api_key.as_str()),
                    ])
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<GlobalQuoteResponse>()
                    .await?;
                parse_global_quote(ticker, body)
            }
        }
    }
}

#[async_trait]
impl QuoteSource for AlphaVantage {
    async fn fetch_price(&self, ticker: &str) -> Result<Quote, QuoteError> {
        let ticker = normalize_ticker(ticker);
        match self.fetch_exact(&ticker).await {
            Err(QuoteError::NotFound(_)) => {
                let alternate = alternate_ticker(&ticker);
                debug!("{} not found, retrying as {}", ticker, alternate);
                self.fetch_exact(&alternate).await.map_err(|e| match e {
                    QuoteError::NotFound(_) => QuoteError::NotFound(ticker.clone()),
                    other => other,
                })
            }
            Err(QuoteError::Unavailable(message)) => {
                warn!("Quote provider throttled request for {}: {}", ticker, message);
                Err(QuoteError::Unavailable(message))
            }
            other => other,
        }
    }
}
