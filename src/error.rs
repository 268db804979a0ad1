use std::fmt;
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("query failed: {0}")]
    Query(#[from] scylla::transport::errors::QueryError),

    #[error("could not connect to database: {0}")]
    Connect(#[from] scylla::transport::errors::NewSessionError),

    #[error("malformed document: {0}")]
    Document(#[from] serde_json::Error),

    #[error("unexpected row shape in {0}")]
    RowShape(&'static str),

    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
pub enum QuoteError {
    #[error("could not find ticker {0}")]
    NotFound(String),

    #[error("invalid price {price} for {ticker}")]
    InvalidPrice { ticker: String, price: f64 },

    #[error("quote provider unavailable: {0}")]
    Unavailable(String),

    #[error("quote provider request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Failures of user-facing trading commands.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("quantity must be a positive whole number")]
    InvalidQuantity,

    #[error("price must be a positive number")]
    InvalidPrice,

    #[error("a limit order needs an execute_price")]
    MissingExecutePrice,

    #[error("could not find a quote with ticker {0}")]
    InvalidTicker(String),

    #[error("you don't have enough money to place this order (needs ${needed}, have ${available})")]
    InsufficientFunds { needed: f64, available: f64 },

    #[error("you don't have {requested} shares of {ticker}")]
    InsufficientShares { ticker: String, requested: u64 },

    #[error("you do not own {0}")]
    NotHeld(String),

    #[error("the target price cannot be the same as the current price")]
    TargetEqualsPrice,

    #[error("you cannot set more than {0} price targets for a quote")]
    TooManyAlerts(usize),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Quote(QuoteError),
}

impl From<QuoteError> for CommandError {
    fn from(err: QuoteError) -> Self {
        match err {
            QuoteError::NotFound(ticker) => CommandError::InvalidTicker(ticker),
            QuoteError::InvalidPrice { ticker, .. } => CommandError::InvalidTicker(ticker),
            other => CommandError::Quote(other),
        }
    }
}

impl CommandError {
    pub fn status(&self) -> StatusCode {
        match self {
            CommandError::NotFound(_) => StatusCode::NOT_FOUND,
            CommandError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CommandError::Quote(_) => StatusCode::BAD_GATEWAY,
            CommandError::InsufficientFunds { .. }
            | CommandError::InsufficientShares { .. }
            | CommandError::TooManyAlerts(_) => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug)]
pub struct CustomError {
    pub status: StatusCode,
    pub message: String,
}

impl fmt::Display for CustomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CustomError {}

impl Reject for CustomError {}

impl From<CommandError> for CustomError {
    fn from(err: CommandError) -> Self {
        CustomError {
            status: err.status(),
            message: err.to_string(),
        }
    }
}
