use crate::db::{PortfolioStore, TaskStore, TradeLog};
use crate::locks::UserLocks;
use crate::notify::Notifier;
use crate::quotes::QuoteSource;
use std::sync::Arc;

/// Collaborators shared by the HTTP handlers and the evaluation engine.
#[derive(Clone)]
pub struct AppContext {
    pub quotes: Arc<dyn QuoteSource>,
    pub portfolios: Arc<dyn PortfolioStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub trades: Arc<dyn TradeLog>,
    pub notifier: Arc<dyn Notifier>,
    pub locks: UserLocks,
    pub starting_balance: f64,
}
