//! In-process stores, used by the test suites and for running the service
//! without a database.

use crate::db::{PortfolioStore, TaskStore, TradeLog};
use crate::error::StoreError;
use crate::models::{Portfolio, Task, TaskKind, TradeRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    portfolios: Mutex<HashMap<String, Portfolio>>,
    // Insertion order is kept so scans are deterministic.
    tasks: Mutex<Vec<Task>>,
    trades: Mutex<Vec<TradeRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Poisoned
}

#[async_trait]
impl PortfolioStore for MemoryStore {
    async fn get_portfolio(&self, user_id: &str) -> Result<Option<Portfolio>, StoreError> {
        let portfolios = self.portfolios.lock().map_err(poisoned)?;
        Ok(portfolios.get(user_id).cloned())
    }

    async fn put_portfolio(&self, portfolio: &Portfolio) -> Result<(), StoreError> {
        let mut portfolios = self.portfolios.lock().map_err(poisoned)?;
        portfolios.insert(portfolio.user_id.clone(), portfolio.clone());
        Ok(())
    }

    async fn delete_portfolio(&self, user_id: &str) -> Result<(), StoreError> {
        let mut portfolios = self.portfolios.lock().map_err(poisoned)?;
        portfolios.remove(user_id);
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.lock().map_err(poisoned)?;
        match tasks.iter_mut().find(|t| t.id() == task.id()) {
            Some(existing) => *existing = task.clone(),
            None => tasks.push(task.clone()),
        }
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let tasks = self.tasks.lock().map_err(poisoned)?;
        Ok(tasks.iter().find(|t| t.id() == id).cloned())
    }

    async fn list_pending(&self, kind: TaskKind) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.lock().map_err(poisoned)?;
        Ok(tasks.iter().filter(|t| t.kind() == kind).cloned().collect())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.lock().map_err(poisoned)?;
        Ok(tasks
            .iter()
            .filter(|t| t.user_id() == user_id)
            .cloned()
            .collect())
    }

    async fn delete_task(&self, id: &str) -> Result<(), StoreError> {
        let mut tasks = self.tasks.lock().map_err(poisoned)?;
        tasks.retain(|t| t.id() != id);
        Ok(())
    }

    async fn set_notified(&self, id: &str, notified: bool) -> Result<(), StoreError> {
        let mut tasks = self.tasks.lock().map_err(poisoned)?;
        for task in tasks.iter_mut() {
            if let Task::LimitOrder(order) = task {
                if order.id == id {
                    order.notified = notified;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TradeLog for MemoryStore {
    async fn log_trade(&self, trade: &TradeRecord) -> Result<(), StoreError> {
        let mut trades = self.trades.lock().map_err(poisoned)?;
        trades.push(trade.clone());
        Ok(())
    }

    async fn trade_history(&self, user_id: &str, limit: i32) -> Result<Vec<TradeRecord>, StoreError> {
        let trades = self.trades.lock().map_err(poisoned)?;
        Ok(trades
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
