use crate::error::StoreError;
use crate::models::{Portfolio, Task, TaskKind, TradeRecord};
use async_trait::async_trait;
use log::{error, info};
use scylla::{frame::response::result::Row, query::Query, Session, SessionBuilder};

/// Per-owner portfolio documents, read and replaced wholesale.
#[async_trait]
pub trait PortfolioStore: Send + Sync {
    async fn get_portfolio(&self, user_id: &str) -> Result<Option<Portfolio>, StoreError>;
    async fn put_portfolio(&self, portfolio: &Portfolio) -> Result<(), StoreError>;
    async fn delete_portfolio(&self, user_id: &str) -> Result<(), StoreError>;
}

/// Pending price alerts and limit orders.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: &Task) -> Result<(), StoreError>;
    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError>;
    async fn list_pending(&self, kind: TaskKind) -> Result<Vec<Task>, StoreError>;
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Task>, StoreError>;
    async fn delete_task(&self, id: &str) -> Result<(), StoreError>;
    /// Only limit orders carry the flag; other tasks are left untouched.
    async fn set_notified(&self, id: &str, notified: bool) -> Result<(), StoreError>;
}

/// Append-only trade history.
#[async_trait]
pub trait TradeLog: Send + Sync {
    async fn log_trade(&self, trade: &TradeRecord) -> Result<(), StoreError>;
    /// Newest first.
    async fn trade_history(&self, user_id: &str, limit: i32) -> Result<Vec<TradeRecord>, StoreError>;
}

pub async fn init(known_node: &str) -> Result<Session, StoreError> {
    let session = SessionBuilder::new().known_node(known_node).build().await?;

    session.query("CREATE KEYSPACE IF NOT EXISTS paper_trader WITH REPLICATION = {'class': 'SimpleStrategy', 'replication_factor': 1}", &[]).await?;
    session.query("CREATE TABLE IF NOT EXISTS paper_trader.portfolios (user_id TEXT PRIMARY KEY, doc TEXT)", &[]).await?;
    session.query("CREATE TABLE IF NOT EXISTS paper_trader.tasks (id TEXT PRIMARY KEY, kind TEXT, user_id TEXT, doc TEXT)", &[]).await?;
    session.query("CREATE INDEX IF NOT EXISTS tasks_by_kind ON paper_trader.tasks (kind)", &[]).await?;
    session.query("CREATE INDEX IF NOT EXISTS tasks_by_user ON paper_trader.tasks (user_id)", &[]).await?;
    session.query("CREATE TABLE IF NOT EXISTS paper_trader.trades (user_id TEXT, executed_at TIMESTAMP, id TEXT, doc TEXT, PRIMARY KEY (user_id, executed_at, id)) WITH CLUSTERING ORDER BY (executed_at DESC, id ASC)", &[]).await?;

    info!("Successfully connected to ScyllaDB at {}.", known_node);
    Ok(session)
}

/// ScyllaDB-backed implementation of every store. Documents are kept as JSON
/// text next to the columns they are looked up by.
pub struct ScyllaStore {
    session: Session,
}

impl ScyllaStore {
    pub fn new(session: Session) -> Self {
        ScyllaStore { session }
    }

    async fn query_docs(
        &self,
        query: Query,
        values: impl scylla::frame::value::ValueList + Send,
        table: &'static str,
    ) -> Result<Vec<String>, StoreError> {
        let rows = self.session.query(query, values).await?.rows.unwrap_or_default();
        rows.into_iter().map(|row| doc_column(row, table)).collect()
    }
}

fn doc_column(row: Row, table: &'static str) -> Result<String, StoreError> {
    row.columns
        .into_iter()
        .next()
        .flatten()
        .and_then(|value| value.as_text().cloned())
        .ok_or(StoreError::RowShape(table))
}

/// Rows that fail to decode are logged and skipped so one bad document does
/// not stall every other task.
fn decode_tasks(docs: Vec<String>) -> Vec<Task> {
    docs.into_iter()
        .filter_map(|doc| match serde_json::from_str::<Task>(&doc) {
            Ok(task) => Some(task),
            Err(e) => {
                error!("Skipping malformed task document: {}", e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl PortfolioStore for ScyllaStore {
    async fn get_portfolio(&self, user_id: &str) -> Result<Option<Portfolio>, StoreError> {
        let query = Query::new("SELECT doc FROM paper_trader.portfolios WHERE user_id = ?");
        match self.query_docs(query, (user_id,), "portfolios").await?.into_iter().next() {
            Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
            None => Ok(None),
        }
    }

    async fn put_portfolio(&self, portfolio: &Portfolio) -> Result<(), StoreError> {
        let doc = serde_json::to_string(portfolio)?;
        let query = Query::new("INSERT INTO paper_trader.portfolios (user_id, doc) VALUES (?, ?)");
        self.session
            .query(query, (portfolio.user_id.as_str(), doc))
            .await?;
        Ok(())
    }

    async fn delete_portfolio(&self, user_id: &str) -> Result<(), StoreError> {
        let query = Query::new("DELETE FROM paper_trader.portfolios WHERE user_id = ?");
        self.session.query(query, (user_id,)).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for ScyllaStore {
    async fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        let doc = serde_json::to_string(task)?;
        let query = Query::new(
            "INSERT INTO paper_trader.tasks (id, kind, user_id, doc) VALUES (?, ?, ?, ?)",
        );
        self.session
            .query(query, (task.id(), task.kind().as_str(), task.user_id(), doc))
            .await?;
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let query = Query::new("SELECT doc FROM paper_trader.tasks WHERE id = ?");
        match self.query_docs(query, (id,), "tasks").await?.into_iter().next() {
            Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
            None => Ok(None),
        }
    }

    async fn list_pending(&self, kind: TaskKind) -> Result<Vec<Task>, StoreError> {
        let query = Query::new("SELECT doc FROM paper_trader.tasks WHERE kind = ?");
        let docs = self.query_docs(query, (kind.as_str(),), "tasks").await?;
        Ok(decode_tasks(docs))
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Task>, StoreError> {
        let query = Query::new("SELECT doc FROM paper_trader.tasks WHERE user_id = ?");
        let docs = self.query_docs(query, (user_id,), "tasks").await?;
        Ok(decode_tasks(docs))
    }

    async fn delete_task(&self, id: &str) -> Result<(), StoreError> {
        let query = Query::new("DELETE FROM paper_trader.tasks WHERE id = ?");
        self.session.query(query, (id,)).await?;
        Ok(())
    }

    async fn set_notified(&self, id: &str, notified: bool) -> Result<(), StoreError> {
        if let Some(Task::LimitOrder(mut order)) = self.get_task(id).await? {
            order.notified = notified;
            self.insert_task(&Task::LimitOrder(order)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TradeLog for ScyllaStore {
    async fn log_trade(&self, trade: &TradeRecord) -> Result<(), StoreError> {
        let doc = serde_json::to_string(trade)?;
        let query = Query::new(
            "INSERT INTO paper_trader.trades (user_id, executed_at, id, doc) VALUES (?, ?, ?, ?)",
        );
        let timestamp_millis = trade.executed_at.timestamp_millis();
        self.session
            .query(
                query,
                (trade.user_id.as_str(), timestamp_millis, trade.id.as_str(), doc),
            )
            .await?;
        Ok(())
    }

    async fn trade_history(&self, user_id: &str, limit: i32) -> Result<Vec<TradeRecord>, StoreError> {
        let query = Query::new("SELECT doc FROM paper_trader.trades WHERE user_id = ? LIMIT ?");
        let docs = self.query_docs(query, (user_id, limit), "trades").await?;
        let trades = docs
            .iter()
            .map(|doc| serde_json::from_str(doc))
            .collect::<Result<Vec<TradeRecord>, _>>()?;
        info!("Fetched {} trades for user: {}", trades.len(), user_id);
        Ok(trades)
    }
}
