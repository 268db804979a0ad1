//! Background evaluation of pending price alerts and limit orders.
//!
//! Each cycle scans every pending alert, then every pending order, strictly
//! one task at a time. Every task gets a freshly fetched quote; a quote that
//! cannot be fetched just means "no trigger this cycle". Store failures abort
//! only the task they happen in.

use crate::context::AppContext;
use crate::executor::{execute_alert, execute_order, AlertOutcome, OrderOutcome};
use crate::models::{LimitOrder, PriceAlert, Task, TaskKind};
use crate::trigger::{alert_triggered, order_triggered};
use log::{debug, error, info};
use std::time::Duration;
use tokio::time;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pause between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Courtesy pause between tasks to spare the quote provider.
    pub quote_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            interval: Duration::from_secs(300),
            quote_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub alerts_fired: usize,
    pub alerts_undelivered: usize,
    pub orders_filled: usize,
    pub orders_deferred: usize,
    pub orders_discarded: usize,
    pub not_triggered: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Engine {
    ctx: AppContext,
    config: EngineConfig,
}

impl Engine {
    pub fn new(ctx: AppContext, config: EngineConfig) -> Self {
        Engine { ctx, config }
    }

    /// Runs cycles until the surrounding task is dropped.
    pub async fn run(&self) {
        info!(
            "Evaluation engine started (interval {:?}, quote delay {:?})",
            self.config.interval, self.config.quote_delay
        );
        loop {
            let report = self.run_cycle().await;
            info!("Evaluation cycle finished: {:?}", report);
            time::sleep(self.config.interval).await;
        }
    }

    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        match self.ctx.tasks.list_pending(TaskKind::PriceAlert).await {
            Ok(tasks) => {
                for task in tasks {
                    if let Task::PriceAlert(alert) = task {
                        self.evaluate_alert(&alert, &mut report).await;
                        self.pause().await;
                    }
                }
            }
            Err(e) => error!("Failed to load pending price alerts: {}", e),
        }

        match self.ctx.tasks.list_pending(TaskKind::LimitOrder).await {
            Ok(tasks) => {
                for task in tasks {
                    if let Task::LimitOrder(order) = task {
                        self.evaluate_order(&order, &mut report).await;
                        self.pause().await;
                    }
                }
            }
            Err(e) => error!("Failed to load pending limit orders: {}", e),
        }

        report
    }

    async fn evaluate_alert(&self, alert: &PriceAlert, report: &mut CycleReport) {
        let quote = match self.ctx.quotes.fetch_price(&alert.ticker).await {
            Ok(quote) => quote,
            Err(e) => {
                debug!("Skipping alert {} this cycle: {}", alert.id, e);
                report.skipped += 1;
                return;
            }
        };
        if !alert_triggered(alert, quote.price) {
            report.not_triggered += 1;
            return;
        }

        match execute_alert(&self.ctx, alert, quote.price).await {
            Ok(AlertOutcome::Delivered) => report.alerts_fired += 1,
            Ok(AlertOutcome::Undelivered) => report.alerts_undelivered += 1,
            Ok(AlertOutcome::Vanished) => {}
            Err(e) => {
                error!("Failed to process price alert {}: {}", alert.id, e);
                report.failed += 1;
            }
        }
    }

    async fn evaluate_order(&self, order: &LimitOrder, report: &mut CycleReport) {
        let quote = match self.ctx.quotes.fetch_price(&order.ticker).await {
            Ok(quote) => quote,
            Err(e) => {
                debug!("Skipping limit order {} this cycle: {}", order.id, e);
                report.skipped += 1;
                return;
            }
        };
        if !order_triggered(order, quote.price) {
            report.not_triggered += 1;
            return;
        }

        match execute_order(&self.ctx, order, quote.price).await {
            Ok(OrderOutcome::Filled(_)) => report.orders_filled += 1,
            Ok(OrderOutcome::Deferred { .. }) => report.orders_deferred += 1,
            Ok(OrderOutcome::Discarded) => report.orders_discarded += 1,
            Ok(OrderOutcome::Vanished) => {}
            Err(e) => {
                error!("Failed to process limit order {}: {}", order.id, e);
                report.failed += 1;
            }
        }
    }

    async fn pause(&self) {
        if !self.config.quote_delay.is_zero() {
            time::sleep(self.config.quote_delay).await;
        }
    }
}
