//! Conditional order monitoring background service
//!
//! A single recurring loop that re-evaluates resting orders against fresh
//! prices, hands triggered orders to the execution engine, and on a slower
//! cadence expires orders past their time-in-force deadline.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::Order;
use crate::marketdata::QuoteSource;
use crate::services::TradingService;

/// Configuration for the order monitor
#[derive(Debug, Clone)]
pub struct OrderMonitorConfig {
    /// Interval between trigger-evaluation ticks (seconds)
    pub check_interval_secs: u64,
    /// Interval between expiry sweeps (seconds)
    pub expiry_interval_secs: u64,
}

impl Default for OrderMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 1,
            expiry_interval_secs: 300, // 5 minutes
        }
    }
}

/// Order monitoring statistics
#[derive(Debug, Clone, Default)]
pub struct MonitorStats {
    pub orders_checked: u64,
    pub orders_executed: u64,
    pub orders_expired: u64,
    pub execution_errors: u64,
    pub symbols_without_price: u64,
    pub last_tick: Option<DateTime<Utc>>,
}

/// Conditional order monitor. Exactly one instance runs per deployment;
/// per-order races with user cancellation are resolved by the order row
/// lock inside the trading service.
pub struct OrderMonitor {
    trading: TradingService,
    quotes: Arc<dyn QuoteSource>,
    config: OrderMonitorConfig,
    running: Arc<AtomicBool>,
    stats: Arc<RwLock<MonitorStats>>,
}

impl OrderMonitor {
    /// Create a new order monitor
    pub fn new(
        trading: TradingService,
        quotes: Arc<dyn QuoteSource>,
        config: OrderMonitorConfig,
    ) -> Self {
        Self {
            trading,
            quotes,
            config,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(RwLock::new(MonitorStats::default())),
        }
    }

    /// Get current statistics
    pub async fn stats(&self) -> MonitorStats {
        self.stats.read().await.clone()
    }

    /// Signal the loop to stop after the current tick
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Start the monitoring loop
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Order monitor already running");
        }

        info!(
            "Starting order monitor (tick: {}s, expiry sweep: {}s)",
            self.config.check_interval_secs, self.config.expiry_interval_secs
        );

        let monitor = self;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(
                monitor.config.check_interval_secs,
            ));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            let mut last_sweep = tokio::time::Instant::now();
            let sweep_every =
                std::time::Duration::from_secs(monitor.config.expiry_interval_secs);

            while monitor.running.load(Ordering::SeqCst) {
                tick.tick().await;

                if let Err(e) = monitor.process_pending_orders().await {
                    error!("Error in monitor tick: {e}");
                }

                if last_sweep.elapsed() >= sweep_every {
                    if let Err(e) = monitor.expire_due_orders().await {
                        error!("Error in expiry sweep: {e}");
                    }
                    last_sweep = tokio::time::Instant::now();
                }
            }

            info!("Order monitor stopped");
        })
    }

    /// Run one trigger-evaluation tick: load active orders, fetch one
    /// price per symbol, execute whatever triggers. A failure on one order
    /// never aborts the rest of the batch.
    pub async fn process_pending_orders(&self) -> crate::error::Result<()> {
        let active_orders = self.trading.store().list_active_orders().await?;
        if active_orders.is_empty() {
            return Ok(());
        }

        let mut orders_by_symbol: HashMap<String, Vec<Order>> = HashMap::new();
        for order in active_orders {
            orders_by_symbol
                .entry(order.symbol.clone())
                .or_default()
                .push(order);
        }

        for (symbol, orders) in orders_by_symbol {
            self.process_symbol_orders(&symbol, orders).await;
        }

        self.stats.write().await.last_tick = Some(Utc::now());
        Ok(())
    }

    /// Evaluate all of one symbol's resting orders against a single price
    /// sample.
    async fn process_symbol_orders(&self, symbol: &str, orders: Vec<Order>) {
        let price = match self.quotes.get_price(symbol, false).await {
            Ok(Some(price)) if price > Decimal::ZERO => price,
            Ok(_) => {
                debug!(symbol, "no market data, skipping symbol this tick");
                self.stats.write().await.symbols_without_price += 1;
                return;
            }
            Err(e) => {
                warn!(symbol, error = %e, "quote lookup failed, skipping symbol this tick");
                self.stats.write().await.symbols_without_price += 1;
                return;
            }
        };

        for order in orders {
            self.stats.write().await.orders_checked += 1;

            if !order.is_triggered(price) {
                continue;
            }

            match self.trading.execute_resting_order(order.id, price).await {
                Ok(Some(executed)) => {
                    info!(
                        order_id = executed.id,
                        symbol,
                        status = %executed.status,
                        "resting order processed"
                    );
                    self.stats.write().await.orders_executed += 1;
                }
                Ok(None) => {
                    // Reached a terminal state between the scan and the lock.
                    debug!(order_id = order.id, "order no longer active, skipped");
                }
                Err(e) => {
                    error!(order_id = order.id, error = %e, "failed to execute resting order");
                    self.stats.write().await.execution_errors += 1;
                }
            }
        }
    }

    /// Cancel orders whose `expires_at` has passed, releasing their
    /// reservations exactly as a user cancel would.
    pub async fn expire_due_orders(&self) -> crate::error::Result<()> {
        let expired = self.trading.store().list_expired_active_orders().await?;
        if expired.is_empty() {
            return Ok(());
        }

        info!("Found {} expired orders to cancel", expired.len());

        for order in expired {
            match self.trading.expire_order(order.id).await {
                Ok(true) => {
                    self.stats.write().await.orders_expired += 1;
                }
                Ok(false) => {
                    debug!(order_id = order.id, "order settled before expiry sweep");
                }
                Err(e) => {
                    error!(order_id = order.id, error = %e, "failed to expire order");
                }
            }
        }

        Ok(())
    }
}
