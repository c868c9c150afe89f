mod order_monitor;
mod trading;

pub use order_monitor::{OrderMonitor, OrderMonitorConfig, MonitorStats};
pub use trading::TradingService;
