mod order;
mod portfolio;
mod transaction;

pub use order::{
    Order, OrderRequest, OrderSide, OrderStatus, OrderType, TimeInForce, MAX_QUANTITY_SCALE,
};
pub use portfolio::{Holding, Portfolio};
pub use transaction::{Transaction, TransactionType};
