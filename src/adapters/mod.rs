mod postgres;

pub use postgres::{NewOrder, NewTransaction, OrderFilter, PostgresStore};
