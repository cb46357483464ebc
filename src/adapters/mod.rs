pub mod memory_store;
pub mod postgres_orders;
pub mod postgres_store;

pub use memory_store::{InMemoryTransactionStore, StaticOrderRepository};
pub use postgres_orders::{PostgresOrderRepository, PostgresOrderStatusSync};
pub use postgres_store::PostgresTransactionStore;
