pub mod order;
pub mod transaction;

pub use order::{BillingAddress, Customer, Order, OrderContext, OrderItem};
pub use transaction::{
    merge_metadata, MetadataKey, Transaction, TransactionKind, TransactionStatus,
};
