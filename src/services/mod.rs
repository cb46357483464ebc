pub mod initiate;
pub mod locks;
pub mod reconcile;
pub mod refund;

pub use initiate::{NextAction, PaymentInitiator};
pub use locks::KeyedLocks;
pub use reconcile::{
    NotificationDisposition, ReconcileOutcome, ReconciliationEngine, RedirectOutcome,
};
pub use refund::{RefundCoordinator, RefundData};
