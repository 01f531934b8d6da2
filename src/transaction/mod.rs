pub mod concurrency;

pub use concurrency::{
    AbortReason, IsolationLevel, LockManager, LockMode, Transaction, TransactionAbortError,
    TransactionError, TransactionManager, TransactionState,
};
