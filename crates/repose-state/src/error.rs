use thiserror::Error;

use crate::store::StoreId;

#[derive(Debug, Error)]
pub enum StateError {
    /// The store was asked to mutate while one of its own transactions was
    /// open on this thread (e.g. `update` called from inside its mutator).
    #[error("{store} is already inside a transaction on this thread")]
    TransactionMisuse { store: StoreId },
}
