/// Crate-wide error type
///
/// Each layer has its own error enum; this one only exists so callers that
/// cross layers (the binary, mostly) can use `?` on all of them.

use crate::credits::CreditError;
use crate::session::{CheckoutBlocked, SessionError};
use crate::state::CodecError;
use crate::storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Credits(#[from] CreditError),

    #[error(transparent)]
    Checkout(#[from] CheckoutBlocked),

    #[error("no storage location available on this platform")]
    NoDataDir,
}

pub type Result<T> = std::result::Result<T, Error>;
