//! Types shared across the forge ingestion crates

mod account_id;
mod error;
mod secret;

pub use account_id::AccountId;
pub use error::{Error, Result};
pub use secret::Secret;
