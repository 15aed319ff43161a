//! Multi-account access layer for the forge API
//!
//! Lets the ingestion pipeline spread tens of thousands of calls over several
//! credential sets without ever knowing which one is active. The pool is
//! loaded once; per-account health lives in a concurrent registry; a rotation
//! policy picks the current account; two hooks (pre-request quota gate and
//! post-response error classifier) feed the registry; a bounded retry
//! executor wraps each remote call.
//!
//! Account lifecycle:
//! 1. Loaded from config → `Available`
//! 2. Quota at or below the requests-left border, or 403/429 rate limit →
//!    `RateLimited { until }`, current pointer rotates to the next account
//! 3. Checked after `until` → back to `Available` (lazy, no timer)
//! 4. 401 or rejected app token → `InvalidCredentials` until restart
//! 5. Nothing usable left → wait for the earliest reset, or fail when no
//!    valid credentials remain at all

pub mod access;
pub mod account;
pub mod classify;
pub mod error;
pub mod gate;
pub mod health;
pub mod progress;
pub mod retry;
pub mod rotation;
pub mod wait;

pub use access::{AccessSettings, AccountAccess};
pub use account::{Account, AccountPool};
pub use classify::{ErrorClassifier, classify_response};
pub use error::{Error, Result};
pub use gate::PreflightGate;
pub use health::{AccountState, HealthRegistry};
pub use progress::{ProcessingLimits, ProcessingProgress, RecordKind};
pub use retry::{RetryError, RetryExecutor};
pub use rotation::RotationPolicy;
pub use wait::ResetWaiter;
