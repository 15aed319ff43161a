//! Forge REST API constants

/// Default API base URL (overridable in config for enterprise installs)
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Media type requested on every call
pub const ACCEPT: &str = "application/vnd.github+json";

/// Header pinning the REST API version
pub const API_VERSION_HEADER: &str = "x-github-api-version";

/// REST API version this client was written against
pub const API_VERSION: &str = "2022-11-28";

/// User-Agent sent with every request (the API rejects requests without one)
pub const USER_AGENT: &str = concat!("forge-ingest/", env!("CARGO_PKG_VERSION"));

/// Backdating applied to JWT `iat` to tolerate clock drift with the forge
pub const JWT_CLOCK_SKEW_SECS: i64 = 60;

/// JWT lifetime; the forge caps app JWTs at ten minutes
pub const JWT_LIFETIME_SECS: i64 = 540;

/// Installation tokens expiring within this window are refreshed before use
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
