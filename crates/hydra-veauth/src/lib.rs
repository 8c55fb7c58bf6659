//! Volcengine credential exchange for Ark.
//!
//! Trades a long-lived access key / secret key pair for an Ark API key via
//! the signed OpenAPI: list the account's API keys, then fetch the raw key
//! material of the first one. One network round trip per call, no caching,
//! no retry; callers own both.

pub mod ark;
pub mod error;

mod sign;

pub use ark::{ArkClient, ExchangeOptions, get_ark_api_key};
pub use error::{Result, VeauthError};
