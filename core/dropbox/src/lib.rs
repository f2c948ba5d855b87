//! Dropbox backend for the cloud storage facade.
//!
//! Talks to the Dropbox HTTP API v2 directly: RPC endpoints for listing,
//! metadata and deletion, content endpoints for transfers. Access tokens are
//! short lived and refreshed from a long lived refresh token.

pub mod auth;
pub mod client;

pub use auth::{DropboxCredentials, TokenManager, Tokens};
pub use client::{DropboxClient, DropboxConfig};
