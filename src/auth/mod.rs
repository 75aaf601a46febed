//! Session tokens handed to API callers after the OAuth exchange.

pub mod token;

pub use token::{SessionClaims, SessionUser, TokenError, TokenSigner};
