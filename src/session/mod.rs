//! Connection session: a bound endpoint plus the policy for keeping it.
//!
//! A session starts unbound, binds through discovery (or an explicit
//! `bind`), and heals itself when the server disappears mid-use.

pub mod connection;
pub mod errors;
pub mod retry;

pub use connection::{
    ApiCall, ConnectionSession, HttpMethod, RequestTimeouts, SessionState,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
};
pub use errors::SessionError;
pub use retry::RetryPolicy;
