//! Client for local Lemonade inference servers.
//!
//! The server may be on any of a range of ports and may restart on a
//! different one at any time. This crate finds it, keeps a session bound to
//! it, and rediscovers it when it moves.
//!
//! ```no_run
//! # async fn run() -> Result<(), lemonade_client::SessionError> {
//! use lemonade_client::{ChatMessage, ClientConfig, GenerationParams, LemonadeClient};
//!
//! let client = LemonadeClient::connect(&ClientConfig::default()).await?;
//! let models = client.list_models().await?;
//! let reply = client
//!     .chat_completion(&models[0].id, vec![ChatMessage::user("hi")], GenerationParams::default())
//!     .await?;
//! println!("{:?}", reply.content());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod discovery;
pub mod session;

pub use api::{
    ChatCompletionResponse, ChatMessage, GenerationParams, LemonadeClient, ModelInfo, Role,
};
pub use config::{load_config, load_or_default, ClientConfig, ConfigError};
pub use discovery::{
    DiscoveryError, Endpoint, HttpLivenessChecker, LivenessChecker, LivenessContract,
    PortScanner, ProbeOutcome, ProbeResult, ScanConfig,
};
pub use session::{
    ApiCall, ConnectionSession, RequestTimeouts, RetryPolicy, SessionError, SessionState,
};
