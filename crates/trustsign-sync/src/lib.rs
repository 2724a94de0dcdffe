//! Signing gateway: credential ownership, retry policy, and the transport to the signing authority.

mod error;
pub mod gateway;
pub mod remote;
pub mod retry;

#[cfg(feature = "http")]
pub mod http;

pub use error::GatewayError;
pub use gateway::{SigningGateway, SigningTransport};
pub use remote::{AccessToken, BatchFile, PollOutcome, RemoteStatus, SubmitBatch};
pub use retry::RetryPolicy;

#[cfg(feature = "http")]
pub use http::HttpTransport;
