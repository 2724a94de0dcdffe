//! Signing engine: runs signing requests against the gateway and replaces files in place.

mod error;
pub mod orchestrator;
pub mod request;

pub use error::SignError;
pub use orchestrator::Orchestrator;
pub use request::SigningRequest;
