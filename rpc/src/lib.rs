//! Sealed JSON RPC endpoint for the strand node.
//!
//! A single POST endpoint dispatches on the `method` field of a call that
//! is sealed to the node's key; replies are sealed back to the caller.
//! Transport is HTTPS with client certificates.

pub mod error;
pub mod handlers;
pub mod sealed;
pub mod server;
pub mod tls;

pub use error::RpcError;
pub use handlers::{dispatch, RpcCall, TransactionSubmitter};
pub use sealed::{node_key_text, open_response, seal_request, SealedRequest, SealedResponse};
pub use server::{router, RpcServer, RpcServerConfig, RpcState, RpcTlsFiles};
