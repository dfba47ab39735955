//! JSON-RPC API Layer
//!
//! Producer surface for Leveler: uploads go onto the queue, direct requests
//! run the pipeline inline, and status/stats read back what happened.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::{RpcHandler, RpcServices};
pub use server::{RpcServer, RpcServerConfig};
