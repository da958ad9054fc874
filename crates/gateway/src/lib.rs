//! MCP gateway for cloud-integration monitoring APIs.
//!
//! Serves a fixed tool catalog over two MCP wire transports and mediates
//! every call into authenticated, paginated requests against the selected
//! tenant's monitoring REST endpoints.

pub mod catalog;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod rpc;
pub mod server;
pub mod session;
pub mod tenant;
pub mod token_cache;
pub mod upstream;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
