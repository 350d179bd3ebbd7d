//! Traits at the seams between the retrieval engine and the outside world.
//!
//! - **Storage**: persisted reputation table
//! - **Transport**: server connections, dialing and discovery

mod storage;
mod transport;

pub use storage::*;
pub use transport::*;
