//! Network boundary: request/response snapshots and the fetch trait.

mod client;
mod error;
mod types;

pub use client::{HttpNetwork, Network, OfflineNetwork};
pub use error::FetchError;
pub use types::{Request, RequestKey, Response};
