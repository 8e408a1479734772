//! Queue module: generic namespaced client and the per-endpoint queue.

mod client;
mod endpoint;

pub use client::QueueClient;
pub use endpoint::EndpointQueue;
