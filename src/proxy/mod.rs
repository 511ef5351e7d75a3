//! Upstream proxying: a pooled client and the request forwarding path.

pub mod client;
pub mod upstream;

pub use upstream::forward;
