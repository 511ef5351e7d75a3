//! Per-request pipeline: context state, URL normalization, bounded body
//! capture and the response primitives.

pub mod body;
pub mod context;
pub mod normalize;
pub mod respond;

pub use body::MAX_BODY_BYTES;
pub use context::{BodyData, RequestContext};
pub use normalize::ParamValue;
