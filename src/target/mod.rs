//! Target platform (Spacelift) API

pub mod spacelift;

pub use spacelift::{GraphqlResponse, PushSummary, SpaceliftClient};
