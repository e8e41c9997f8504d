//! Rubric records, their normalization, storage and caching.

pub mod wire;
pub mod score_range;
pub mod schema;
pub mod normalize;
pub mod store;
pub mod cache;

pub use schema::*;
pub use score_range::*;
pub use normalize::*;
pub use store::*;
pub use cache::*;
