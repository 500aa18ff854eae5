//! Model resolution: source + precision → loaded [`ModelHandle`](crate::ModelHandle),
//! converting and caching on a miss.

mod builder;
mod model;
mod types;

pub use builder::ModelResolverBuilder;
pub use model::ModelResolver;
pub use types::*;
