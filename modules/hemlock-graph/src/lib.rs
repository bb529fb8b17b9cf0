pub mod builder;
pub mod store;

pub use builder::{GraphBuild, GraphBuilder};
pub use store::{GraphStats, GraphStore, Subgraph};
