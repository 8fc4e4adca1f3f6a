pub mod node;
pub mod dag;

pub use node::{CommitNode, Parents};
pub use dag::{Dag, DagStats};
