//! Block trees: capacity checks and the read-side aggregated view.

pub mod oracle;
pub mod tree;

pub use oracle::{Admission, CapacityOracle};
pub use tree::{BlockNode, BlockTree, Occupant, TreeAggregator, TreeError, DEFAULT_MAX_DEPTH};
