//! Fuzzy semantics: elementwise operators and the sets that bundle them.

pub mod ops;
mod set;

pub use set::{
    Aggregator, AggregatorKind, BinaryOp, ImplicationKind, OperatorConfig, OperatorSet,
    OperatorSetBuilder, TNormFamily, UnaryOp,
};
