//! Property-based tests for incremental propagation

mod reducer_equivalence;
