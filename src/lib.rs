//! gasprobe: gas-pattern detector for EVM smart contracts
//!
//! Takes a Solidity front end's per-function IR, builds a control-flow
//! graph, explores every feasible path symbolically with Z3, and reports
//! dead branches, tautological branches, storage access inside loops,
//! loop-invariant pure calls and loop-invariant branch conditions.

pub mod analysis;
pub mod block;
pub mod cfg;
pub mod compiler;
pub mod contract;
pub mod engine;
pub mod errors;
pub mod expr;
pub mod ir;
pub mod loader;
pub mod lower;
pub mod matcher;
pub mod patterns;
pub mod render;
pub mod symbolic;
