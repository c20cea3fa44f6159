//! # Tern VM Analysis
//!
//! Read-only passes over a finalized bytecode array. They never feed back
//! into generation.
//!
//! ## Passes
//!
//! - [`BranchAnalysis`]: jump and switch edges grouped by target, split into
//!   back-edges and forward edges
//! - [`LoopAnalysis`]: loop headers, their nesting, and the innermost loop of
//!   any offset

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod branch_analysis;
pub mod loop_analysis;

pub use branch_analysis::BranchAnalysis;
pub use loop_analysis::LoopAnalysis;
