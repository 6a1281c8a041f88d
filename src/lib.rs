//! Retrieval-augmented Julia coding agent.
//!
//! [`runtime`] is a generic state-graph engine with checkpointed interrupts.
//! [`agent`] compiles the coding assistant onto it: generate code with a
//! language model, validate it by running it, feed failures back, and pause
//! for human review where configured.

pub mod agent;
pub mod logging;
pub mod runtime;
