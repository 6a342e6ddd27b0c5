//! Configuration-driven agent bootstrap and execution lifecycle.
//!
//! A run loads a [`config::Configuration`], wraps it in an
//! [`context::AgentContext`] and hands it to an [`runner::AgentRunner`],
//! which always comes back with a structured [`runner::ExecutionResult`].

pub mod agent;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod runner;
