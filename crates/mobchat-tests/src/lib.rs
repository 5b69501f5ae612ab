//! # mobchat-tests
//!
//! Integration tests for mobchat.
//!
//! This crate provides multi-node testing including:
//! - Join scenarios: rejected peers, routing sync and route finding
//! - Gossip, relay and direct delivery between running nodes
//! - Wire-level checks with a raw protocol client
//! - Property-based tests for the codecs and the routing table

pub mod generators;
pub mod harness;

#[cfg(test)]
mod scenario_tests;



pub use generators::*;
pub use harness::*;
