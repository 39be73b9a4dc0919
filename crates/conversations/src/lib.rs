//! Conversations domain module.
//!
//! Messages posted into topics. A message is created once and never mutated.

pub mod message;

pub use message::{Message, PostMessage};
