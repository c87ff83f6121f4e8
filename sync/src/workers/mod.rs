//! The two pipeline lanes and their lifecycle plumbing.

pub mod base;
pub mod consumer;
pub mod producer;
