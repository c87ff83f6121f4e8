//! Decoding of the line-delimited connector protocol.

pub mod parser;

pub use parser::MessageStream;
