//! Terminal transport for the demo flows

pub mod cli;
