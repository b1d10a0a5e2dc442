//! Suntech ST300-family protocol support (ASCII, semicolon-delimited).

pub mod codec;
pub mod server;

pub use server::SuntechListener;
