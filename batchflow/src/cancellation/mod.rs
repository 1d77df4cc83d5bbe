//! Cooperative stop handling.

mod token;

pub use token::StopToken;
