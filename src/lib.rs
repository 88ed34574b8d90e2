pub mod args;
mod client;
pub mod commands;
mod error;
mod sql;

pub use client::{ChClient, Fetch, ServerVersion};
pub use error::Error;
pub use error::Result;
