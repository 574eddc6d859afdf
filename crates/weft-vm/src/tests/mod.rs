//! Integration tests for the runtime

pub mod helpers;

mod cache;
mod closures;
mod scheduler;
