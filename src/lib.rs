//! habitdeck core: cached person → habit → habit-event hierarchy, cascade
//! refresh under mutation, and per-scope analytics views.

pub mod analytics;
pub mod api;
pub mod cache;
pub mod cascade;
pub mod cli;
pub mod config;
pub mod error;
pub mod log_sink;
pub mod poller;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;
