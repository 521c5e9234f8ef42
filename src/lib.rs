pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod realtime;
pub mod services;
pub mod store;
pub mod trading;
pub mod validation;
pub mod web;

pub use error::{Error, Result};
