pub mod api;
pub mod server;
pub mod ws;

pub use api::{routes, AppState};
pub use server::WebServer;
