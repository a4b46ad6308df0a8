pub mod config;
pub mod handlers;
pub mod models;
pub mod providers;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;

pub use state::AppState;
