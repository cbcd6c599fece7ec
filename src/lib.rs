pub mod app;
pub mod config;
pub mod db;
pub mod docs;
pub mod errors;
pub mod events;
pub mod guard;
pub mod jwt;
pub mod models;
pub mod routes;
pub mod rules;

// Re-export commonly used items for tests
pub use app::{create_app, create_app_with, AppState};
pub use config::RulesConfig;
