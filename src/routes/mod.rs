pub mod auth;
pub mod health;
pub mod parcels;
pub mod rules;
