pub mod config;
pub mod handlers;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod startup;
pub mod verifier;
