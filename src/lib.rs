pub mod config;
pub mod engine;
pub mod game;
pub mod models;
pub mod orchestrator;
