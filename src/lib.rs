pub mod config;
pub mod database;
pub mod entities;
pub mod errors;
pub mod ingestor;
pub mod jobs;
pub mod models;
pub mod reconcile;
pub mod sources;
pub mod utils;
