pub mod config;
pub mod data_types;
pub mod reconciler;
pub mod repository;
pub mod statement;
