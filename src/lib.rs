pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod processor;
pub mod service;
pub mod store;
pub mod web;
