// Library root for the attendance gate

pub mod core;
pub mod state;
pub mod infra;
pub mod auth;
pub mod api;
pub mod config;
