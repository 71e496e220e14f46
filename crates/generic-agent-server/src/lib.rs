pub mod commands;
pub mod configuration;
pub mod error;
pub mod logging;
pub mod openapi;
pub mod routes;
pub mod state;
