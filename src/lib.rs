// wxmp-cli - library root for testing

pub mod auth;
pub mod commands;
pub mod config;
pub mod draft;
pub mod error;
pub mod http_client;
pub mod media;
pub mod output;
pub mod server;
