pub mod banner;
pub mod config;
pub mod consts;
pub mod engine;
pub mod middleware;
pub mod plugin;
pub mod request;
pub mod server;
pub mod service;
