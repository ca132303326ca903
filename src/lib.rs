pub mod auth;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod feed;
pub mod ipc;
pub mod session;
