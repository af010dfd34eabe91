//! Git smart HTTP gateway and repository comparison engine for a self-hosted
//! forge.

pub mod compare;
pub mod config;
pub mod database;
pub mod diff;
pub mod error;
pub mod git_ops;
pub mod http_server;
pub mod paths;
pub mod store;
pub mod tags;
