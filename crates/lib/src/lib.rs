//! Nupat client library: backend gateway, local chat history, auth flows and the
//! session reconciler used by the CLI.

pub mod api;
pub mod auth;
pub mod config;
pub mod history;
pub mod init;
pub mod session;
pub mod storage;
