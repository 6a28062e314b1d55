//! Authorization proxy and QR-code login for the Aliyun Drive open platform.
//!
//! The [`auth`] module holds the login state machine and the credential-injecting
//! proxy; [`server`] exposes the proxy over HTTP.

pub mod auth;
pub mod config;
pub mod server;
