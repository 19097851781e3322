#![cfg_attr(not(test), forbid(unsafe_code))]

//! Marketchat server: persistent-connection delivery between buyers and
//! sellers, backed by a conversation store and a read-side query API.

pub mod app_state;
pub mod commands;
pub mod db;
pub mod error;
pub mod handlers;
pub mod http;
pub mod middleware;
pub mod openapi;
pub mod realtime;
pub mod routes;
pub mod server;
pub mod services;
pub mod store;
mod tracer;
