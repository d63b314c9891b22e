//! Core library for the Relay issue-tracker client: session lifecycle, the HTTP
//! gateway, notifications, list filters, and the state-synchronization layer
//! (optimistic edits, polling, bulk updates) shared by front-ends.

pub mod auth;
pub mod config;
pub mod filters;
pub mod gateway;
pub mod notify;
pub mod sync;
