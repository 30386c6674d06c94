//! HTTP API: operator surface for provisioning runs.

pub mod app;
