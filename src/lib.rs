//! Vigil - probe library manager and HTTP vulnerability scan engine
//!
//! Manages a filesystem-backed library of declarative detection probes and
//! dispatches them against target lists. Matches become structured findings
//! with captured request/response evidence.

pub mod api;
pub mod error;
pub mod http;
pub mod matcher;
pub mod models;
pub mod probe;
pub mod scan;
pub mod settings;
