//! Shared HTTP client for scan dispatch

mod client;

pub use client::{HttpClient, HttpExchange};
