//! GitHub REST implementation of the platform adapter.

mod client;
mod models;

pub use client::GitHubClient;
