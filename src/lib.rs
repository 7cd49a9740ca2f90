//! galaxy-proxy - Fetch-through cache for Ansible Galaxy
//!
//! Serves role and collection metadata and tarballs from local storage,
//! fetching from the upstream Galaxy server on a miss and rewriting
//! embedded upstream URLs so clients keep talking to the proxy.

pub mod cli;
pub mod config;
pub mod content;
pub mod error;
pub mod kind;
pub mod proxy;
pub mod repository;
pub mod rewrite;
pub mod route;
pub mod storage;
pub mod ui;

pub use error::{ProxyError, ProxyResult};
