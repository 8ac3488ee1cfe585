//! galaxy-fds - async client for the Galaxy FDS object storage service

pub mod cli;
pub mod config;
pub mod fds;

pub use config::Config;
pub use fds::{FdsClient, FdsError};
