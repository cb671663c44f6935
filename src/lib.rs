//! Game lookup and patch install pipeline.
//!
//! A [`session::SearchSession`] answers queries from the local game index
//! immediately and upgrades the results as remote metadata, placeholder
//! names and thumbnails arrive. [`install::InstallFanout`] downloads one
//! artifact and copies it into every install destination.

pub mod config;
pub mod downloader;
pub mod error;
pub mod generation;
pub mod index;
pub mod install;
pub mod library;
pub mod matcher;
pub mod merger;
pub mod names;
pub mod observer;
pub mod providers;
pub mod resolver;
pub mod session;
pub mod thumbnails;

pub use error::{Error, Result};
