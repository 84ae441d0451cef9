//! Audiobook Station - an audiobook catalog server with metadata enrichment
//!
//! This library provides the core functionality for the Audiobook Station
//! server: library scanning, the SQLite catalog, and bulk enrichment jobs that
//! pull descriptions and tags from Google Books and an optional language model.

pub mod catalog;
pub mod config;
pub mod enrichment;
pub mod library;
pub mod normalize;
pub mod server;
