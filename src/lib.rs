//! # news_ingest
//!
//! Multi-source article ingestion: fetchers turn news APIs, RSS/Atom feeds,
//! PubMed, Google Scholar and blogs into normalized [`models::Article`]
//! records, and the [`publish::Publisher`] stores the ones not seen before.
//!
//! ## Architecture
//!
//! 1. **Configuration**: [`config::AppConfig`] holds credentials and source definitions
//! 2. **Fetching**: a [`fetchers::SourceFetcher`] per source kind, backed by the
//!    [`extract::ContentExtractor`] for full text
//! 3. **Publishing**: deduplication by source link into a [`store::ContentStore`]
//! 4. **Reporting**: [`pipeline::Pipeline`] wraps each run into a [`pipeline::RunReport`]
//!
//! Every network call goes through [`http::HttpTransport`] and every LLM call
//! through [`api::ChatCompletion`], so whole runs can be tested offline.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetchers;
pub mod http;
pub mod json_repair;
pub mod models;
pub mod pipeline;
pub mod publish;
pub mod store;
pub mod utils;
pub mod xml;
