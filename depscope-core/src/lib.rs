//! depscope core library: dependency parsing, node reconciliation, compilation, and fetching.
//!
//! Data flows raw sources → [`store::NodeStore`] (through [`reconcile`], using
//! [`repo_url`] matching) → [`compile::compile`] (using [`parse::parse`]) →
//! [`compile::DependencyAggregate`], which [`analysis`] queries read from.
//! [`fetch::Fetcher`] is the network entry point that fills the store instead
//! of disk-backed sources read by [`load`].

pub mod analysis;
pub mod compile;
pub mod config;
pub mod error;
pub mod fetch;
pub mod load;
pub mod parse;
pub mod progress;
pub mod reconcile;
pub mod repo_url;
pub mod sources;
pub mod store;
pub mod types;
