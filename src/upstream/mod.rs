//! Plumbing shared by every upstream integration.

pub mod document;
mod fetch;

pub use fetch::{FetchClient, FetchOptions, FetchRequest, FetchResult, FetchStatus};
