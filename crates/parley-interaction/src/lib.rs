//! Interaction layer for Parley.
//!
//! Concrete `CompletionSource` implementations. Currently one: an HTTP
//! client for the NDJSON streaming generation service.

mod http_source;

pub use http_source::HttpCompletionSource;
