//! HTTP transport for remote sources.
//!
//! [`Transport`] issues GET requests with a bounded number in flight and
//! turns each successful response into a JSON document. Per-request failures
//! are absorbed here: the caller sees a missing document, never an error.

mod fetcher;

pub use fetcher::{Transport, TransportError};
