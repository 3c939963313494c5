//! Taospipe REST - TDengine `/rest/sql` endpoint as a [`Store`](taospipe_core::Store)

mod client;
mod response;

pub use client::{RestConfig, RestStore, SHARED_RUNTIME};
pub use response::SqlResponse;
