//! Client orchestration: ingest pipeline, per-identity client actor and provider.

pub mod client;
pub mod ingest;
pub mod provider;

pub use client::{ClientContext, ClientHandle, RealtimeClient, UiEvent};
pub use ingest::{IngestPipeline, Ingested};
pub use provider::RealtimeProvider;
