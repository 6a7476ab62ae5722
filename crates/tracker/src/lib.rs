//! Real-time aircraft tracker with a dual archive pipeline.
//!
//! A single orchestrator loop polls the receiver feed, classifies each
//! observation against the in-memory state cache, groups changes into
//! size-capped batches and fans every batch out to two bounded-concurrency
//! upload pipelines: one clear Parquet copy and one AES-256-GCM encrypted
//! copy under a minute-rotated key, both bound to one package UUID.

pub mod batcher;
pub mod broadcast;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod feed;
pub mod fingerprint;
pub mod orchestrator;
pub mod pipeline;
pub mod register;
pub mod restore;
pub mod snapshot;
pub mod state_cache;
pub mod stats;
pub mod tpm;
pub mod uploader;
