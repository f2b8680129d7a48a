//! Crawl-augmented community search.
//!
//! `gallrag` turns a free-text question into a grounded, persona-voiced
//! answer backed by live community forum content:
//!
//! ```text
//!   query
//!     │
//!     ▼
//!  ┌───────────┐   gallery ids   ┌───────────┐   posts    ┌───────────┐
//!  │ discovery │ ──────────────▶ │  crawler  │ ─────────▶ │ indexing  │
//!  └───────────┘                 └───────────┘            └─────┬─────┘
//!                                                              │ chunks
//!                                                              ▼
//!  ┌───────────┐    hits        ┌───────────┐   vectors  ┌───────────┐
//!  │ synthesis │ ◀───────────── │ retrieval │ ◀───────── │  sqlite   │
//!  └─────┬─────┘                └───────────┘            │  + vec    │
//!        │                                               └───────────┘
//!        ▼
//!   persona answer
//! ```
//!
//! The [`engine::SearchEngine`] drives the whole pipeline; [`server`] exposes
//! it over HTTP. Every stage except retrieval degrades rather than fails:
//! an unreachable search backend, a dead gallery, or a missing generation
//! key each shrink the response instead of erroring it.

pub mod chunking;
pub mod config;
pub mod crawler;
pub mod discovery;
pub mod embeddings;
pub mod engine;
pub mod generation;
pub mod indexing;
pub mod persona;
pub mod retrieval;
pub mod server;
pub mod stores;
pub mod types;

pub use config::EngineConfig;
pub use engine::{EngineStatus, SearchEngine, SmartSearchRequest};
pub use persona::Persona;
pub use types::{PipelineError, Post, RetrievedHit, SmartSearchResult};
