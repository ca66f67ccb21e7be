//! # Factual
//!
//! A fact extraction and caching service.
//!
//! Factual forwards submitted text to an OpenAI-style completion API to
//! extract short factual statements, caches the results in Postgres keyed by
//! a SHA-256 content hash, and serves previously extracted facts by context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌────────────┐
//! │   HTTP   │──▶│ extract flow  │──▶│ Completion │
//! │ /parse   │   │ validate+hash │   │  API       │
//! │ /facts   │   │ cache lookup  │   └────────────┘
//! └──────────┘   └──────┬────────┘
//!                       ▼
//!                 ┌──────────┐
//!                 │ Postgres │
//!                 │ prompts  │
//!                 │ facts    │
//!                 └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! factual init                  # create tables
//! factual serve                 # start the HTTP server
//! factual parse --text "..." --context "Worm"
//! factual facts --context "Worm"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Row types |
//! | [`hash`] | Content hashing for cache keys |
//! | [`completion`] | Completion provider abstraction |
//! | [`store`] | Row-store abstraction (Postgres + in-memory) |
//! | [`extract`] | Core parse flow |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod completion;
pub mod config;
pub mod db;
pub mod extract;
pub mod hash;
pub mod migrate;
pub mod models;
pub mod server;
pub mod store;
