//! # Careloom: graph-driven conversational care workflows
//!
//! Careloom routes a multi-turn conversation through specialized workflows
//! (symptom triage, constitutional assessment, emergency response, specialist
//! matching), each modeled as a directed graph of processing steps that can
//! pause mid-execution to wait for user input and resume later from the exact
//! point of suspension.
//!
//! ## Core concepts
//!
//! - **Nodes**: restart-from-top async functions over typed node-local state
//! - **Graphs**: immutable, validated workflow definitions compiled at startup
//! - **Checkpoints**: the minimal persisted state to resume a suspended run
//! - **Executors**: per-workflow wiring between engine outcomes and the session
//! - **Supervisor**: classification, routing, emergency override, hand-offs
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use careloom::config::Settings;
//! use careloom::directory::HttpProviderDirectory;
//! use careloom::oracle::{OracleError, TextOracle};
//! use careloom::stores::{MemoryCheckpointStore, MemorySessionStore};
//! use careloom::supervisor::Supervisor;
//!
//! struct MyOracle;
//!
//! #[async_trait::async_trait]
//! impl TextOracle for MyOracle {
//!     async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
//!         // call your model of choice
//!         # let _ = prompt;
//!         todo!()
//!     }
//! }
//!
//! # async fn example() -> miette::Result<()> {
//! let settings = Settings::from_env();
//! let directory = HttpProviderDirectory::new(settings.directory_base_url.clone())
//!     .map_err(|e| miette::miette!("{e}"))?;
//!
//! let supervisor = Supervisor::with_default_workflows(
//!     Arc::new(MyOracle),
//!     Arc::new(directory),
//!     Arc::new(MemorySessionStore::new()),
//!     Arc::new(MemoryCheckpointStore::new()),
//!     &settings,
//! )
//! .map_err(|e| miette::miette!("{e}"))?;
//!
//! let reply = supervisor.handle("I have a headache", None).await;
//! println!("{} ({:?})", reply.text, reply.action);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module guide
//!
//! - [`engine`] - the graph execution loop (suspend, complete, hand off)
//! - [`graphs`] - graph builder and compile-time validation
//! - [`node`] - node trait, outcomes, and suspension payloads
//! - [`checkpoint`] - typed and persisted checkpoint shapes
//! - [`session`] - the per-conversation record and its invariants
//! - [`workflows`] - the four concrete workflows and their executors
//! - [`supervisor`] - classification, routing, and the hand-off trampoline
//! - [`stores`] - session/checkpoint persistence (memory + sqlite)
//! - [`oracle`] / [`directory`] - external collaborator contracts

pub mod checkpoint;
pub mod config;
pub mod directory;
pub mod engine;
pub mod graphs;
pub mod message;
pub mod node;
pub mod oracle;
pub mod session;
pub mod stores;
pub mod supervisor;
pub mod telemetry;
pub mod types;
pub mod workflows;
