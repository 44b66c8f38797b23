//! # charsheet - character sheets stored in a GitHub repository
//!
//! charsheet keeps tabletop character sheets as JSON files in a Git repository and
//! edits them through the GitHub REST contents API. There is no server of its own:
//! the repository is the database, a single index file lists every character, and
//! each character lives in its own file next to it.
//!
//! ## Features
//!
//! - **Two-phase sync**: write the character file, then patch the index under
//!   compare-and-swap with a bounded retry on conflict.
//! - **Stable identifiers**: ids are slugs derived once from the character name and
//!   never change afterwards; colliding names get a numeric suffix.
//! - **Tolerant records**: stored records are normalized on load, so older files
//!   gain newly added fields and lists keep their minimum number of rows.
//! - **Read fallbacks**: reads try the raw mirror, then the API, then a local
//!   checkout, so a picker works without a credential.
//! - **Serialized session**: every operation runs through one controller task, one
//!   at a time.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use charsheet::auth::TerminalPrompter;
//! use charsheet::config::Config;
//! use charsheet::session::{start_controller, Controller, LocalStateFile};
//! use charsheet::store::GitHubStore;
//! use charsheet::sync::{IndexSynchronizer, SyncOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("charsheet.toml").await?;
//!     let store = GitHubStore::new(config.repo.clone(), std::env::var("CHARSHEET_TOKEN").ok())?;
//!     let sync = IndexSynchronizer::new(Arc::new(store), SyncOptions::from_config(&config));
//!     let controller = Controller::new(
//!         sync,
//!         Arc::new(TerminalPrompter),
//!         LocalStateFile::new(&config.session.state_file),
//!     );
//!     let (session, _task) = start_controller(controller);
//!     println!("{}", session.startup().await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - remote file store contract, GitHub client and an in-memory store
//! - [`ident`] - slug derivation and collision suffixes
//! - [`character`] - the character record model
//! - [`index`] - the index document and its ordering
//! - [`auth`] - the name-derived password gate for save and delete
//! - [`sync`] - the index synchronizer (save, delete, load)
//! - [`session`] - controller, operation queue and local state file
//! - [`config`] - TOML configuration
//! - [`validation`] - name, id and path checks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    Session      │ ← selection, picker, one operation at a time
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Index Sync +    │ ← gate, id derivation, two-phase writes
//! │ Auth Gate       │
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Remote Store   │ ← GitHub contents API
//! └─────────────────┘
//! ```

pub mod auth;
pub mod character;
pub mod config;
pub mod ident;
pub mod index;
pub mod logutil;
pub mod session;
pub mod store;
pub mod sync;
pub mod validation;
