#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Marker-delimited editing of the host's SIEM forwarding configuration.
//!
//! One text file routes selected syslog categories to remote collector
//! endpoints; each endpoint owns a delimited block keyed by its
//! address:port identity. This crate locates, replaces, and removes those
//! blocks while preserving unrelated content, and guards every mutation
//! with a timestamped backup and a restore-on-failure pass.
//!
//! Layout: `model.rs` (endpoint identities and rule rendering),
//! `document.rs` (line-oriented block editing), `store.rs` (filesystem
//! seam), `service.rs` (`ConfService` operations), `defaults.rs` (paths and
//! the stock selector set).

pub mod defaults;
mod document;
pub mod error;
pub mod model;
pub mod service;
pub mod store;

pub use defaults::{DEFAULT_CONFIG_PATH, DEFAULT_SELECTORS};
pub use error::{ConfError, ConfResult};
pub use model::{Endpoint, InstalledBlock, Transport};
pub use service::{ConfService, Outcome};
pub use store::{ConfStore, DiskStore};
