//! # a3s-backbone
//!
//! Authenticated request broker for a multi-user image data service.
//!
//! ## Overview
//!
//! `a3s-backbone` accepts named operations carrying an opaque session token,
//! authenticates the token against a session authority, runs the operation
//! inside a transactional unit of work on a bounded worker pool, strips
//! non-transportable context from the resulting object graph and replies
//! with either a serialized result or a typed failure (403, 404 or 500).
//! File paths handed out by the broker never leave the managed repository
//! root.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_backbone::{
//!     BackboneConfig, Dispatcher, MemoryDataStore, MemorySessionAuthority, ObjectNode,
//!     Payload, Request, Session,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_backbone::Result<()> {
//! let sessions = MemorySessionAuthority::new();
//! sessions.insert("T1", Session::new("uuid-1", "User"))?;
//!
//! let store = MemoryDataStore::new();
//! store.insert(ObjectNode::new("Image", 42).with_value("name", "cells.tiff"));
//!
//! let config = BackboneConfig::new("/data/repo");
//! let dispatcher = Dispatcher::from_config(&config, Arc::new(sessions), Arc::new(store))?;
//!
//! let payload = Payload::new()
//!     .with("sessionKey", "T1")
//!     .with("type", "Image")
//!     .with("id", 42);
//! let reply = dispatcher.handle(Request::new("omero.get_object", payload)).await;
//! assert!(reply.is_success());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **dispatcher**: authentication gate and operation dispatch
//! - **executor**: worker pool running units of work
//! - **handlers**: one function per operation
//! - **resolver** / **policy**: managed-repository path resolution
//! - **sanitize**: object graph sanitizer
//! - **facade**: data-access traits and the in-memory store
//! - **bus**: NATS transport

pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod facade;
pub mod handlers;
pub mod model;
pub mod operation;
pub mod policy;
pub mod resolver;
pub mod sanitize;
pub mod session;
pub mod types;

// Re-export core types
pub use bus::NatsBinding;
pub use config::{BackboneConfig, NatsConfig};
pub use dispatcher::Dispatcher;
pub use error::{BackboneError, Result};
pub use executor::{Executor, UnitOfWork, WorkContext};
pub use facade::{DataStore, FileLookup, FileRecord, Repository, TxContext, TxOutcome};
pub use model::{AmbientContext, NodeId, ObjectGraph, ObjectNode};
pub use operation::Operation;
pub use policy::PathPolicy;
pub use resolver::{CheckedPath, PathResolver, ResolvedPath};
pub use sanitize::{sanitize, SanitizeReport};
pub use session::{Session, SessionAuthority};
pub use types::{Failure, Identity, Payload, Reply, ReplyBody, Request};

// Re-export in-memory collaborators for convenience
pub use facade::memory::{MemoryDataStore, StoreStats};
pub use session::MemorySessionAuthority;
