//! # ldapi
//!
//! A synchronous LDAP client built around an explicit connection state machine.
//!
//! A [`Directory`] moves from unconnected to connected to bound, and every
//! operation checks that state before calling into the protocol engine. Searches
//! return a [`ResultSet`] that owns the server result and hands out forward-only
//! [`Entry`] and [`Reference`] chains. [`Modification`] builds validated batch
//! changes for [`Directory::modify_batch`].
//!
//! The protocol engine is abstracted behind [`DirectoryEngine`]; [`LdapEngine`]
//! implements it on top of `ldap3`.
//!
//! ## Modules
//!
//! - [`directory`] - Connection state machine
//! - [`result_set`] - Completed results, paging cookies and materialized entries
//! - [`entry`] / [`reference`] - Traversal nodes
//! - [`modification`] - Batch modification builder
//! - [`search`] - Search parameters
//! - [`engine`] - Engine contract and handle tokens
//! - [`ldap`] - `ldap3` engine

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod directory;
pub mod engine;
pub mod entry;
pub mod ldap;
pub mod modification;
pub mod reference;
pub mod result_set;
pub mod search;

pub use directory::Directory;
pub use engine::{
    AttributeChange, AttributeMap, BindCredentials, CompareOutcome, ConnectionHandle,
    DirectoryEngine, EngineResult, EntryHandle, ReferenceHandle, ResultHandle, SaslCredentials,
};
pub use entry::{AttributeValues, Entry, ValueMode};
pub use ldap::LdapEngine;
pub use modification::{ModOperation, Modification};
pub use reference::Reference;
pub use result_set::{EntryRecord, EntrySet, PageCookie, ParsedResult, ResultSet};
pub use search::{DerefPolicy, SearchRequest, SearchScope};

// Re-export the engine-independent core
pub use ldapi_core::{config, escape, option, Diagnostic, Error, Result};
