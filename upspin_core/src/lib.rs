//! Core Upspin types and traits.
//!
//! This crate defines the shared vocabulary of the Upspin client: path and
//! user names, directory entries and their blocks, endpoints, the Access
//! policy language, the per-user configuration, the closed-kind error type,
//! and the server traits the client consumes.
//!
//! ## Wire-stable surfaces
//!
//! - Path and user name syntax (`path`, `user`)
//! - Directory entries, blocks, references, locations (`entry`)
//! - Endpoint strings `transport,netaddr` (`endpoint`)
//! - The Access and Group file grammars (`access`)
//! - The `key: value` config file (`config`)
//!
//! Server implementations live elsewhere; this crate only carries the
//! capability traits (`server`) they implement.

pub mod access;
pub mod config;
pub mod endpoint;
pub mod entry;
pub mod errors;
pub mod path;
pub mod server;
pub mod user;

// --- Core public surface ---

pub use access::{Access, CanResult, GroupCache, Right, UsersResult};
pub use config::Config;
pub use endpoint::{Endpoint, Transport};
pub use entry::{
    Attribute, DirBlock, DirEntry, Location, Packing, Reference, Signature, Time,
    SEQ_BASE, SEQ_IGNORE, SEQ_NOT_EXIST,
};
pub use errors::{Error, Kind, Result};
pub use path::{Parsed, PathName, MAX_LINK_HOPS};
pub use server::{DirServer, Fetched, KeyServer, StoreServer, UserRecord, WatchEvent};
pub use user::UserName;
