//! The Upspin client.
//!
//! ## Layers
//! 1. `bind`        – transport registry: endpoint → live server connection.
//! 2. `store`       – block I/O with redirects and transient retry.
//! 3. `resolver`    – link following, globbing, access location.
//! 4. `client`      – the orchestrator (`Client`): open/create/put/get,
//!    fast copies, renames, deletes.
//! 5. `share` / `countersign` – the engines that repair and rotate the
//!    cryptographic state of whole subtrees.

pub mod bind;
pub mod countersign;
pub mod share;

mod client;
mod resolver;
mod store;

pub use client::{Client, FileReader, FileWriter};
pub use share::{ShareReport, Sharer};
pub use store::StoreClient;
