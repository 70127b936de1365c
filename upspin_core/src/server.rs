//! The server capabilities the client consumes: directory, store, and key
//! lookup. Implementations are dispatched by `Endpoint.transport` through
//! the bind layer.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::endpoint::Endpoint;
use crate::entry::{DirEntry, Location, Reference, Signature};
use crate::errors::{Error, Result};
use crate::path::PathName;
use crate::user::UserName;

/// A directory event delivered by [`DirServer::watch`].
#[derive(Debug)]
pub struct WatchEvent {
    pub entry: DirEntry,
    /// True if the event records a deletion of `entry.name`.
    pub delete: bool,
    /// A terminal error; the stream ends after delivering one.
    pub error: Option<Error>,
}

/// The directory service for some set of user trees.
///
/// Servers take exactly one link hop: a lookup whose evaluation crosses a
/// link returns a `FollowLink` error carrying the link's entry, and the
/// client-side resolver continues the walk.
#[async_trait]
pub trait DirServer: Send + Sync {
    /// Looks up the entry for `name`.
    async fn lookup(&self, name: &PathName) -> Result<DirEntry>;

    /// Stores `entry`, honouring its sequence constraint. Returns the
    /// entry as stored, with the assigned sequence.
    async fn put(&self, entry: &DirEntry) -> Result<DirEntry>;

    /// Expands a glob pattern rooted at one user.
    async fn glob(&self, pattern: &str) -> Result<Vec<DirEntry>>;

    /// Removes the entry for `name`. Returns the removed entry.
    async fn delete(&self, name: &PathName) -> Result<DirEntry>;

    /// The entry of the Access file governing `name`, or `None` if the
    /// tree has none (owner-only policy).
    async fn which_access(&self, name: &PathName) -> Result<Option<DirEntry>>;

    /// Streams events for the subtree at `name`, starting from `sequence`
    /// (`-1` replays current state first). The stream stops when `cancel`
    /// fires.
    async fn watch(
        &self,
        name: &PathName,
        sequence: i64,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<WatchEvent>>;

    fn endpoint(&self) -> Endpoint;
}

/// The result of a store fetch: either the bytes, or other places to try.
#[derive(Clone, Debug)]
pub enum Fetched {
    Bytes(Bytes),
    /// The block has moved or is mirrored; retry at these locations in
    /// order.
    Redirect(Vec<Location>),
}

/// A block store. References are opaque and content-addressed.
#[async_trait]
pub trait StoreServer: Send + Sync {
    async fn get(&self, reference: &Reference) -> Result<Fetched>;

    async fn put(&self, ciphertext: Bytes) -> Result<Reference>;

    async fn delete(&self, reference: &Reference) -> Result<()>;

    fn endpoint(&self) -> Endpoint;
}

/// A user's public record in the key server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub name: UserName,
    /// The public key text: curve name and decimal X, Y, one per line.
    pub public_key: String,
    pub dirs: Vec<Endpoint>,
    pub stores: Vec<Endpoint>,
}

impl UserRecord {
    /// The canonical byte string covered by a record signature.
    /// Fields are length-prefixed so no two records collide.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut field = |s: &str| {
            buf.extend_from_slice(&(s.len() as u64).to_be_bytes());
            buf.extend_from_slice(s.as_bytes());
        };
        field(self.name.as_str());
        field(&self.public_key);
        for ep in &self.dirs {
            field(&ep.to_string());
        }
        for ep in &self.stores {
            field(&ep.to_string());
        }
        buf
    }
}

/// The key service: public keys and server endpoints per user.
#[async_trait]
pub trait KeyServer: Send + Sync {
    async fn lookup(&self, user: &UserName) -> Result<UserRecord>;

    /// Updates a user's record. `sig` must verify, over
    /// [`UserRecord::canonical_bytes`], against the public key the server
    /// currently holds for the user; this is what lets a rotating user
    /// authenticate with the old key.
    async fn put(&self, record: &UserRecord, sig: &Signature) -> Result<()>;

    fn endpoint(&self) -> Endpoint;
}
