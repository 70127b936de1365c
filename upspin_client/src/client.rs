//! The client orchestrator: file-level semantics over the directory and
//! store servers.
//!
//! A [`Client`] is the per-user session: it owns the config, the
//! factotum, and the caches, and is cheap to clone across worker tasks.
//! Within one file operation, blocks always reach the store before the
//! entry reaches the directory; that order is what makes the stored entry
//! pointable.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use upspin_core::access;
use upspin_core::entry::{DirBlock, DirEntry, Packing, SEQ_NOT_EXIST};
use upspin_core::path::Parsed;
use upspin_core::{
    Config, Error, GroupCache, Kind, Location, PathName, Result, UserName,
};
use upspin_factotum::{Factotum, PublicKey};
use upspin_pack::{BlockPacker, BlockUnpacker, Packer as _};

use crate::bind;
use crate::store::StoreClient;

/// The per-user session: config, keys, connections, and caches.
#[derive(Clone)]
pub struct Client {
    pub(crate) config: Arc<Config>,
    pub(crate) factotum: Factotum,
    pub(crate) groups: Arc<GroupCache>,
    writer_keys: Arc<dashmap::DashMap<UserName, PublicKey>>,
    store: StoreClient,
}

impl Client {
    pub fn new(config: Config, factotum: Factotum) -> Client {
        let config = Arc::new(config);
        Client {
            groups: Arc::new(GroupCache::new(config.cache_size)),
            writer_keys: Arc::new(dashmap::DashMap::new()),
            store: StoreClient::new(config.clone()),
            factotum,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn factotum(&self) -> &Factotum {
        &self.factotum
    }

    pub fn user_name(&self) -> &UserName {
        &self.config.user_name
    }

    /// Direct store access, for reference-level tools (`getref`,
    /// `deletestorage`).
    pub fn store(&self) -> &StoreClient {
        &self.store
    }

    /// The directory server holding `user`'s tree: ours from the config,
    /// anyone else's from their key-server record.
    pub async fn dir_for(&self, user: &UserName) -> Result<Arc<dyn upspin_core::DirServer>> {
        if user == &self.config.user_name {
            return bind::dir_server(&self.config, &self.config.dir_endpoint);
        }
        let record = self.key_server()?.lookup(user).await;
        match record {
            Ok(record) if !record.dirs.is_empty() => {
                bind::dir_server(&self.config, &record.dirs[0])
            }
            // Fall back to our own directory endpoint; shared in-world
            // deployments resolve every user there.
            _ => bind::dir_server(&self.config, &self.config.dir_endpoint),
        }
    }

    /// The key server from the config.
    pub fn key_server(&self) -> Result<Arc<dyn upspin_core::KeyServer>> {
        bind::key_server(&self.config, &self.config.key_endpoint)
    }

    /// The public key that verifies entries written by `writer`.
    pub(crate) async fn writer_key(&self, writer: &UserName) -> Result<PublicKey> {
        if writer == &self.config.user_name {
            return Ok(self.factotum.public_key().clone());
        }
        if let Some(key) = self.writer_keys.get(writer) {
            return Ok(key.clone());
        }
        let record = self.key_server()?.lookup(writer).await?;
        let key = PublicKey::parse(&record.public_key)
            .map_err(|e| e.op("writerKey").msg(format!("bad public key for {writer}")))?;
        self.writer_keys.insert(writer.clone(), key.clone());
        Ok(key)
    }

    /// The packing for a new file at `name`: Access and Group files are
    /// always integrity-packed so servers can read them; everything else
    /// uses the configured packing.
    fn packing_for(&self, name: &PathName) -> Packing {
        if access::is_access_file(name) || access::is_group_file(name) {
            Packing::EeIntegrity
        } else {
            self.config.packing
        }
    }

    /// Opens `name` for reading, following links.
    pub async fn open(&self, name: &PathName) -> Result<FileReader> {
        let entry = self.lookup(name, true).await?;
        self.open_entry(entry).await
    }

    /// Opens an already-resolved entry for reading.
    pub async fn open_entry(&self, entry: DirEntry) -> Result<FileReader> {
        let op = "Open";
        if entry.is_dir() {
            return Err(Error::new(Kind::IsDir).op(op).path(entry.name.clone()));
        }
        if entry.is_incomplete() {
            return Err(Error::new(Kind::Private).op(op).path(entry.name.clone()));
        }
        let writer_key = self.writer_key(&entry.writer).await?;
        let packer = upspin_pack::lookup(entry.packing);
        let unpacker = packer
            .unpack(&self.factotum, &writer_key, &entry)
            .map_err(|e| e.op(op).path(entry.name.clone()))?;
        Ok(FileReader {
            store: self.store.clone(),
            entry,
            unpacker,
            next_block: 0,
        })
    }

    /// Reads the full contents of `name`.
    pub async fn get(&self, name: &PathName) -> Result<Vec<u8>> {
        self.open(name).await?.read_all().await
    }

    /// Starts writing a new file at `name`. The returned writer must be
    /// closed; an abandoned writer leaves no directory entry behind.
    pub async fn create(&self, name: &PathName) -> Result<FileWriter> {
        self.create_packed(name, self.packing_for(name)).await
    }

    /// Starts writing with an explicit packing. Access and Group files
    /// stay integrity-packed no matter what the caller asks for.
    pub async fn create_packed(&self, name: &PathName, packing: Packing) -> Result<FileWriter> {
        let parsed = Parsed::parse(name)?;
        let packing = if access::is_access_file(name) || access::is_group_file(name) {
            Packing::EeIntegrity
        } else {
            packing
        };
        let mut entry = DirEntry::new(parsed.path(), packing, self.config.user_name.clone());
        if self.config.prudent {
            // Careful mode: bind the put to the sequence we observed.
            match self.lookup(name, false).await {
                Ok(existing) => entry.sequence = existing.sequence,
                Err(e) if e.is(Kind::NotExist) => entry.sequence = SEQ_NOT_EXIST,
                Err(_) => {}
            }
        }
        let packer = upspin_pack::lookup(packing);
        let block_packer = packer.pack(&self.factotum, &entry)?;
        Ok(FileWriter {
            client: self.clone(),
            store_endpoint: self.config.store_endpoint.clone(),
            block_size: self.config.block_size,
            entry,
            block_packer,
            buf: Vec::new(),
            offset: 0,
        })
    }

    /// Writes `data` to `name` in one call.
    ///
    /// Writing an Access file validates the `read:all`-versus-encrypted
    /// constraint and invalidates cached Group state on Group writes.
    pub async fn put(&self, name: &PathName, data: &[u8]) -> Result<DirEntry> {
        self.put_packed(name, data, self.packing_for(name)).await
    }

    /// Writes `data` under an explicit packing; `repack` and
    /// `share -unencryptforall` rewrite files through this.
    pub async fn put_packed(
        &self,
        name: &PathName,
        data: &[u8],
        packing: Packing,
    ) -> Result<DirEntry> {
        let parsed = Parsed::parse(name)?;
        if access::is_access_file(name) {
            self.check_access_put(&parsed, data).await?;
        }
        let mut writer = self.create_packed(name, packing).await?;
        writer.write(data).await?;
        let entry = writer.close().await?;
        if access::is_group_file(name) {
            self.groups.remove(name);
        }
        Ok(entry)
    }

    /// Rejects an Access file that grants `read:all` over a directory
    /// already holding encrypted content: such a grant cannot be honoured
    /// without decryption. The tree must be repacked with `eeintegrity`
    /// first.
    async fn check_access_put(&self, parsed: &Parsed, data: &[u8]) -> Result<()> {
        let candidate = access::Access::parse(parsed.path(), data)?;
        if !candidate.has_all_users(access::Right::Read) {
            return Ok(());
        }
        let dir = parsed.dir();
        let mut pending = vec![dir.clone()];
        while let Some(d) = pending.pop() {
            let children = match self.glob(&format!("{}/*", d)).await {
                Ok(c) => c,
                Err(e) if e.is(Kind::NotExist) => continue,
                Err(e) => return Err(e),
            };
            for child in children {
                if child.is_dir() {
                    pending.push(Parsed::parse(&child.name)?);
                } else if child.packing == Packing::Ee {
                    return Err(Error::new(Kind::Invalid)
                        .op("Put")
                        .path(parsed.path())
                        .msg(format!(
                            "cannot add \"read:all\": {} is encrypted",
                            child.name
                        )));
                }
            }
        }
        Ok(())
    }

    /// Creates a directory.
    pub async fn mkdir(&self, name: &PathName) -> Result<DirEntry> {
        let parsed = Parsed::parse(name)?;
        let entry = DirEntry::new_directory(parsed.path(), self.config.user_name.clone());
        let dir = self.dir_for(parsed.user()).await?;
        dir.put(&entry).await
    }

    /// Creates a link at `link_name` pointing to `target`.
    pub async fn put_link(&self, target: &PathName, link_name: &PathName) -> Result<DirEntry> {
        let target = Parsed::parse(target)?;
        let parsed = Parsed::parse(link_name)?;
        let entry = DirEntry::new_link(
            parsed.path(),
            target.path(),
            self.config.user_name.clone(),
        );
        let dir = self.dir_for(parsed.user()).await?;
        dir.put(&entry).await
    }

    /// Removes the entry for `name`: the link itself for links, and never
    /// the underlying store blocks, which other entries may share.
    pub async fn delete(&self, name: &PathName) -> Result<DirEntry> {
        let parsed = Parsed::parse(name)?;
        let dir = self.dir_for(parsed.user()).await?;
        let removed = dir.delete(&parsed.path()).await?;
        if access::is_group_file(name) {
            self.groups.remove(name);
        }
        Ok(removed)
    }

    /// Creates a new entry at `dst` reusing `src`'s block references:
    /// one physical copy, two names. Fails with `Exist` if `dst` exists
    /// and `IsDir` if `src` is a directory.
    pub async fn put_duplicate(&self, src: &PathName, dst: &PathName) -> Result<DirEntry> {
        let op = "PutDuplicate";
        let src_entry = self.lookup(src, true).await.map_err(|e| e.op(op))?;
        if src_entry.is_dir() {
            return Err(Error::new(Kind::IsDir).op(op).path(src.clone()));
        }
        if src_entry.is_incomplete() {
            return Err(Error::new(Kind::Private).op(op).path(src.clone()));
        }
        let parsed_dst = Parsed::parse(dst)?;
        // The signed name, writer, and packdata travel unchanged: the
        // original writer's signature still covers the blocks.
        let mut dup = src_entry;
        dup.name = parsed_dst.path();
        dup.sequence = SEQ_NOT_EXIST;
        let dir = self.dir_for(parsed_dst.user()).await?;
        dir.put(&dup).await.map_err(|e| e.op(op))
    }

    /// Renames a regular file within the namespace. Fails with `IsDir`
    /// on directories and `Exist` if `to` exists.
    pub async fn rename(&self, from: &PathName, to: &PathName) -> Result<DirEntry> {
        let op = "Rename";
        let moved = self.put_duplicate(from, to).await.map_err(|e| e.op(op))?;
        self.delete(from).await.map_err(|e| e.op(op))?;
        Ok(moved)
    }

    /// Requests a snapshot of this user's tree.
    pub async fn take_snapshot(&self) -> Result<()> {
        let parsed = upspin_core::user::parse(self.config.user_name.as_str())?;
        let snapshot_user = parsed.with_suffix(upspin_core::user::SNAPSHOT_SUFFIX);
        let name = PathName::from(format!("{snapshot_user}/TakeSnapshot"));
        let entry = DirEntry::new(name, Packing::Plain, self.config.user_name.clone());
        let dir = self.dir_for(&snapshot_user).await?;
        dir.put(&entry).await?;
        Ok(())
    }
}

/// Streams a file's blocks in order, fetching and unpacking on demand.
pub struct FileReader {
    store: StoreClient,
    entry: DirEntry,
    unpacker: Box<dyn BlockUnpacker>,
    next_block: usize,
}

impl FileReader {
    pub fn entry(&self) -> &DirEntry {
        &self.entry
    }

    /// The next cleartext block, or `None` at end of file.
    pub async fn read_block(&mut self) -> Result<Option<Bytes>> {
        let Some(block) = self.entry.blocks.get(self.next_block) else {
            return Ok(None);
        };
        let ciphertext = self.store.get(&block.location).await?;
        let cleartext = self
            .unpacker
            .unpack(&ciphertext, block)
            .map_err(|e| e.path(self.entry.name.clone()))?;
        self.next_block += 1;
        Ok(Some(cleartext))
    }

    pub async fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read_block().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

/// Accumulates writes into packed blocks. Close finalises the entry's
/// signature and records it in the directory; every successful create must
/// end in exactly one `close`.
pub struct FileWriter {
    client: Client,
    store_endpoint: upspin_core::Endpoint,
    block_size: usize,
    entry: DirEntry,
    block_packer: Box<dyn BlockPacker>,
    buf: Vec<u8>,
    offset: u64,
}

impl FileWriter {
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= self.block_size {
            let chunk: Vec<u8> = self.buf.drain(..self.block_size).collect();
            self.flush_block(&chunk).await?;
        }
        Ok(())
    }

    async fn flush_block(&mut self, cleartext: &[u8]) -> Result<()> {
        let (ciphertext, packdata) = self
            .block_packer
            .pack(cleartext)
            .map_err(|e| e.path(self.entry.name.clone()))?;
        let reference = self
            .client
            .store()
            .put(&self.store_endpoint, ciphertext)
            .await?;
        self.entry.blocks.push(DirBlock {
            location: Location {
                endpoint: self.store_endpoint.clone(),
                reference,
            },
            offset: self.offset,
            size: cleartext.len() as u64,
            packdata,
        });
        self.offset += cleartext.len() as u64;
        Ok(())
    }

    /// Flushes the tail, signs the entry, and records it in the
    /// directory. Blocks are already in the store by the time the entry
    /// becomes visible.
    pub async fn close(mut self) -> Result<DirEntry> {
        if !self.buf.is_empty() {
            let chunk = std::mem::take(&mut self.buf);
            self.flush_block(&chunk).await?;
        }
        let packer = self.block_packer;
        let mut entry = self.entry;
        packer
            .close(&mut entry)
            .map_err(|e| e.path(entry.name.clone()))?;
        let parsed = Parsed::parse(&entry.name)?;
        let dir = self.client.dir_for(parsed.user()).await?;
        let stored = dir.put(&entry).await?;
        debug!("wrote {} ({} blocks)", stored.name, stored.blocks.len());
        Ok(stored)
    }
}
