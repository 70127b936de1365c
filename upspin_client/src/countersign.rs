//! Countersigning and key-server rotation: steps 2 and 3 of the key
//! rotation sequence.
//!
//! After `keygen -rotate` the factotum holds both keys. `countersign`
//! walks every file the user wrote and adds a signature under the new
//! key; `rotate` then registers the new public key with the key server,
//! authenticating with the old key, which the server still holds.

use upspin_core::entry::Packing;
use upspin_core::{Error, Kind, PathName, Result};
use upspin_pack::Packer as _;

use crate::client::Client;

#[derive(Debug, Default)]
pub struct CountersignReport {
    pub signed: Vec<PathName>,
    pub skipped: usize,
    pub errors: Vec<(PathName, Error)>,
}

impl CountersignReport {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Adds signatures under the factotum's new key to every file the user
/// writes. Tolerant of per-file failures: reports and continues.
pub async fn countersign(client: &Client) -> Result<CountersignReport> {
    let factotum = client.factotum();
    let old = factotum.pop();
    if old.public_key() == factotum.public_key() {
        return Err(Error::new(Kind::Invalid)
            .op("Countersign")
            .msg("no previous key; run keygen rotate first"));
    }
    let old_key = old.public_key().clone();

    let root = PathName::from(format!("{}/", client.user_name()));
    let entries = client.walk_tree(&root).await.map_err(|e| e.op("Countersign"))?;

    let mut report = CountersignReport::default();
    for mut entry in entries {
        if !entry.is_regular()
            || entry.packing == Packing::Plain
            || entry.writer != *client.user_name()
        {
            report.skipped += 1;
            continue;
        }
        let packer = upspin_pack::lookup(entry.packing);
        if let Err(e) = packer.countersign(&old_key, factotum, &mut entry) {
            report.errors.push((entry.name.clone(), e));
            continue;
        }
        let parsed = match upspin_core::Parsed::parse(&entry.name) {
            Ok(p) => p,
            Err(e) => {
                report.errors.push((entry.name.clone(), e));
                continue;
            }
        };
        let put = async {
            let dir = client.dir_for(parsed.user()).await?;
            dir.put(&entry).await
        };
        match put.await {
            Ok(_) => report.signed.push(entry.name.clone()),
            Err(e) => report.errors.push((entry.name.clone(), e)),
        }
    }
    report.signed.sort();
    Ok(report)
}

/// Registers the factotum's current public key with the key server,
/// signing the updated record with the previous key.
pub async fn rotate(client: &Client) -> Result<()> {
    let factotum = client.factotum();
    let old = factotum.pop();
    if old.public_key() == factotum.public_key() {
        return Err(Error::new(Kind::Invalid)
            .op("Rotate")
            .msg("no previous key; run keygen rotate first"));
    }
    let key_server = client.key_server()?;
    let mut record = key_server.lookup(client.user_name()).await?;
    record.public_key = factotum.public_key().text().to_string();
    let sig = old.sign(&record.canonical_bytes())?;
    key_server.put(&record, &sig).await.map_err(|e| e.op("Rotate"))
}
