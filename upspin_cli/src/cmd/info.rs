//! Inspection subcommands: info, whichaccess, getref, deletestorage,
//! config, user.

use anyhow::{Context, Result};
use upspin_core::{PathName, Reference, Signature, UserRecord};
use upspin_pack::Packer as _;

use crate::cmd::Session;
use crate::cmd::util;

/// `info path...`: prints the full directory entry.
pub async fn info(session: &Session, paths: &[String], glob: bool) -> Result<bool> {
    let mut failed = false;
    for arg in paths {
        let names = match session.expand_upspin(arg, glob).await {
            Ok(n) => n,
            Err(e) => {
                util::report_anyhow(&e);
                failed = true;
                continue;
            }
        };
        for name in names {
            if let Err(e) = info_one(session, &name).await {
                util::report_anyhow(&e);
                failed = true;
            }
        }
    }
    Ok(failed)
}

async fn info_one(session: &Session, name: &PathName) -> Result<()> {
    let entry = session.client.lookup(name, false).await?;
    println!("{}", entry.name);
    if entry.signed_name != entry.name {
        println!("\tsigned name:\t{}", entry.signed_name);
    }
    println!("\tattributes:\t{}", entry.attr);
    println!("\tpacking:\t{}", entry.packing);
    println!("\twriter: \t{}", entry.writer);
    println!("\tsequence:\t{}", entry.sequence);
    let time = chrono::DateTime::from_timestamp(entry.time, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| entry.time.to_string());
    println!("\ttime:    \t{time}");
    println!("\tsize:    \t{}", entry.size().unwrap_or(0));
    if let Some(target) = &entry.link {
        println!("\tlink to: \t{target}");
    }
    for (i, block) in entry.blocks.iter().enumerate() {
        println!(
            "\tblock {i}:\toffset {} size {} at {} ref {}",
            block.offset, block.size, block.location.endpoint, block.location.reference
        );
    }
    let packer = upspin_pack::lookup(entry.packing);
    if let Ok(hashes) = packer.reader_hashes(&entry.packdata) {
        if !hashes.is_empty() {
            println!("\treader key hashes:");
            for hash in hashes {
                println!("\t\t{}", hex(&hash));
            }
        }
    }
    match session.client.which_access(name).await? {
        Some(access) => println!("\taccess file:\t{}", access.name),
        None => println!("\taccess file:\towner only"),
    }
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// `whichaccess path...`
pub async fn whichaccess(session: &Session, paths: &[String], glob: bool) -> Result<bool> {
    let mut failed = false;
    for arg in paths {
        let names = match session.expand_upspin(arg, glob).await {
            Ok(n) => n,
            Err(e) => {
                util::report_anyhow(&e);
                failed = true;
                continue;
            }
        };
        for name in names {
            match session.client.which_access(&name).await {
                Ok(Some(entry)) => println!("{}\t{}", name, entry.name),
                Ok(None) => println!("{name}\towner only"),
                Err(e) => {
                    util::report(&e);
                    failed = true;
                }
            }
        }
    }
    Ok(failed)
}

/// `getref reference`: fetches one block from the user's store.
pub async fn getref(session: &Session, reference: &str, output: Option<&str>) -> Result<bool> {
    let location = upspin_core::Location {
        endpoint: session.config.store_endpoint.clone(),
        reference: Reference::from(reference),
    };
    let data = session.client.store().get(&location).await?;
    match output {
        Some(file) => std::fs::write(file, &data)?,
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&data)?;
        }
    }
    Ok(false)
}

/// `deletestorage [--ref r... | --path p...]`: the only path to
/// physical block deletion. Paths must name regular files; never
/// recursive.
pub async fn deletestorage(
    session: &Session,
    refs: &[String],
    paths: &[String],
    glob: bool,
) -> Result<bool> {
    if refs.is_empty() == paths.is_empty() {
        anyhow::bail!("deletestorage needs exactly one of --ref or --path");
    }
    let mut failed = false;
    for reference in refs {
        let result = session
            .client
            .store()
            .delete(&session.config.store_endpoint, &Reference::from(reference.as_str()))
            .await;
        if let Err(e) = result {
            util::report(&e);
            failed = true;
        }
    }
    for arg in paths {
        let names = match session.expand_upspin(arg, glob).await {
            Ok(n) => n,
            Err(e) => {
                util::report_anyhow(&e);
                failed = true;
                continue;
            }
        };
        for name in names {
            if let Err(e) = delete_blocks_of(session, &name).await {
                util::report_anyhow(&e);
                failed = true;
            }
        }
    }
    Ok(failed)
}

async fn delete_blocks_of(session: &Session, name: &PathName) -> Result<()> {
    let entry = session.client.lookup(name, true).await?;
    if !entry.is_regular() {
        anyhow::bail!("{name} is not a regular file; deletestorage never recurses");
    }
    for block in &entry.blocks {
        session
            .client
            .store()
            .delete(&block.location.endpoint, &block.location.reference)
            .await?;
    }
    Ok(())
}

/// `config`: prints the active configuration.
pub fn show_config(session: &Session) -> Result<bool> {
    let c = &session.config;
    println!("username: {}", c.user_name);
    if let Some(secrets) = &c.secrets {
        println!("secrets: {}", secrets.display());
    }
    println!("keyserver: {}", c.key_endpoint);
    println!("storeserver: {}", c.store_endpoint);
    println!("dirserver: {}", c.dir_endpoint);
    println!("packing: {}", c.packing);
    println!("blocksize: {}", c.block_size);
    Ok(false)
}

/// `user [name]`: prints a key server record; `--put file` replaces the
/// caller's own record, signed with their factotum.
pub async fn user(session: &Session, name: Option<&str>, put_file: Option<&str>) -> Result<bool> {
    let key_server = session.client.key_server()?;
    if let Some(file) = put_file {
        let text = std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?;
        let record = parse_record(&text)?;
        if record.name != *session.client.user_name() {
            anyhow::bail!("user --put can only update your own record");
        }
        let sig = session.client.factotum().sign(&record.canonical_bytes())?;
        key_server.put(&record, &sig).await?;
        return Ok(false);
    }
    let who = match name {
        Some(n) => upspin_core::user::clean(n)?,
        None => session.client.user_name().clone(),
    };
    let record = key_server.lookup(&who).await?;
    println!("name: {}", record.name);
    for dir in &record.dirs {
        println!("dirserver: {dir}");
    }
    for store in &record.stores {
        println!("storeserver: {store}");
    }
    println!("publickey:");
    print!("{}", record.public_key);
    Ok(false)
}

/// Parses the textual record format `user` prints: `key: value` lines
/// with a trailing multi-line public key.
fn parse_record(text: &str) -> Result<UserRecord> {
    let mut name = None;
    let mut dirs = Vec::new();
    let mut stores = Vec::new();
    let mut key_lines: Option<String> = None;
    for line in text.lines() {
        if let Some(collected) = key_lines.as_mut() {
            collected.push_str(line.trim());
            collected.push('\n');
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "name" => name = Some(upspin_core::user::clean(value.trim())?),
            "dirserver" => dirs.push(value.trim().parse()?),
            "storeserver" => stores.push(value.trim().parse()?),
            "publickey" => key_lines = Some(String::new()),
            _ => {}
        }
    }
    Ok(UserRecord {
        name: name.context("record has no name")?,
        public_key: key_lines.context("record has no publickey")?,
        dirs,
        stores,
    })
}

/// Registers a user record for the first time (used by createsuffixeduser).
pub async fn register_record(session: &Session, record: &UserRecord) -> Result<()> {
    let key_server = session.client.key_server()?;
    let sig = session
        .client
        .factotum()
        .sign(&record.canonical_bytes())
        .unwrap_or(Signature { r: vec![], s: vec![] });
    key_server.put(record, &sig).await?;
    Ok(())
}
