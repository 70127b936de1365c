//! `share` inspects or repairs wrapped-key sets; `repack` rewrites files
//! under a different packing.

use anyhow::Result;
use upspin_client::Sharer;
use upspin_core::PathName;

use crate::cmd::Session;
use crate::cmd::util;

/// `share [--fix] [--force] [-r] [--unencryptforall] path...`
#[allow(clippy::too_many_arguments)]
pub async fn share(
    session: &Session,
    paths: &[String],
    fix: bool,
    force: bool,
    recursive: bool,
    unencrypt_for_all: bool,
    glob: bool,
) -> Result<bool> {
    let mut roots: Vec<PathName> = Vec::new();
    for arg in paths {
        roots.extend(session.expand_upspin(arg, glob).await?);
    }

    let mut sharer = Sharer::new(session.client.clone());
    sharer.fix = fix;
    sharer.force = force;
    sharer.recursive = recursive;
    sharer.unencrypt_for_all = unencrypt_for_all;

    let report = sharer.share(&roots).await;
    for name in &report.repacked {
        println!("rewrapped {name}");
    }
    for name in &report.unencrypted {
        println!("rewrote {name} with eeintegrity");
    }
    for warning in &report.warnings {
        eprintln!("upspin: share: {warning}");
    }
    for (name, err) in &report.errors {
        eprintln!("upspin: share {name}: {err}");
    }
    if !fix && report.repacked.is_empty() && report.errors.is_empty() {
        println!("checked {} files", report.checked);
    }
    Ok(!report.ok())
}

/// `repack [--pack name] [-r] path...`: rewrites files under a
/// different packing, preserving content.
pub async fn repack(
    session: &Session,
    paths: &[String],
    packing: &str,
    recursive: bool,
    glob: bool,
) -> Result<bool> {
    let packing: upspin_core::Packing = packing.parse()?;
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
            if let Err(e) = repack_one(session, &name, packing, recursive).await {
                util::report_anyhow(&e);
                failed = true;
            }
        }
    }
    Ok(failed)
}

async fn repack_one(
    session: &Session,
    name: &PathName,
    packing: upspin_core::Packing,
    recursive: bool,
) -> Result<()> {
    let entry = session.client.lookup(name, true).await?;
    if entry.is_dir() {
        if !recursive {
            anyhow::bail!("{name} is a directory; use -r");
        }
        for child in session.client.walk_tree(name).await? {
            if child.is_regular() && child.packing != packing {
                let data = session.client.get(&child.name).await?;
                session.client.put_packed(&child.name, &data, packing).await?;
                println!("repacked {}", child.name);
            }
        }
        return Ok(());
    }
    if entry.packing != packing {
        let data = session.client.get(&entry.name).await?;
        session.client.put_packed(&entry.name, &data, packing).await?;
        println!("repacked {}", entry.name);
    }
    Ok(())
}
