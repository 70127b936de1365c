//! `cp` across the local/upspin boundary, and `tar` for archiving a tree.
//!
//! The recursive copy is a bounded pipeline: one walk of the sources
//! produces (source, destination) work items, then a small worker pool
//! drains them. Upspin-to-upspin copies try the duplicate fast path first
//! and fall back to streaming bytes.

use anyhow::{Context, Result};
use futures::StreamExt;
use futures::stream;
use upspin_core::Kind;

use crate::cmd::Session;
use crate::cmd::util::{self, Target};

/// Upper bound on cp workers, whatever the flag says.
const MAX_JOBS: usize = 8;

struct WorkItem {
    src: Target,
    dst: Target,
}

/// `cp [-R] [-j jobs] source... destination`
pub async fn cp(
    session: &Session,
    args: &[String],
    recursive: bool,
    jobs: usize,
    glob: bool,
) -> Result<bool> {
    if args.len() < 2 {
        anyhow::bail!("cp requires at least a source and a destination");
    }
    let (sources, dest) = args.split_at(args.len() - 1);
    let dest = session.classify(&dest[0])?;

    // Expand sources: globs for upspin, literal for local.
    let mut expanded: Vec<Target> = Vec::new();
    for arg in sources {
        match session.classify(arg)? {
            Target::Upspin(_) => {
                for name in session.expand_upspin(arg, glob).await? {
                    expanded.push(Target::Upspin(name));
                }
            }
            local => expanded.push(local),
        }
    }

    let multiple = expanded.len() > 1;
    let mut items = Vec::new();
    for src in expanded {
        collect_items(session, src, &dest, recursive, multiple, &mut items).await?;
    }

    // Drain the queue with a bounded pool.
    let jobs = jobs.clamp(1, MAX_JOBS);
    let failures: usize = stream::iter(items)
        .map(|item| async move {
            match copy_one(session, &item).await {
                Ok(()) => 0usize,
                Err(e) => {
                    util::report_anyhow(&e);
                    1
                }
            }
        })
        .buffer_unordered(jobs)
        .fold(0, |acc, n| async move { acc + n })
        .await;
    Ok(failures > 0)
}

/// Destination for one source under a directory destination.
fn dest_join(dest: &Target, base: &str) -> Result<Target> {
    Ok(match dest {
        Target::Local(path) => Target::Local(path.join(base)),
        Target::Upspin(name) => {
            Target::Upspin(upspin_core::path::join(name, &[base])?)
        }
    })
}

async fn dest_is_dir(session: &Session, dest: &Target) -> bool {
    match dest {
        Target::Local(path) => path.is_dir(),
        Target::Upspin(name) => matches!(
            session.client.lookup(name, true).await,
            Ok(entry) if entry.is_dir()
        ),
    }
}

async fn collect_items(
    session: &Session,
    src: Target,
    dest: &Target,
    recursive: bool,
    multiple: bool,
    items: &mut Vec<WorkItem>,
) -> Result<()> {
    match &src {
        Target::Local(path) => {
            if path.is_dir() {
                if !recursive {
                    anyhow::bail!("{} is a directory; use -R", path.display());
                }
                let base = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let sub_dest = dest_join(dest, &base)?;
                make_dir(session, &sub_dest).await?;
                for child in std::fs::read_dir(path)? {
                    let child = child?;
                    Box::pin(collect_items(
                        session,
                        Target::Local(child.path()),
                        &sub_dest,
                        recursive,
                        true,
                        items,
                    ))
                    .await?;
                }
            } else {
                let dst = resolve_file_dest(session, dest, path_base_local(path), multiple).await?;
                items.push(WorkItem { src, dst });
            }
        }
        Target::Upspin(name) => {
            let entry = session.client.lookup(name, true).await?;
            if entry.is_dir() {
                if !recursive {
                    anyhow::bail!("{name} is a directory; use -R");
                }
                let parsed = upspin_core::Parsed::parse(&entry.name)?;
                let sub_dest = dest_join(dest, &parsed.base())?;
                make_dir(session, &sub_dest).await?;
                for child in session.client.glob(&format!("{}/*", entry.name)).await? {
                    Box::pin(collect_items(
                        session,
                        Target::Upspin(child.name.clone()),
                        &sub_dest,
                        recursive,
                        true,
                        items,
                    ))
                    .await?;
                }
            } else {
                let parsed = upspin_core::Parsed::parse(&entry.name)?;
                let dst = resolve_file_dest(session, dest, parsed.base(), multiple).await?;
                items.push(WorkItem {
                    src: Target::Upspin(entry.name),
                    dst,
                });
            }
        }
    }
    Ok(())
}

fn path_base_local(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

async fn resolve_file_dest(
    session: &Session,
    dest: &Target,
    base: String,
    multiple: bool,
) -> Result<Target> {
    if multiple || dest_is_dir(session, dest).await {
        dest_join(dest, &base)
    } else {
        Ok(dest.clone())
    }
}

async fn make_dir(session: &Session, dest: &Target) -> Result<()> {
    match dest {
        Target::Local(path) => {
            std::fs::create_dir_all(path)
                .with_context(|| format!("creating {}", path.display()))?;
        }
        Target::Upspin(name) => match session.client.mkdir(name).await {
            Ok(_) => {}
            Err(e) if e.is(Kind::Exist) => {}
            Err(e) => return Err(e.into()),
        },
    }
    Ok(())
}

async fn copy_one(session: &Session, item: &WorkItem) -> Result<()> {
    // Upspin to upspin: try the same-reference fast path first.
    if let (Target::Upspin(src), Target::Upspin(dst)) = (&item.src, &item.dst) {
        match session.client.put_duplicate(src, dst).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is(Kind::Exist) || e.is(Kind::IsDir) => {
                // Fall back to a streaming copy below.
            }
            Err(e) => return Err(e.into()),
        }
    }
    let data = util::read_target(session, &item.src).await?;
    match &item.dst {
        Target::Local(path) => {
            std::fs::write(path, &data).with_context(|| format!("writing {}", path.display()))?;
        }
        Target::Upspin(name) => {
            // Overwrite semantics for the fallback path; a failed delete
            // just means the name was free.
            let _ = session.client.delete(name).await;
            session.client.put(name, &data).await?;
        }
    }
    Ok(())
}

/// `tar path archive.tar`: archives a subtree's regular files into a
/// local tarball. Links are skipped with a note; their targets are
/// reachable by their own names.
pub async fn tar(session: &Session, path: &str, archive: &str, glob: bool) -> Result<bool> {
    let names = session.expand_upspin(path, glob).await?;
    if names.len() != 1 {
        anyhow::bail!("tar requires exactly one tree root");
    }
    let root = &names[0];
    let root_parsed = upspin_core::Parsed::parse(root)?;

    let file = std::fs::File::create(archive)
        .with_context(|| format!("creating {archive}"))?;
    let mut builder = tar::Builder::new(file);

    let mut failed = false;
    let entries = session.client.walk_tree(root).await?;
    for entry in entries {
        if entry.is_link() {
            eprintln!("upspin: tar: skipping link {}", entry.name);
            continue;
        }
        if !entry.is_regular() {
            continue;
        }
        let data = match session.client.get(&entry.name).await {
            Ok(data) => data,
            Err(e) => {
                util::report(&e);
                failed = true;
                continue;
            }
        };
        let parsed = upspin_core::Parsed::parse(&entry.name)?;
        let relative = relative_to(&root_parsed, &parsed);
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(entry.time.max(0) as u64);
        header.set_cksum();
        builder.append_data(&mut header, &relative, data.as_slice())?;
    }
    builder.finish()?;
    Ok(failed)
}

fn relative_to(root: &upspin_core::Parsed, full: &upspin_core::Parsed) -> String {
    let mut elems = Vec::new();
    if root.nelem() > 0 {
        elems.push(root.base());
    }
    for i in root.nelem()..full.nelem() {
        elems.push(full.elem(i).to_string());
    }
    if elems.is_empty() {
        full.user().as_str().to_string()
    } else {
        elems.join("/")
    }
}
