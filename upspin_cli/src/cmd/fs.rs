//! File and directory subcommands: ls, get, put, mkdir, rm, link.

use anyhow::Result;
use upspin_core::Kind;

use crate::cmd::Session;
use crate::cmd::util;

/// `ls [-l] [-R] [path...]`
pub async fn ls(
    session: &Session,
    paths: &[String],
    long: bool,
    recursive: bool,
    glob: bool,
) -> Result<bool> {
    let args: Vec<String> = if paths.is_empty() {
        vec!["@".to_string()]
    } else {
        paths.to_vec()
    };
    let mut failed = false;
    for arg in &args {
        let names = match session.expand_upspin(arg, glob).await {
            Ok(names) => names,
            Err(e) => {
                util::report_anyhow(&e);
                failed = true;
                continue;
            }
        };
        for name in names {
            if let Err(e) = ls_one(session, &name, long, recursive).await {
                util::report_anyhow(&e);
                failed = true;
            }
        }
    }
    Ok(failed)
}

async fn ls_one(
    session: &Session,
    name: &upspin_core::PathName,
    long: bool,
    recursive: bool,
) -> Result<()> {
    let entry = session.client.lookup(name, false).await?;
    let mut dirs = Vec::new();
    if entry.is_dir() {
        dirs.push(entry.name.clone());
    } else {
        print_entry(&entry, long);
    }
    while let Some(dir) = dirs.pop() {
        let children = session.client.glob(&format!("{dir}/*")).await?;
        for child in &children {
            print_entry(child, long);
            if recursive && child.is_dir() {
                dirs.push(child.name.clone());
            }
        }
    }
    Ok(())
}

fn print_entry(entry: &upspin_core::DirEntry, long: bool) {
    if long {
        println!("{}", util::long_line(entry));
    } else {
        println!("{}", entry.name);
    }
}

/// `get [-o file] path`
pub async fn get(session: &Session, path: &str, output: Option<&str>, glob: bool) -> Result<bool> {
    let names = session.expand_upspin(path, glob).await?;
    if names.len() != 1 {
        anyhow::bail!("get requires exactly one path, {} match {path}", names.len());
    }
    let data = session.client.get(&names[0]).await?;
    match output {
        Some(file) => std::fs::write(file, &data)?,
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&data)?;
        }
    }
    Ok(false)
}

/// `put [-i file] path`: writes stdin (or a local file) to an upspin path.
pub async fn put(session: &Session, path: &str, input: Option<&str>) -> Result<bool> {
    // The destination of a put is never globbed; it may not exist yet.
    let name = session.expand_at(path)?;
    let data = match input {
        Some(file) => std::fs::read(file)?,
        None => {
            use std::io::Read;
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    session.client.put(&name, &data).await?;
    Ok(false)
}

/// `mkdir path...`
pub async fn mkdir(session: &Session, paths: &[String], glob: bool) -> Result<bool> {
    let mut failed = false;
    for arg in paths {
        // Globbing a mkdir target only makes sense for existing parents;
        // with -glob=false the name is taken literally.
        let name = if glob {
            match session.expand_upspin(arg, false).await {
                Ok(mut names) => names.remove(0),
                Err(e) => {
                    util::report_anyhow(&e);
                    failed = true;
                    continue;
                }
            }
        } else {
            session.expand_at(arg)?
        };
        if let Err(e) = session.client.mkdir(&name).await {
            util::report(&e);
            failed = true;
        }
    }
    Ok(failed)
}

/// `rm [-R] [-f] path...`
pub async fn rm(
    session: &Session,
    paths: &[String],
    recursive: bool,
    force: bool,
    glob: bool,
) -> Result<bool> {
    let mut failed = false;
    for arg in paths {
        let names = match session.expand_upspin(arg, glob).await {
            Ok(names) => names,
            Err(e) => {
                util::report_anyhow(&e);
                failed = true;
                continue;
            }
        };
        for name in names {
            if let Err(e) = rm_one(session, &name, recursive).await {
                util::report_anyhow(&e);
                // -f downgrades failures to reports.
                if !force {
                    failed = true;
                }
            }
        }
    }
    Ok(failed)
}

async fn rm_one(session: &Session, name: &upspin_core::PathName, recursive: bool) -> Result<()> {
    match session.client.delete(name).await {
        Ok(_) => Ok(()),
        Err(e) if e.is(Kind::NotEmpty) && recursive => {
            let children = session.client.glob(&format!("{name}/*")).await?;
            for child in children {
                Box::pin(rm_one(session, &child.name, recursive)).await?;
            }
            session.client.delete(name).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// `link original link_name`
pub async fn link(session: &Session, original: &str, link_name: &str) -> Result<bool> {
    let target = session.expand_at(original)?;
    let name = session.expand_at(link_name)?;
    session.client.put_link(&target, &name).await?;
    Ok(false)
}
