//! Key lifecycle subcommands: keygen, countersign, rotate,
//! createsuffixeduser.

use std::path::PathBuf;

use anyhow::{Context, Result};
use upspin_client::countersign;
use upspin_core::UserRecord;
use upspin_factotum::keygen::{self, SaveMode};
use upspin_factotum::{Curve, Factotum};

use crate::cmd::Session;
use crate::cmd::util;

/// `keygen [--curve name] [--secretseed proquint] [--rotate | --force] [dir]`
///
/// Runs without a config file; only the secrets directory matters.
pub fn keygen_cmd(
    where_dir: Option<&str>,
    curve_name: &str,
    seed: Option<&str>,
    rotate: bool,
    force: bool,
) -> Result<bool> {
    let curve = Curve::from_name(curve_name)?;
    let dir: PathBuf = match where_dir {
        Some(d) => PathBuf::from(d),
        None => upspin_core::config::default_secrets_dir()
            .context("cannot determine $HOME for the secrets directory")?,
    };
    let mode = match (rotate, force) {
        (true, true) => anyhow::bail!("keygen takes at most one of --rotate and --force"),
        (true, false) => SaveMode::Rotate,
        (false, true) => SaveMode::Force,
        (false, false) => SaveMode::Fresh,
    };
    let generated = keygen::generate(curve, seed)?;
    keygen::save(&dir, &generated, mode)?;
    println!("Keys written to {}.", dir.display());
    if seed.is_none() {
        println!(
            "Your secret seed is:\n\t{}\nWrite it down and keep it somewhere safe; \
             it regenerates these keys.",
            generated.proquint
        );
    }
    Ok(false)
}

/// `countersign`: step 2 of rotation.
pub async fn countersign_cmd(session: &Session) -> Result<bool> {
    let report = countersign::countersign(&session.client).await?;
    for name in &report.signed {
        println!("countersigned {name}");
    }
    for (name, err) in &report.errors {
        eprintln!("upspin: countersign {name}: {err}");
    }
    Ok(!report.ok())
}

/// `rotate`: register the new key, authenticated by the old one.
pub async fn rotate_cmd(session: &Session) -> Result<bool> {
    countersign::rotate(&session.client).await?;
    println!(
        "Key server now holds the new key for {}.",
        session.client.user_name()
    );
    println!("Finish with: upspin share --fix -r {}/", session.client.user_name());
    Ok(false)
}

/// `createsuffixeduser name+suffix@domain`: fresh keys, a key server
/// record, and a config file for the suffixed user.
pub async fn createsuffixeduser(session: &Session, name: &str) -> Result<bool> {
    let parsed = upspin_core::user::parse(name)?;
    if parsed.suffix.is_empty() {
        anyhow::bail!("{name} has no +suffix");
    }
    if parsed.base() != *session.client.user_name() {
        anyhow::bail!(
            "{name} is not a suffixed form of {}",
            session.client.user_name()
        );
    }
    let user = parsed.user_name();

    // Keys live beside the base user's, in a per-user subdirectory.
    let secrets_root = session
        .config
        .secrets_dir()
        .context("config has no secrets directory")?;
    let secrets = secrets_root.join(user.as_str());
    let generated = keygen::generate(session.client.factotum().public_key().curve(), None)?;
    keygen::save(&secrets, &generated, SaveMode::Fresh)?;

    let record = UserRecord {
        name: user.clone(),
        public_key: generated.pair.public().text().to_string(),
        dirs: vec![session.config.dir_endpoint.clone()],
        stores: vec![session.config.store_endpoint.clone()],
    };
    crate::cmd::info::register_record(session, &record).await?;

    // A config file the new identity can run with.
    let config_text = format!(
        "username: {user}\nsecrets: {}\nkeyserver: {}\nstoreserver: {}\ndirserver: {}\npacking: {}\n",
        secrets.display(),
        session.config.key_endpoint,
        session.config.store_endpoint,
        session.config.dir_endpoint,
        session.config.packing,
    );
    let config_path = config_path_for_suffix(&parsed.suffix)?;
    std::fs::write(&config_path, config_text)
        .with_context(|| format!("writing {}", config_path.display()))?;
    println!("Created {user}; config written to {}.", config_path.display());

    // Give the new user a root so it is usable immediately.
    let factotum = Factotum::from_dir(&secrets)?;
    let mut config = upspin_core::Config::new(user.clone());
    config.key_endpoint = session.config.key_endpoint.clone();
    config.store_endpoint = session.config.store_endpoint.clone();
    config.dir_endpoint = session.config.dir_endpoint.clone();
    config.packing = session.config.packing;
    let client = upspin_client::Client::new(config, factotum);
    if let Err(e) = client.mkdir(&format!("{user}/").as_str().into()).await {
        util::report(&e);
        return Ok(true);
    }
    Ok(false)
}

fn config_path_for_suffix(suffix: &str) -> Result<PathBuf> {
    let base = upspin_core::config::default_config_path()
        .context("cannot determine $HOME for the config file")?;
    Ok(base.with_file_name(format!("config.{suffix}")))
}
