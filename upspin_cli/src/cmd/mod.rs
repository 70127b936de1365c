//! Subcommand implementations and dispatch.

use anyhow::{Context, Result};
use upspin_client::Client;
use upspin_core::Config;
use upspin_factotum::Factotum;

mod cp;
mod fs;
mod info;
mod keys;
mod share;
mod util;
mod watch;

/// Everything a subcommand needs: the client session and the resolved
/// config. Built once per invocation and shared by reference.
pub struct Session {
    pub client: Client,
    pub config: Config,
}

impl Session {
    /// Loads the config file and key material into a live session.
    pub fn load(config_path: &std::path::Path, overrides: &ConfigOverrides) -> Result<Session> {
        let mut config = Config::from_file(config_path)
            .with_context(|| format!("loading config {}", config_path.display()))?;
        if let Some(block_size) = overrides.block_size {
            config.block_size = block_size;
        }
        if let Some(cache_size) = overrides.cache_size {
            config.cache_size = cache_size;
        }
        config.prudent |= overrides.prudent;
        config.write_through |= overrides.write_through;

        let secrets = config
            .secrets_dir()
            .context("config names no secrets directory and $HOME is unknown")?;
        let factotum = Factotum::from_dir(&secrets)
            .with_context(|| format!("loading keys from {}", secrets.display()))?;
        Ok(Session {
            client: Client::new(config.clone(), factotum),
            config,
        })
    }
}

/// Global flag values that adjust the config after loading.
#[derive(Default)]
pub struct ConfigOverrides {
    pub block_size: Option<usize>,
    pub cache_size: Option<usize>,
    pub prudent: bool,
    pub write_through: bool,
}

/// Runs one subcommand. Returns whether any per-item operation failed,
/// which turns into exit status 1.
pub async fn run(session: &Session, cmd: crate::Commands) -> Result<bool> {
    use crate::Commands;
    match cmd {
        Commands::Config => info::show_config(session),
        Commands::Countersign => keys::countersign_cmd(session).await,
        Commands::Cp {
            recursive,
            jobs,
            glob,
            args,
        } => cp::cp(session, &args, recursive, jobs, glob).await,
        Commands::Createsuffixeduser { name } => keys::createsuffixeduser(session, &name).await,
        Commands::Deletestorage { refs, paths, glob } => {
            info::deletestorage(session, &refs, &paths, glob).await
        }
        Commands::Get { output, glob, path } => {
            fs::get(session, &path, output.as_deref(), glob).await
        }
        Commands::Getref { output, reference } => {
            info::getref(session, &reference, output.as_deref()).await
        }
        Commands::Info { glob, paths } => info::info(session, &paths, glob).await,
        Commands::Keygen { .. } => unreachable!("keygen runs before session setup"),
        Commands::Link { original, link_name } => fs::link(session, &original, &link_name).await,
        Commands::Ls {
            long,
            recursive,
            glob,
            paths,
        } => fs::ls(session, &paths, long, recursive, glob).await,
        Commands::Mkdir { glob, paths } => fs::mkdir(session, &paths, glob).await,
        Commands::Put { input, path } => fs::put(session, &path, input.as_deref()).await,
        Commands::Repack {
            pack,
            recursive,
            glob,
            paths,
        } => share::repack(session, &paths, &pack, recursive, glob).await,
        Commands::Rm {
            recursive,
            force,
            glob,
            paths,
        } => fs::rm(session, &paths, recursive, force, glob).await,
        Commands::Rotate => keys::rotate_cmd(session).await,
        Commands::Share {
            fix,
            force,
            recursive,
            unencryptforall,
            glob,
            paths,
        } => share::share(session, &paths, fix, force, recursive, unencryptforall, glob).await,
        Commands::Snapshot => watch::snapshot(session).await,
        Commands::Tar { path, archive, glob } => cp::tar(session, &path, &archive, glob).await,
        Commands::User { put, name } => info::user(session, name.as_deref(), put.as_deref()).await,
        Commands::Watch { sequence, path } => watch::watch(session, &path, sequence).await,
        Commands::Whichaccess { glob, paths } => info::whichaccess(session, &paths, glob).await,
    }
}

/// Runs the subcommands that need no config or keys.
pub fn run_standalone(cmd: &crate::Commands) -> Option<Result<bool>> {
    match cmd {
        crate::Commands::Keygen {
            where_dir,
            curve,
            secretseed,
            rotate,
            force,
        } => Some(keys::keygen_cmd(
            where_dir.as_deref(),
            curve,
            secretseed.as_deref(),
            *rotate,
            *force,
        )),
        _ => None,
    }
}
