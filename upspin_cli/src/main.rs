//! The `upspin` command: access the Upspin namespace from the shell.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use upspin_client::bind;
use upspin_core::Transport;

mod cmd;

#[derive(Parser)]
#[command(name = "upspin", version, about = "access Upspin files", long_about = None)]
struct Cli {
    /// Config file
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level: debug, info, error, or disabled
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log: String,

    /// Size in bytes of the blocks written to the store
    #[arg(long, value_name = "BYTES", global = true)]
    blocksize: Option<usize>,

    /// Bound on cached Access and Group entries
    #[arg(long, value_name = "ENTRIES", global = true)]
    cachesize: Option<usize>,

    /// Verify sequence numbers on writes
    #[arg(long, global = true)]
    prudent: bool,

    /// Do not defer writes
    #[arg(long, global = true)]
    writethrough: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the active configuration
    Config,
    /// Add signatures under a newly rotated key
    Countersign,
    /// Copy files between local and Upspin paths
    Cp {
        #[arg(short = 'R', long)]
        recursive: bool,
        /// Concurrent copies
        #[arg(short, long, default_value_t = 4)]
        jobs: usize,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        glob: bool,
        /// Sources then destination
        #[arg(required = true, num_args = 2..)]
        args: Vec<String>,
    },
    /// Create a suffixed variant of the current user
    Createsuffixeduser { name: String },
    /// Delete store blocks by reference or by path
    Deletestorage {
        #[arg(long = "ref", value_name = "REFERENCE")]
        refs: Vec<String>,
        #[arg(long = "path", value_name = "PATH")]
        paths: Vec<String>,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        glob: bool,
    },
    /// Print the contents of a file
    Get {
        /// Write to a local file instead of standard output
        #[arg(short, long, value_name = "FILE")]
        output: Option<String>,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        glob: bool,
        path: String,
    },
    /// Fetch one raw block by reference
    Getref {
        #[arg(short, long, value_name = "FILE")]
        output: Option<String>,
        reference: String,
    },
    /// Print directory entries in full
    Info {
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        glob: bool,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Generate or rotate a keypair
    Keygen {
        /// Secrets directory (default $HOME/.ssh)
        #[arg(long = "where", value_name = "DIR")]
        where_dir: Option<String>,
        #[arg(long, default_value = "p256")]
        curve: String,
        /// Regenerate from a proquint seed
        #[arg(long, value_name = "SEED")]
        secretseed: Option<String>,
        /// Archive the current pair and replace it
        #[arg(long)]
        rotate: bool,
        /// Overwrite without archiving
        #[arg(long)]
        force: bool,
    },
    /// Create a link to a file or directory
    Link {
        original: String,
        link_name: String,
    },
    /// List directory contents
    Ls {
        #[arg(short, long)]
        long: bool,
        #[arg(short = 'R', long)]
        recursive: bool,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        glob: bool,
        paths: Vec<String>,
    },
    /// Create directories
    Mkdir {
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        glob: bool,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Write standard input (or a local file) to a path
    Put {
        /// Read from a local file instead of standard input
        #[arg(short, long, value_name = "FILE")]
        input: Option<String>,
        path: String,
    },
    /// Rewrite files under a different packing
    Repack {
        #[arg(long, default_value = "ee")]
        pack: String,
        #[arg(short, long)]
        recursive: bool,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        glob: bool,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Remove entries
    Rm {
        #[arg(short = 'R', long)]
        recursive: bool,
        /// Report failures but keep the exit status clean
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        glob: bool,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Register a rotated key with the key server
    Rotate,
    /// Inspect or repair wrapped keys against Access files
    Share {
        #[arg(long)]
        fix: bool,
        #[arg(long)]
        force: bool,
        #[arg(short, long)]
        recursive: bool,
        /// Rewrite read:all files with eeintegrity
        #[arg(long)]
        unencryptforall: bool,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        glob: bool,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Request a snapshot of the user's tree
    Snapshot,
    /// Archive a tree into a local tar file
    Tar {
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        glob: bool,
        path: String,
        archive: String,
    },
    /// Print or update a key server record
    User {
        /// Push a record read from a file
        #[arg(long, value_name = "FILE")]
        put: Option<String>,
        name: Option<String>,
    },
    /// Stream directory events
    Watch {
        /// Starting sequence; -1 replays current state first
        #[arg(long, default_value_t = -1)]
        sequence: i64,
        path: String,
    },
    /// Show which Access file governs a path
    Whichaccess {
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        glob: bool,
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    use tracing_subscriber::filter::LevelFilter;
    let level = match level {
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "error" => LevelFilter::ERROR,
        "disabled" => LevelFilter::OFF,
        other => anyhow::bail!("unknown log level {other:?}"),
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli.log) {
        eprintln!("upspin: {e}");
        std::process::exit(2);
    }

    // Transports must be registered before the first dial.
    if let Err(e) = bind::register(
        Transport::InProcess,
        bind::Dialers {
            dir: upspin_inprocess::dial_dir,
            store: upspin_inprocess::dial_store,
            key: upspin_inprocess::dial_key,
        },
    ) {
        eprintln!("upspin: {e}");
        std::process::exit(1);
    }

    // Keygen runs without config or keys.
    if let Some(result) = cmd::run_standalone(&cli.cmd) {
        exit_with(result);
    }

    let session = match load_session(&cli) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("upspin: {e:#}");
            std::process::exit(1);
        }
    };
    exit_with(cmd::run(&session, cli.cmd).await);
}

fn load_session(cli: &Cli) -> anyhow::Result<cmd::Session> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => upspin_core::config::default_config_path()
            .context("cannot determine $HOME; pass --config")?,
    };
    let overrides = cmd::ConfigOverrides {
        block_size: cli.blocksize,
        cache_size: cli.cachesize,
        prudent: cli.prudent,
        write_through: cli.writethrough,
    };
    cmd::Session::load(&config_path, &overrides)
}

fn exit_with(result: anyhow::Result<bool>) -> ! {
    match result {
        Ok(false) => std::process::exit(0),
        // Some per-item operations failed and were reported.
        Ok(true) => std::process::exit(1),
        Err(e) => {
            match e.downcast_ref::<upspin_core::Error>() {
                Some(err)
                    if err.is(upspin_core::Kind::Permission)
                        || err.is(upspin_core::Kind::Private) =>
                {
                    // One message for both: never distinguish existence
                    // from readability.
                    match err.path_name() {
                        Some(path) => eprintln!("upspin: {path}: information withheld"),
                        None => eprintln!("upspin: information withheld"),
                    }
                }
                _ => eprintln!("upspin: {e:#}"),
            }
            std::process::exit(1)
        }
    }
}
