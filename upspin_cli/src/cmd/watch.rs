//! `watch` streams directory events; `snapshot` asks for one.

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::cmd::Session;

/// `watch [--sequence n] path`: prints events until interrupted.
pub async fn watch(session: &Session, path: &str, sequence: i64) -> Result<bool> {
    let name = session.expand_at(path)?;
    let parsed = upspin_core::Parsed::parse(&name)?;
    let dir = session.client.dir_for(parsed.user()).await?;

    let cancel = CancellationToken::new();
    let mut events = dir.watch(&name, sequence, cancel.clone()).await?;

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    while let Some(event) = events.recv().await {
        if let Some(err) = &event.error {
            eprintln!("upspin: watch: {err}");
            break;
        }
        let verb = if event.delete { "delete" } else { "put" };
        println!("{verb}\t{}\tseq {}", event.entry.name, event.entry.sequence);
    }
    Ok(false)
}

/// `snapshot`: asks the directory to snapshot the user's tree.
pub async fn snapshot(session: &Session) -> Result<bool> {
    session.client.take_snapshot().await?;
    let parsed = upspin_core::user::parse(session.client.user_name().as_str())?;
    println!(
        "snapshot requested; see {}/",
        parsed.with_suffix(upspin_core::user::SNAPSHOT_SUFFIX)
    );
    Ok(false)
}
