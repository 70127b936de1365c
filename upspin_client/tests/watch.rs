//! The watch stream: current-state replay, live events in order, and
//! cooperative cancellation.

mod common;

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use upspin_core::PathName;

async fn next_event(
    rx: &mut tokio::sync::mpsc::Receiver<upspin_core::WatchEvent>,
) -> Option<upspin_core::WatchEvent> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for watch event")
}

#[tokio::test]
async fn replay_then_live_then_cancel() {
    let ann = common::new_user("ann@example.com", "watch-basic", 1).await;
    ann.mkdir(&"ann@example.com/".into()).await.unwrap();
    ann.mkdir(&"ann@example.com/w".into()).await.unwrap();
    ann.put(&"ann@example.com/w/pre".into(), b"existing").await.unwrap();

    let dir = ann.dir_for(&"ann@example.com".into()).await.unwrap();
    let cancel = CancellationToken::new();
    let mut rx = dir
        .watch(&"ann@example.com/w".into(), -1, cancel.clone())
        .await
        .unwrap();

    // Replay: the watched directory and its file, in tree order.
    let first = next_event(&mut rx).await.unwrap();
    assert_eq!(first.entry.name.as_str(), "ann@example.com/w");
    let second = next_event(&mut rx).await.unwrap();
    assert_eq!(second.entry.name.as_str(), "ann@example.com/w/pre");
    assert!(!second.delete);

    // Live events arrive for the subtree only, in sequence order.
    ann.put(&"ann@example.com/elsewhere".into(), b"x").await.unwrap();
    ann.put(&"ann@example.com/w/live".into(), b"new").await.unwrap();
    let live = next_event(&mut rx).await.unwrap();
    assert_eq!(live.entry.name.as_str(), "ann@example.com/w/live");
    assert!(!live.delete);

    let seq_before = live.entry.sequence;
    ann.delete(&"ann@example.com/w/live".into()).await.unwrap();
    let gone = next_event(&mut rx).await.unwrap();
    assert!(gone.delete);
    assert_eq!(gone.entry.name.as_str(), "ann@example.com/w/live");
    assert_eq!(gone.entry.sequence, seq_before);

    // Cancellation ends the stream.
    cancel.cancel();
    let end = next_event(&mut rx).await;
    assert!(end.is_none());
}

#[tokio::test]
async fn watch_from_now_skips_replay() {
    let ann = common::new_user("ann@example.com", "watch-now", 1).await;
    ann.mkdir(&"ann@example.com/".into()).await.unwrap();
    ann.put(&"ann@example.com/old".into(), b"old").await.unwrap();

    let dir = ann.dir_for(&"ann@example.com".into()).await.unwrap();
    let cancel = CancellationToken::new();
    let mut rx = dir
        .watch(&PathName::from("ann@example.com/"), 0, cancel.clone())
        .await
        .unwrap();

    ann.put(&"ann@example.com/new".into(), b"new").await.unwrap();
    let event = next_event(&mut rx).await.unwrap();
    assert_eq!(event.entry.name.as_str(), "ann@example.com/new");
    cancel.cancel();
}
