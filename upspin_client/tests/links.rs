//! Link semantics: following, no-follow, broken targets, and the hop
//! bound that turns cycles into `LinkLoop` instead of a hang.

mod common;

use upspin_core::entry::Attribute;
use upspin_core::{Kind, PathName};

#[tokio::test]
async fn link_to_file_follows_and_deletes_independently() {
    let ann = common::new_user("ann@example.com", "links-basic", 1).await;
    ann.mkdir(&"ann@example.com/".into()).await.unwrap();
    ann.mkdir(&"ann@example.com/Public".into()).await.unwrap();
    ann.put(&"ann@example.com/Public/photo.jpg".into(), b"jpeg bytes")
        .await
        .unwrap();

    ann.put_link(
        &"ann@example.com/Public/photo.jpg".into(),
        &"ann@example.com/tmp.jpg".into(),
    )
    .await
    .unwrap();

    // Reading through the link yields the target's bytes.
    assert_eq!(
        ann.get(&"ann@example.com/tmp.jpg".into()).await.unwrap(),
        b"jpeg bytes"
    );

    // No-follow lookup sees the link itself.
    let entry = ann
        .lookup(&"ann@example.com/tmp.jpg".into(), false)
        .await
        .unwrap();
    assert_eq!(entry.attr, Attribute::Link);
    assert_eq!(
        entry.link.as_ref().unwrap().as_str(),
        "ann@example.com/Public/photo.jpg"
    );

    // Removing the link removes only the link.
    ann.delete(&"ann@example.com/tmp.jpg".into()).await.unwrap();
    assert_eq!(
        ann.get(&"ann@example.com/Public/photo.jpg".into())
            .await
            .unwrap(),
        b"jpeg bytes"
    );
}

#[tokio::test]
async fn mid_path_links_resolve() {
    let ann = common::new_user("ann@example.com", "links-mid", 1).await;
    ann.mkdir(&"ann@example.com/".into()).await.unwrap();
    ann.mkdir(&"ann@example.com/real".into()).await.unwrap();
    ann.put(&"ann@example.com/real/f".into(), b"via link").await.unwrap();
    ann.put_link(
        &"ann@example.com/real".into(),
        &"ann@example.com/alias".into(),
    )
    .await
    .unwrap();

    assert_eq!(
        ann.get(&"ann@example.com/alias/f".into()).await.unwrap(),
        b"via link"
    );
    // The followed lookup reports the resolved name.
    let entry = ann
        .lookup(&"ann@example.com/alias/f".into(), true)
        .await
        .unwrap();
    assert_eq!(entry.name.as_str(), "ann@example.com/real/f");
}

#[tokio::test]
async fn broken_link_reports_broken_kind() {
    let ann = common::new_user("ann@example.com", "links-broken", 1).await;
    ann.mkdir(&"ann@example.com/".into()).await.unwrap();
    ann.put_link(
        &"ann@example.com/nowhere".into(),
        &"ann@example.com/dangling".into(),
    )
    .await
    .unwrap();

    let err = ann
        .lookup(&"ann@example.com/dangling".into(), true)
        .await
        .unwrap_err();
    assert!(err.is(Kind::BrokenLink));
    let carried = err.link_entry().unwrap();
    assert_eq!(carried.name.as_str(), "ann@example.com/dangling");
}

#[tokio::test]
async fn a_cycle_of_links_fails_with_link_loop() {
    let ann = common::new_user("ann@example.com", "links-loop", 1).await;
    ann.mkdir(&"ann@example.com/".into()).await.unwrap();

    // A chain of 21 links closing back on itself.
    for i in 0..21 {
        let target = PathName::from(format!("ann@example.com/l{}", (i + 1) % 21));
        let name = PathName::from(format!("ann@example.com/l{i}"));
        ann.put_link(&target, &name).await.unwrap();
    }

    let err = ann
        .lookup(&"ann@example.com/l0".into(), true)
        .await
        .unwrap_err();
    assert!(err.is(Kind::LinkLoop), "got {err}");
}
