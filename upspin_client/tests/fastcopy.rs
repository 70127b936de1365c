//! The fast-copy path: `put_duplicate` reuses block references, so the
//! store holds one physical copy under two names, and deletion of either
//! name leaves the other readable.

mod common;

use upspin_core::{Kind, PathName};

#[tokio::test]
async fn duplicate_shares_references() {
    let ann = common::new_user("ann@example.com", "copy-dup", 1).await;
    ann.mkdir(&"ann@example.com/".into()).await.unwrap();
    let src = PathName::from("ann@example.com/src");
    let dst = PathName::from("ann@example.com/dst");
    ann.put(&src, b"copy me cheaply").await.unwrap();

    ann.put_duplicate(&src, &dst).await.unwrap();

    // Same bytes, identical block references.
    assert_eq!(ann.get(&dst).await.unwrap(), b"copy me cheaply");
    let a = ann.lookup(&src, true).await.unwrap();
    let b = ann.lookup(&dst, true).await.unwrap();
    let refs = |e: &upspin_core::DirEntry| {
        e.blocks
            .iter()
            .map(|b| b.location.reference.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(refs(&a), refs(&b));
    assert_eq!(a.signed_name, b.signed_name);

    // Deleting one name does not orphan the other: directory-only.
    ann.delete(&src).await.unwrap();
    assert_eq!(ann.get(&dst).await.unwrap(), b"copy me cheaply");
}

#[tokio::test]
async fn duplicate_failure_modes() {
    let ann = common::new_user("ann@example.com", "copy-fail", 1).await;
    ann.mkdir(&"ann@example.com/".into()).await.unwrap();
    ann.mkdir(&"ann@example.com/dir".into()).await.unwrap();
    ann.put(&"ann@example.com/a".into(), b"a").await.unwrap();
    ann.put(&"ann@example.com/b".into(), b"b").await.unwrap();

    let err = ann
        .put_duplicate(&"ann@example.com/dir".into(), &"ann@example.com/x".into())
        .await
        .unwrap_err();
    assert!(err.is(Kind::IsDir));

    let err = ann
        .put_duplicate(&"ann@example.com/a".into(), &"ann@example.com/b".into())
        .await
        .unwrap_err();
    assert!(err.is(Kind::Exist));

    // A deleted-then-recreated destination takes a fresh sequence.
    ann.delete(&"ann@example.com/b".into()).await.unwrap();
    let recreated = ann
        .put_duplicate(&"ann@example.com/a".into(), &"ann@example.com/b".into())
        .await
        .unwrap();
    let a = ann.lookup(&"ann@example.com/a".into(), true).await.unwrap();
    assert!(recreated.sequence > a.sequence);
}
