//! Rotation safety: after keygen-rotate, countersign, rotate, and a
//! recursive share -fix, the holder reads everything they could read
//! before, and unchanged readers keep reading too.

mod common;

use upspin_client::{Sharer, countersign};
use upspin_core::PathName;
use upspin_factotum::{Curve, Factotum, keygen};

#[tokio::test]
async fn full_rotation_sequence() {
    const WORLD: &str = "rotate-seq";

    // Ann's keys live on disk so the rotation archive works end to end.
    let secrets = tempfile::tempdir().unwrap();
    let first = keygen::generate(Curve::P256, None).unwrap();
    keygen::save(secrets.path(), &first, keygen::SaveMode::Fresh).unwrap();
    let old_factotum = Factotum::from_dir(secrets.path()).unwrap();

    common::register_transport();
    let config = common::config_for("ann@example.com", WORLD);
    let ann = upspin_client::Client::new(config.clone(), old_factotum.clone());
    let record = upspin_core::UserRecord {
        name: "ann@example.com".into(),
        public_key: old_factotum.public_key().text().to_string(),
        dirs: vec![config.dir_endpoint.clone()],
        stores: vec![config.store_endpoint.clone()],
    };
    ann.key_server()
        .unwrap()
        .put(&record, &upspin_core::Signature { r: vec![], s: vec![] })
        .await
        .unwrap();

    let kelly = common::new_user("kelly@example.com", WORLD, 9).await;

    // Seed a tree, shared with kelly.
    ann.mkdir(&"ann@example.com/".into()).await.unwrap();
    ann.mkdir(&"ann@example.com/docs".into()).await.unwrap();
    ann.put(&"ann@example.com/docs/a".into(), b"file a").await.unwrap();
    ann.put(&"ann@example.com/docs/b".into(), b"file b").await.unwrap();
    ann.put(
        &"ann@example.com/docs/Access".into(),
        b"r,l: kelly@example.com\n*: ann@example.com\n",
    )
    .await
    .unwrap();
    let mut sharer = Sharer::new(ann.clone());
    sharer.fix = true;
    sharer.recursive = true;
    assert!(sharer.share(&["ann@example.com/docs".into()]).await.ok());
    assert_eq!(
        kelly.get(&"ann@example.com/docs/a".into()).await.unwrap(),
        b"file a"
    );

    // Step 1: keygen -rotate. The factotum now holds both keys.
    let second = keygen::generate(Curve::P256, None).unwrap();
    keygen::save(secrets.path(), &second, keygen::SaveMode::Rotate).unwrap();
    let new_factotum = Factotum::from_dir(secrets.path()).unwrap();
    assert!(new_factotum.has_previous());
    let ann = upspin_client::Client::new(config.clone(), new_factotum.clone());

    // Step 2: countersign everything ann wrote.
    let report = countersign::countersign(&ann).await.unwrap();
    assert!(report.ok(), "countersign errors: {:?}", report.errors);
    assert!(!report.signed.is_empty());

    // Step 3: register the new key, authenticated by the old one.
    countersign::rotate(&ann).await.unwrap();
    let held = ann
        .key_server()
        .unwrap()
        .lookup(&"ann@example.com".into())
        .await
        .unwrap();
    assert_eq!(held.public_key, new_factotum.public_key().text());

    // Step 4: share -r -fix rewraps under the new key.
    let mut sharer = Sharer::new(ann.clone());
    sharer.fix = true;
    sharer.recursive = true;
    let report = sharer.share(&["ann@example.com/".into()]).await;
    assert!(report.ok(), "share errors: {:?}", report.errors);

    // The holder still reads everything.
    for (name, want) in [
        ("ann@example.com/docs/a", b"file a".as_slice()),
        ("ann@example.com/docs/b", b"file b".as_slice()),
    ] {
        assert_eq!(ann.get(&PathName::from(name)).await.unwrap(), want);
    }
    // Kelly's key never changed; she still reads the shared file.
    assert_eq!(
        kelly.get(&"ann@example.com/docs/a".into()).await.unwrap(),
        b"file a"
    );
}

#[tokio::test]
async fn countersign_requires_a_previous_key() {
    let ann = common::new_user("ann@example.com", "rotate-noprev", 1).await;
    ann.mkdir(&"ann@example.com/".into()).await.unwrap();
    assert!(countersign::countersign(&ann).await.is_err());
    assert!(countersign::rotate(&ann).await.is_err());
}
