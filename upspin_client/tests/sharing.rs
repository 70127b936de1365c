//! Access-gated sharing: the full life of a wrapped-key set, from
//! "information withheld" through group membership to `share -fix`, plus
//! the `read:all`-versus-encryption constraint.

mod common;

use upspin_client::Sharer;
use upspin_core::entry::Packing;
use upspin_core::{Kind, PathName};
use upspin_pack::Packer as _;

const WORLD: &str = "share-gate";

#[tokio::test]
async fn share_fix_grants_group_readers() {
    let ann = common::new_user("ann@example.com", WORLD, 1).await;
    let kelly = common::new_user("kelly@example.com", WORLD, 2).await;

    ann.mkdir(&"ann@example.com/".into()).await.unwrap();
    ann.mkdir(&"ann@example.com/Group".into()).await.unwrap();
    ann.mkdir(&"ann@example.com/Friends".into()).await.unwrap();
    ann.mkdir(&"ann@example.com/Friends/Photo".into()).await.unwrap();
    ann.put(
        &"ann@example.com/Friends/Photo/friends.jpg".into(),
        b"jpeg for friends",
    )
    .await
    .unwrap();
    ann.put(&"ann@example.com/Group/friends".into(), b"bob@example.com\n")
        .await
        .unwrap();
    ann.put(
        &"ann@example.com/Friends/Access".into(),
        b"r,l: friends\n*: ann@example.com\n",
    )
    .await
    .unwrap();

    let photo = PathName::from("ann@example.com/Friends/Photo/friends.jpg");

    // Kelly is not in the group: existence itself is withheld.
    let err = kelly.get(&photo).await.unwrap_err();
    assert!(err.is(Kind::Private), "got {err}");
    assert!(err.to_string().contains("information withheld"));

    // Adding kelly to the group grants directory access, but the file's
    // data key was never wrapped for her.
    ann.put(
        &"ann@example.com/Group/friends".into(),
        b"bob@example.com kelly@example.com\n",
    )
    .await
    .unwrap();
    let err = kelly.get(&photo).await.unwrap_err();
    assert!(err.is(Kind::CannotDecrypt), "got {err}");
    assert!(err.to_string().contains("no wrapped key for user"));

    // share -fix -r rewraps for exactly the reader set.
    let mut sharer = Sharer::new(ann.clone());
    sharer.fix = true;
    sharer.recursive = true;
    let report = sharer.share(&["ann@example.com/Friends".into()]).await;
    assert!(report.ok(), "share errors: {:?}", report.errors);
    assert!(report.repacked.contains(&photo));

    assert_eq!(kelly.get(&photo).await.unwrap(), b"jpeg for friends");

    // Reader-set closure: the wrapped hashes equal the Access readers
    // (owner, bob, kelly) that have keys. Bob has no key record, so the
    // set is ann and kelly.
    let entry = ann.lookup(&photo, true).await.unwrap();
    let packer = upspin_pack::lookup(Packing::Ee);
    let mut hashes = packer.reader_hashes(&entry.packdata).unwrap();
    hashes.sort();
    let mut want = vec![
        ann.factotum().public_key().key_hash(),
        kelly.factotum().public_key().key_hash(),
    ];
    want.sort();
    assert_eq!(hashes, want);

    // A second run has nothing to do.
    let report = sharer.share(&["ann@example.com/Friends".into()]).await;
    assert!(report.ok());
    assert!(report.repacked.is_empty());
}

#[tokio::test]
async fn deeper_access_files_shadow_and_grants_do_not_revoke() {
    const W: &str = "share-shadow";
    let ann = common::new_user("ann@example.com", W, 1).await;
    let kelly = common::new_user("kelly@example.com", W, 2).await;

    ann.mkdir(&"ann@example.com/".into()).await.unwrap();
    ann.mkdir(&"ann@example.com/a".into()).await.unwrap();
    ann.mkdir(&"ann@example.com/a/b".into()).await.unwrap();
    ann.put_packed(
        &"ann@example.com/a/b/f".into(),
        b"inner",
        Packing::EeIntegrity,
    )
    .await
    .unwrap();
    ann.put(
        &"ann@example.com/a/b/Access".into(),
        b"r,l: kelly@example.com\n*: ann@example.com\n",
    )
    .await
    .unwrap();

    // The deeper Access file governs b; kelly reads despite the parent
    // granting her nothing.
    let inner = PathName::from("ann@example.com/a/b/f");
    assert_eq!(kelly.get(&inner).await.unwrap(), b"inner");
    let governing = ann.which_access(&inner).await.unwrap().unwrap();
    assert_eq!(governing.name.as_str(), "ann@example.com/a/b/Access");

    // Granting a new right on the parent directory revokes nothing below.
    ann.put(
        &"ann@example.com/a/Access".into(),
        b"r: zed@other.org\n*: ann@example.com\n",
    )
    .await
    .unwrap();
    assert_eq!(kelly.get(&inner).await.unwrap(), b"inner");
}

#[tokio::test]
async fn read_all_refused_on_encrypted_directory() {
    let ann = common::new_user("ann@example.com", "share-readall", 1).await;
    ann.mkdir(&"ann@example.com/".into()).await.unwrap();
    ann.mkdir(&"ann@example.com/BadPublic".into()).await.unwrap();
    ann.put(&"ann@example.com/BadPublic/secret".into(), b"encrypted")
        .await
        .unwrap();

    let err = ann
        .put(
            &"ann@example.com/BadPublic/Access".into(),
            b"r,l: all\n*: ann@example.com\n",
        )
        .await
        .unwrap_err();
    assert!(err.is(Kind::Invalid), "got {err}");
    assert!(err.to_string().contains("cannot add \"read:all\""));

    // After repacking the contents with eeintegrity the grant is legal.
    let content = ann.get(&"ann@example.com/BadPublic/secret".into()).await.unwrap();
    ann.put_packed(
        &"ann@example.com/BadPublic/secret".into(),
        &content,
        Packing::EeIntegrity,
    )
    .await
    .unwrap();
    ann.put(
        &"ann@example.com/BadPublic/Access".into(),
        b"r,l: all\n*: ann@example.com\n",
    )
    .await
    .unwrap();

    // Now any user can read the integrity-packed file.
    let zed = common::new_user("zed@other.org", "share-readall", 3).await;
    assert_eq!(
        zed.get(&"ann@example.com/BadPublic/secret".into())
            .await
            .unwrap(),
        b"encrypted"
    );
}

#[tokio::test]
async fn unencrypt_for_all_rewrites_in_the_clear() {
    let ann = common::new_user("ann@example.com", "share-unenc", 1).await;
    ann.mkdir(&"ann@example.com/".into()).await.unwrap();
    ann.mkdir(&"ann@example.com/Pub".into()).await.unwrap();
    ann.put(&"ann@example.com/Pub/doc".into(), b"was secret").await.unwrap();
    // The Access file arrives while the directory still holds encrypted
    // content; write it below instead, after clearing the conflict, to
    // exercise the share path rather than the put-time check.
    let doc = PathName::from("ann@example.com/Pub/doc");

    // Without -unencryptforall the engine only warns.
    // (Access granting read:all cannot be written yet; simulate the
    // conflicted state by rewriting doc as ee after the Access file.)
    ann.put_packed(&doc, b"was secret", Packing::EeIntegrity).await.unwrap();
    ann.put(
        &"ann@example.com/Pub/Access".into(),
        b"r: all\n*: ann@example.com\n",
    )
    .await
    .unwrap();
    ann.put_packed(&doc, b"was secret", Packing::Ee).await.unwrap();

    let mut sharer = Sharer::new(ann.clone());
    sharer.fix = true;
    sharer.recursive = true;
    let report = sharer.share(&["ann@example.com/Pub".into()]).await;
    assert!(report.ok());
    assert!(report.unencrypted.is_empty());
    assert!(
        report.warnings.iter().any(|w| w.contains("read:all")
            || w.contains("unencryptforall")),
        "warnings: {:?}",
        report.warnings
    );

    sharer.unencrypt_for_all = true;
    let report = sharer.share(&["ann@example.com/Pub".into()]).await;
    assert!(report.ok(), "errors: {:?}", report.errors);
    assert_eq!(report.unencrypted, vec![doc.clone()]);

    let entry = ann.lookup(&doc, true).await.unwrap();
    assert_eq!(entry.packing, Packing::EeIntegrity);
    let zed = common::new_user("zed@other.org", "share-unenc", 4).await;
    assert_eq!(zed.get(&doc).await.unwrap(), b"was secret");
}
