//! Glob expansion: element-wise patterns, literal metacharacter names,
//! and link traversal during expansion.

mod common;

use upspin_core::PathName;

#[tokio::test]
async fn star_and_question_expansion() {
    let ann = common::new_user("ann@example.com", "glob-basic", 1).await;
    ann.mkdir(&"ann@example.com/".into()).await.unwrap();
    ann.mkdir(&"ann@example.com/d1".into()).await.unwrap();
    ann.mkdir(&"ann@example.com/d2".into()).await.unwrap();
    for name in ["d1/a.txt", "d1/b.txt", "d1/c.jpg", "d2/a.txt"] {
        ann.put(&PathName::from(format!("ann@example.com/{name}")), b"x")
            .await
            .unwrap();
    }

    let txt = ann.glob("ann@example.com/d1/*.txt").await.unwrap();
    let names: Vec<&str> = txt.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        names,
        ["ann@example.com/d1/a.txt", "ann@example.com/d1/b.txt"]
    );

    let across = ann.glob("ann@example.com/d?/a.txt").await.unwrap();
    assert_eq!(across.len(), 2);

    // Results come back sorted by name.
    let all = ann.glob("ann@example.com/*/*").await.unwrap();
    let mut sorted = all.iter().map(|e| e.name.clone()).collect::<Vec<_>>();
    sorted.sort();
    assert_eq!(
        all.iter().map(|e| e.name.clone()).collect::<Vec<_>>(),
        sorted
    );
}

#[tokio::test]
async fn literal_names_with_metacharacters() {
    let ann = common::new_user("ann@example.com", "glob-literal", 1).await;
    ann.mkdir(&"ann@example.com/".into()).await.unwrap();

    // Created literally (the CLI's -glob=false path ends up here), the
    // directory name really contains the brackets.
    ann.mkdir(&"ann@example.com/a[1]b".into()).await.unwrap();
    ann.mkdir(&"ann@example.com/a[1]b/c[]d".into()).await.unwrap();
    ann.put(&"ann@example.com/a[1]b/c[]d/file1".into(), b"found")
        .await
        .unwrap();

    let entry = ann
        .lookup(&"ann@example.com/a[1]b/c[]d/file1".into(), true)
        .await
        .unwrap();
    assert_eq!(entry.name.as_str(), "ann@example.com/a[1]b/c[]d/file1");

    // And a ? pattern resolves through those names.
    let found = ann.glob("ann@example.com/a?1?b/c??d/file1").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(ann.get(&found[0].name).await.unwrap(), b"found");
}

#[tokio::test]
async fn no_meta_pattern_is_a_lookup() {
    let ann = common::new_user("ann@example.com", "glob-nometa", 1).await;
    ann.mkdir(&"ann@example.com/".into()).await.unwrap();
    ann.put(&"ann@example.com/plain".into(), b"x").await.unwrap();

    let found = ann.glob("ann@example.com/plain").await.unwrap();
    assert_eq!(found.len(), 1);
    assert!(
        ann.glob("ann@example.com/absent")
            .await
            .unwrap_err()
            .is(upspin_core::Kind::NotExist)
    );
}

#[tokio::test]
async fn glob_through_links() {
    let ann = common::new_user("ann@example.com", "glob-links", 1).await;
    ann.mkdir(&"ann@example.com/".into()).await.unwrap();
    ann.mkdir(&"ann@example.com/real".into()).await.unwrap();
    ann.put(&"ann@example.com/real/inside.txt".into(), b"x")
        .await
        .unwrap();
    ann.put_link(
        &"ann@example.com/real".into(),
        &"ann@example.com/alias".into(),
    )
    .await
    .unwrap();

    // A literal path through the link, ending in a pattern.
    let found = ann.glob("ann@example.com/alias/*.txt").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name.as_str(), "ann@example.com/real/inside.txt");

    // A pattern whose matches include the link returns the link entry.
    let top = ann.glob("ann@example.com/a*").await.unwrap();
    assert_eq!(top.len(), 1);
    assert!(top[0].is_link());
}
