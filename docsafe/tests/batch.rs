mod common;

use common::{Account, Post, store};
use docsafe::prelude::*;

#[tokio::test]
async fn bulk_delete_commits_one_batch_in_order() {
    let (_, store) = store();
    let posts = store.collection::<Post>("posts");
    for id in ["a", "b", "c"] {
        posts.set(&Post::new(id, id)).await.unwrap();
    }

    let results = posts.bulk_delete(&["c", "a", "missing"]).await.unwrap();

    assert_eq!(results.len(), 3);
    assert!(results.windows(2).all(|pair| pair[0].update_time == pair[1].update_time));
    assert_eq!(posts.fetch_all().await.unwrap(), [Post::new("b", "b")]);
    assert!(!store.context().is_busy());
}

#[tokio::test]
async fn bulk_add_and_bulk_set() {
    let (_, store) = store();
    let posts = store.collection::<Post>("posts");

    let added = posts
        .bulk_add(&[Post::new("", "one"), Post::new("", "two")])
        .await
        .unwrap();
    assert_eq!(added.len(), 2);

    posts
        .bulk_set(&[Post::new("x", "x"), Post::new("y", "y")])
        .await
        .unwrap();
    assert_eq!(posts.fetch_all().await.unwrap().len(), 4);
}

#[tokio::test]
async fn a_failing_bulk_set_writes_nothing() {
    let (_, store) = store();
    let posts = store.collection::<Post>("posts");

    let err = posts
        .bulk_set(&[Post::new("x", "x"), Post::new("", "no id")])
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::Validation(_)));
    assert!(posts.fetch_all().await.unwrap().is_empty());
    assert!(!store.context().is_busy());
}

#[tokio::test]
async fn batch_writes_span_collections_and_land_together() {
    let (backend, store) = store();
    let observer = DocumentStore::new(backend).collection::<Account>("accounts");

    let accounts = store.collection::<Account>("accounts");
    let posts = store.collection::<Post>("posts");
    accounts.set(&Account::new("acc-1", "ada", 10)).await.unwrap();

    let (accounts_ref, posts_ref, observer_ref) = (&accounts, &posts, &observer);
    let results = store
        .run_batch(move |_| async move {
            accounts_ref
                .update(&doc! { "id": "acc-1", "balance": FieldValue::increment(5) })
                .await?;
            posts_ref.set(&Post::new("p1", "deposit")).await?;
            accounts_ref.delete("acc-2").await?;

            let seen = observer_ref.fetch("acc-1").await?;
            assert_eq!(seen.map(|account| account.balance), Some(10));
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(accounts.fetch("acc-1").await.unwrap().unwrap().balance, 15);
    assert!(posts.fetch("p1").await.unwrap().is_some());
}

#[tokio::test]
async fn a_failing_commit_discards_the_whole_batch() {
    let (_, store) = store();
    let accounts = store.collection::<Account>("accounts");

    let accounts_ref = &accounts;
    let err = store
        .run_batch(move |_| async move {
            accounts_ref.set(&Account::new("acc-1", "ada", 10)).await?;
            accounts_ref.update(&doc! { "id": "ghost", "balance": 1 }).await?;
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::DocumentNotFound(..)));
    assert_eq!(accounts.fetch("acc-1").await.unwrap(), None);
}

#[tokio::test]
async fn batches_do_not_nest() {
    let (_, store) = store();

    let store_ref = &store;
    let inner = store
        .run_batch(move |_| async move {
            let inner = store_ref.run_batch(|_| async { Ok(()) }).await;
            assert!(matches!(inner, Err(DocumentStoreError::Concurrency(_))));
            Ok(())
        })
        .await
        .unwrap();

    assert!(inner.is_empty());
}
