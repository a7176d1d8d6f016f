mod common;

use common::{Account, Post, store};
use docsafe::{memory::InMemoryStore, prelude::*};

#[tokio::test]
async fn writes_are_isolated_until_commit() {
    let (backend, store) = store();
    let observer = DocumentStore::new(backend.clone());

    let accounts = store.collection::<Account>("accounts");
    let observed = observer.collection::<Account>("accounts");

    let (writer, reader) = (&accounts, &observed);
    store
        .run_transaction(move |_| async move {
            writer.set(&Account::new("acc-1", "ada", 10)).await?;
            assert_eq!(reader.fetch("acc-1").await?, None);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(observed.fetch("acc-1").await.unwrap(), Some(Account::new("acc-1", "ada", 10)));
    assert!(!store.context().is_busy());
}

#[tokio::test]
async fn one_transaction_spans_collections() {
    let (_, store) = store();
    let accounts = store.collection::<Account>("accounts");
    let posts = store.collection::<Post>("posts");
    accounts.set(&Account::new("acc-1", "ada", 100)).await.unwrap();

    let (accounts_ref, posts_ref) = (&accounts, &posts);
    let post_id = store
        .run_transaction(move |_| async move {
            let account = accounts_ref
                .fetch("acc-1")
                .await?
                .ok_or_else(|| DocumentStoreError::Validation("no account".into()))?;

            accounts_ref
                .update(&doc! { "id": "acc-1", "balance": account.balance - 30 })
                .await?;
            posts_ref.add(&Post::new("", "paid 30")).await
        })
        .await
        .unwrap();

    assert_eq!(accounts.fetch("acc-1").await.unwrap().unwrap().balance, 70);
    assert_eq!(posts.fetch(&post_id).await.unwrap().unwrap().title, "paid 30");
}

#[tokio::test]
async fn reads_after_writes_fail_and_roll_back() {
    let (_, store) = store();
    let accounts = store.collection::<Account>("accounts");

    let accounts_ref = &accounts;
    let err = store
        .run_transaction(move |_| async move {
            accounts_ref.set(&Account::new("acc-1", "ada", 10)).await?;
            accounts_ref.fetch("acc-1").await
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::ReadAfterWrite(_)));
    assert_eq!(accounts.fetch("acc-1").await.unwrap(), None);
    assert!(!store.context().is_busy());
}

#[tokio::test]
async fn a_failed_transaction_leaves_nothing_behind() {
    let (_, store) = store();
    let accounts = store.collection::<Account>("accounts");

    let accounts_ref = &accounts;
    let err = store
        .run_transaction(move |_| async move {
            accounts_ref.set(&Account::new("acc-1", "ada", 10)).await?;
            accounts_ref.set(&Account::new("acc-2", "bob", 20)).await?;
            Err::<(), _>(DocumentStoreError::Validation("insufficient funds".into()))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::Validation(message) if message == "insufficient funds"));
    assert!(accounts.fetch_all().await.unwrap().is_empty());
    assert!(store.context().scope().is_none());
}

#[tokio::test]
async fn a_second_scope_fails_before_touching_the_store() {
    let (_, store) = store();
    let accounts = store.collection::<Account>("accounts");

    let (store_ref, accounts_ref) = (&store, &accounts);
    let nested = store
        .run_transaction(move |_| async move {
            let batch = store_ref.run_batch(|_| async { Ok(()) }).await;
            let transaction = store_ref.run_transaction(|_| async { Ok(()) }).await;
            let bulk = accounts_ref.bulk_delete(&["acc-1"]).await;
            Ok((batch, transaction, bulk))
        })
        .await
        .unwrap();

    assert!(matches!(nested.0, Err(DocumentStoreError::Concurrency(_))));
    assert!(matches!(nested.1, Err(DocumentStoreError::Concurrency(_))));
    assert!(matches!(nested.2, Err(DocumentStoreError::Concurrency(_))));
}

#[tokio::test]
async fn concurrent_writes_abort_the_commit() {
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(backend.clone());
    let other = DocumentStore::new(backend);

    let accounts = store.collection::<Account>("accounts");
    let competing = other.collection::<Account>("accounts");
    accounts.set(&Account::new("acc-1", "ada", 100)).await.unwrap();

    let (accounts_ref, competing_ref) = (&accounts, &competing);
    let err = store
        .run_transaction(move |_| async move {
            let account = accounts_ref.fetch("acc-1").await?.unwrap_or_else(|| Account::new("acc-1", "ada", 0));
            competing_ref.set(&Account::new("acc-1", "ada", 500)).await?;
            accounts_ref
                .set(&Account { balance: account.balance + 1, ..account })
                .await?;
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::Aborted(_)));
    assert_eq!(accounts.fetch("acc-1").await.unwrap().unwrap().balance, 500);
}

#[tokio::test]
async fn queries_inside_a_transaction_read_through_it() {
    let (_, store) = store();
    let posts = store.collection::<Post>("posts");
    posts.set(&Post::new("p1", "draft")).await.unwrap();
    posts.set(&Post::new("p2", "draft")).await.unwrap();

    let posts_ref = &posts;
    store
        .run_transaction(move |_| async move {
            let drafts = posts_ref.where_field("title", FieldOp::Eq, "draft").fetch().await?;
            for draft in drafts {
                posts_ref
                    .update(&doc! { "id": draft.id.as_str(), "published": true })
                    .await?;
            }
            Ok(())
        })
        .await
        .unwrap();

    let published = posts
        .where_field("published", FieldOp::Eq, true)
        .fetch()
        .await
        .unwrap();
    assert_eq!(published.len(), 2);
}

#[tokio::test]
async fn ids_generated_inside_a_transaction_are_stored_on_commit() {
    let (_, store) = store();
    let posts = store.collection::<Post>("posts");

    let posts_ref = &posts;
    let id = store
        .run_transaction(move |_| async move {
            let id = posts_ref.add(&Post::new("", "queued")).await?;
            assert!(posts_ref.context().transaction().is_some());
            Ok(id)
        })
        .await
        .unwrap();

    assert_eq!(posts.fetch(&id).await.unwrap(), Some(Post::new(&id, "queued")));
}
