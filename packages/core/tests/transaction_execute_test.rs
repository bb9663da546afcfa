//! Sequential Execution Tests
//!
//! Verifies `TransactionCoordinator::execute`: registration-order execution,
//! short-circuit on the first failure, and all-or-nothing commit.

mod common;

use anyhow::Result;
use common::{create_test_collection, doc, Counter};
use docstore_core::db::{Filter, StorageError};
use docstore_core::transaction::Interrupt;
use docstore_core::{CancellationToken, TransactionError};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn test_commit_on_success() -> Result<()> {
    let (connection, coll, _temp_dir) = create_test_collection().await?;

    let (c1, c2) = (coll.clone(), coll.clone());
    connection
        .new_transaction()
        .new_operation(move |session| async move {
            let result = c1.insert_one(&session, doc("id-1")).await?;
            assert_eq!(result.inserted_id, json!("id-1"));
            Ok(())
        })
        .new_operation(move |session| async move {
            let result = c2.insert_one(&session, doc("id-2")).await?;
            assert_eq!(result.inserted_id, json!("id-2"));
            Ok(())
        })
        .execute()
        .await?;

    assert_eq!(coll.count_documents(&Filter::all()).await?, 2);
    assert_eq!(coll.count_documents(&Filter::by_id("id-1")).await?, 1);
    assert_eq!(coll.count_documents(&Filter::by_id("id-2")).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_key_aborts() -> Result<()> {
    let (connection, coll, _temp_dir) = create_test_collection().await?;

    let (c1, c2) = (coll.clone(), coll.clone());
    let err = connection
        .new_transaction()
        .new_operation(move |session| async move {
            c1.insert_one(&session, doc("same")).await?;
            Ok(())
        })
        .new_operation(move |session| async move {
            c2.insert_one(&session, doc("same")).await?;
            Ok(())
        })
        .execute()
        .await
        .unwrap_err();

    assert_eq!(err.operation_index(), Some(1));
    assert!(err.rolled_back());
    let storage = err
        .operation_error()
        .and_then(|e| e.downcast_ref::<StorageError>())
        .expect("duplicate insert should surface a StorageError");
    assert!(storage.is_duplicate_key());

    assert_eq!(coll.count_documents(&Filter::by_id("same")).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_any_failing_operation_leaves_no_effects() -> Result<()> {
    const N: usize = 4;

    for failing in 0..N {
        let (connection, coll, _temp_dir) = create_test_collection().await?;

        let mut transaction = connection.new_transaction();
        for i in 0..N {
            let coll = coll.clone();
            transaction = transaction.new_operation(move |session| async move {
                if i == failing {
                    anyhow::bail!("operation {} refuses", i);
                }
                coll.insert_one(&session, doc(i as i64)).await?;
                Ok(())
            });
        }

        let err = transaction.execute().await.unwrap_err();
        assert_eq!(err.operation_index(), Some(failing));
        assert_eq!(
            coll.count_documents(&Filter::all()).await?,
            0,
            "operation {} failed but effects were persisted",
            failing
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_short_circuit_on_first_failure() -> Result<()> {
    let (connection, coll, _temp_dir) = create_test_collection().await?;
    let (a, b, c) = (Counter::new(), Counter::new(), Counter::new());

    let (ca, cb, cc) = (a.clone(), b.clone(), c.clone());
    let coll_a = coll.clone();
    let err = connection
        .new_transaction()
        .new_operation(move |session| async move {
            ca.hit();
            coll_a.insert_one(&session, doc("a")).await?;
            Ok(())
        })
        .new_operation(move |_session| async move {
            cb.hit();
            Err(anyhow::anyhow!("b failed"))
        })
        .new_operation(move |_session| async move {
            cc.hit();
            Ok(())
        })
        .execute()
        .await
        .unwrap_err();

    assert_eq!(a.get(), 1);
    assert_eq!(b.get(), 1);
    assert_eq!(c.get(), 0, "operation after the failure must never run");
    assert_eq!(err.operation_index(), Some(1));
    assert!(err.to_string().contains("b failed"));
    assert_eq!(coll.count_documents(&Filter::all()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_operations_run_in_registration_order() -> Result<()> {
    let (connection, _coll, _temp_dir) = create_test_collection().await?;
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut transaction = connection.new_transaction();
    for i in 0..5 {
        let order = Arc::clone(&order);
        transaction = transaction.new_operation(move |_session| async move {
            // Later operations finish faster; order must still hold
            tokio::time::sleep(Duration::from_millis(10 * (5 - i))).await;
            order.lock().unwrap().push(i);
            Ok(())
        });
    }
    assert_eq!(transaction.len(), 5);
    transaction.execute().await?;

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    Ok(())
}

#[tokio::test]
async fn test_operation_sees_own_writes_but_store_does_not() -> Result<()> {
    let (connection, coll, _temp_dir) = create_test_collection().await?;

    let (writer, reader) = (coll.clone(), coll.clone());
    connection
        .new_transaction()
        .new_operation(move |session| async move {
            writer
                .insert_one(&session, json!({"_id": "u1", "name": "Ada", "role": "admin"}))
                .await?;
            Ok(())
        })
        .new_operation(move |session| async move {
            let filter = Filter::all().eq("role", "admin");
            assert_eq!(reader.count_in(&session, &filter).await?, 1);
            // Outside the session nothing is visible before commit
            assert_eq!(reader.count_documents(&filter).await?, 0);

            let found = reader.find_one(&session, &Filter::by_id("u1")).await?;
            assert_eq!(found.unwrap()["name"], json!("Ada"));
            Ok(())
        })
        .execute()
        .await?;

    assert_eq!(coll.count_documents(&Filter::all().eq("role", "admin")).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_panicking_operation_is_an_operation_error() -> Result<()> {
    let (connection, coll, _temp_dir) = create_test_collection().await?;

    let writer = coll.clone();
    let err = connection
        .new_transaction()
        .new_operation(move |session| async move {
            writer.insert_one(&session, doc("before-panic")).await?;
            Ok(())
        })
        .new_operation(|_session| async move {
            if true {
                panic!("operation exploded");
            }
            Ok(())
        })
        .execute()
        .await
        .unwrap_err();

    assert_eq!(err.operation_index(), Some(1));
    assert!(err.to_string().contains("operation exploded"));
    assert_eq!(coll.count_documents(&Filter::all()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_empty_transaction_commits() -> Result<()> {
    let (connection, _coll, _temp_dir) = create_test_collection().await?;
    let transaction = connection.new_transaction();
    assert!(transaction.is_empty());
    transaction.execute().await?;
    Ok(())
}

#[tokio::test]
async fn test_cancellation_during_run_aborts() -> Result<()> {
    let (connection, coll, _temp_dir) = create_test_collection().await?;
    let token = CancellationToken::new();
    let never_reached = Counter::new();

    let (writer, trigger, tail) = (coll.clone(), token.clone(), never_reached.clone());
    let err = connection
        .new_transaction()
        .with_cancellation(token)
        .new_operation(move |session| async move {
            writer.insert_one(&session, doc("cancelled")).await?;
            trigger.cancel();
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .new_operation(move |_session| async move {
            tail.hit();
            Ok(())
        })
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TransactionError::Interrupted {
            reason: Interrupt::Cancelled,
            rolled_back: true,
            ..
        }
    ));
    assert_eq!(never_reached.get(), 0);
    assert_eq!(coll.count_documents(&Filter::all()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_cancellation_after_last_operation_prevents_commit() -> Result<()> {
    let (connection, coll, _temp_dir) = create_test_collection().await?;
    let token = CancellationToken::new();

    let (writer, trigger) = (coll.clone(), token.clone());
    let err = connection
        .new_transaction()
        .with_cancellation(token)
        .new_operation(move |session| async move {
            writer.insert_one(&session, doc("almost")).await?;
            Ok(())
        })
        .new_operation(move |_session| async move {
            // Every operation succeeds, but the caller gave up before commit
            trigger.cancel();
            Ok(())
        })
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TransactionError::Interrupted {
            reason: Interrupt::Cancelled,
            rolled_back: true,
            abort_error: None,
        }
    ));
    assert_eq!(coll.count_documents(&Filter::all()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_already_cancelled_token_runs_nothing() -> Result<()> {
    let (connection, _coll, _temp_dir) = create_test_collection().await?;
    let token = CancellationToken::new();
    token.cancel();
    let ran = Counter::new();

    let hit = ran.clone();
    let err = connection
        .new_transaction()
        .with_cancellation(token)
        .new_operation(move |_session| async move {
            hit.hit();
            Ok(())
        })
        .execute()
        .await
        .unwrap_err();

    assert_eq!(err.interrupt(), Some(Interrupt::Cancelled));
    assert!(!err.rolled_back());
    assert_eq!(ran.get(), 0);
    Ok(())
}

#[tokio::test]
async fn test_deadline_exceeded_aborts() -> Result<()> {
    let (connection, coll, _temp_dir) = create_test_collection().await?;

    let writer = coll.clone();
    let err = connection
        .new_transaction()
        .with_timeout(Duration::from_millis(100))
        .new_operation(move |session| async move {
            writer.insert_one(&session, doc("slow")).await?;
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .execute()
        .await
        .unwrap_err();

    assert_eq!(err.interrupt(), Some(Interrupt::DeadlineExceeded));
    assert!(err.rolled_back());
    assert_eq!(coll.count_documents(&Filter::all()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_update_and_delete_within_transaction() -> Result<()> {
    let (connection, coll, _temp_dir) = create_test_collection().await?;

    let seed = coll.clone();
    connection
        .new_transaction()
        .new_operation(move |session| async move {
            seed.insert_one(&session, json!({"_id": 1, "status": "new", "qty": 3}))
                .await?;
            seed.insert_one(&session, json!({"_id": 2, "status": "new", "qty": 5}))
                .await?;
            Ok(())
        })
        .execute()
        .await?;

    let (updater, deleter) = (coll.clone(), coll.clone());
    connection
        .new_transaction()
        .new_operation(move |session| async move {
            let modified = updater
                .update_one(&session, &Filter::by_id(1), json!({"status": "shipped"}))
                .await?;
            assert_eq!(modified, 1);
            Ok(())
        })
        .new_operation(move |session| async move {
            let removed = deleter.delete_many(&session, &Filter::by_id(2)).await?;
            assert_eq!(removed, 1);
            Ok(())
        })
        .execute()
        .await?;

    assert_eq!(coll.count_documents(&Filter::all().eq("status", "shipped")).await?, 1);
    assert_eq!(coll.count_documents(&Filter::all().eq("qty", 3)).await?, 1);
    assert_eq!(coll.count_documents(&Filter::all()).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_update_rejects_id_change() -> Result<()> {
    let (connection, coll, _temp_dir) = create_test_collection().await?;

    let updater = coll.clone();
    let err = connection
        .new_transaction()
        .new_operation(move |session| async move {
            updater
                .update_one(&session, &Filter::by_id("x"), json!({"_id": "y"}))
                .await?;
            Ok(())
        })
        .execute()
        .await
        .unwrap_err();

    assert_eq!(err.operation_index(), Some(0));
    Ok(())
}

#[tokio::test]
async fn test_generated_ids_are_returned() -> Result<()> {
    let (connection, coll, _temp_dir) = create_test_collection().await?;
    let inserted = Arc::new(Mutex::new(None));

    let (writer, slot) = (coll.clone(), Arc::clone(&inserted));
    connection
        .new_transaction()
        .new_operation(move |session| async move {
            let result = writer.insert_one(&session, json!({"name": "anon"})).await?;
            *slot.lock().unwrap() = Some(result.inserted_id);
            Ok(())
        })
        .execute()
        .await?;

    let id = inserted.lock().unwrap().clone().expect("insert should report its _id");
    assert!(id.is_string());
    assert_eq!(coll.count_documents(&Filter::by_id(id)).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_leaked_session_cannot_write_after_commit() -> Result<()> {
    let (connection, coll, _temp_dir) = create_test_collection().await?;
    let leaked = Arc::new(Mutex::new(None));

    let slot = Arc::clone(&leaked);
    connection
        .new_transaction()
        .new_operation(move |session| async move {
            *slot.lock().unwrap() = Some(session);
            Ok(())
        })
        .execute()
        .await?;

    let session = leaked.lock().unwrap().take().unwrap();
    assert!(!session.is_active());
    let err = coll.insert_one(&session, doc("late")).await.unwrap_err();
    assert!(err.to_string().contains("no active transaction"));
    assert_eq!(coll.count_documents(&Filter::all()).await?, 0);
    Ok(())
}
