use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;

use corekv::{
    commands::{
        geo::{self, GeoUnit},
        hashes, hyperloglog, keys,
        lists::{self, ListEnd},
        sets, sorted_sets, strings, CommandError,
    },
    executor::{self, Operation, OperationOutput},
    expiry::ExpiryReaper,
    key_value_store::{KeyValueStore, SharedStore},
    state::{SharedState, State},
};

/// Installs a log subscriber once per test binary so engine traces show up
/// under `RUST_LOG` when a test fails.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn shared() -> (SharedStore, SharedState) {
    init_tracing();
    (
        Arc::new(Mutex::new(KeyValueStore::new())),
        Arc::new(Mutex::new(State::new())),
    )
}

#[tokio::test(start_paused = true)]
async fn expired_key_is_gone_for_every_reader() {
    let (store, _) = shared();

    strings::set(&store, "session", "abc123", Some(Duration::from_millis(100)))
        .await
        .unwrap();
    assert_eq!(keys::exists(&store, "session").await, Ok(true));

    tokio::time::advance(Duration::from_millis(150)).await;

    assert_eq!(strings::get(&store, "session").await, Err(CommandError::NotFound));
    assert_eq!(keys::exists(&store, "session").await, Ok(false));
    assert_eq!(keys::key_type(&store, "session").await, Ok(None));
}

#[tokio::test(start_paused = true)]
async fn reaper_sweeps_expired_keys_in_background() {
    let (store, _) = shared();

    strings::set(&store, "short", "v", Some(Duration::from_millis(50)))
        .await
        .unwrap();
    strings::set(&store, "long", "v", None).await.unwrap();

    let handle = ExpiryReaper::spawn(Arc::clone(&store), Duration::from_millis(100));

    tokio::time::advance(Duration::from_millis(250)).await;
    tokio::task::yield_now().await;

    {
        let mut guard = store.lock().await;
        assert_eq!(guard.len(), 1);
    }

    handle.abort();
}

#[tokio::test]
async fn set_members_stay_distinct() {
    let (store, _) = shared();

    sets::sadd(&store, "tags", &["rust".to_string(), "async".to_string()])
        .await
        .unwrap();
    sets::sadd(&store, "tags", &["rust".to_string()]).await.unwrap();

    assert_eq!(sets::scard(&store, "tags").await, Ok(2));
    assert_eq!(
        sets::smembers(&store, "tags").await,
        Ok(vec!["async".to_string(), "rust".to_string()])
    );
}

#[tokio::test]
async fn sorted_set_ranking_end_to_end() {
    let (store, _) = shared();

    sorted_sets::zadd(
        &store,
        "leaderboard",
        &[
            (250.0, "carol".to_string()),
            (100.0, "alice".to_string()),
            (175.0, "bob".to_string()),
        ],
    )
    .await
    .unwrap();

    assert_eq!(
        sorted_sets::zrange(&store, "leaderboard", 0, -1).await,
        Ok(vec![
            "alice".to_string(),
            "bob".to_string(),
            "carol".to_string()
        ])
    );
    assert_eq!(
        sorted_sets::zpop_max(&store, "leaderboard").await,
        Ok(("carol".to_string(), 250.0))
    );
    assert_eq!(sorted_sets::zcard(&store, "leaderboard").await, Ok(2));
}

#[tokio::test]
async fn hash_models_a_record() {
    let (store, _) = shared();

    hashes::hset(
        &store,
        "user:42",
        &[
            ("name".to_string(), "Fahril".to_string()),
            ("country".to_string(), "Indonesia".to_string()),
        ],
    )
    .await
    .unwrap();

    assert_eq!(
        hashes::hget(&store, "user:42", "name").await,
        Ok("Fahril".to_string())
    );

    let record = hashes::hget_all(&store, "user:42").await.unwrap();
    assert_eq!(record.len(), 2);
}

#[tokio::test]
async fn list_as_work_queue() {
    let (store, state) = shared();

    lists::push(
        &store,
        &state,
        "queue",
        ListEnd::Tail,
        &["job-1".to_string(), "job-2".to_string()],
    )
    .await
    .unwrap();

    assert_eq!(
        lists::pop(&store, "queue", ListEnd::Head).await,
        Ok("job-1".to_string())
    );
    assert_eq!(
        lists::blpop(&store, &state, "queue", Some(Duration::from_millis(10))).await,
        Ok(Some("job-2".to_string()))
    );
}

#[tokio::test]
async fn geo_index_distance_and_search() {
    let (store, _) = shared();

    geo::geo_add(
        &store,
        "stores",
        &[
            (101.368330, 0.509187, "Toko A".to_string()),
            (101.394572, 0.478720, "Toko B".to_string()),
        ],
    )
    .await
    .unwrap();

    let km = geo::geo_dist(&store, "stores", "Toko A", "Toko B", GeoUnit::Kilometers)
        .await
        .unwrap();
    assert!((4.0..5.0).contains(&km), "distance was {} km", km);

    let nearby = geo::geo_search(
        &store,
        "stores",
        101.368330,
        0.509187,
        5.0,
        GeoUnit::Kilometers,
    )
    .await
    .unwrap();
    assert_eq!(nearby.len(), 2);
    assert!(nearby[0].distance <= nearby[1].distance);
}

#[tokio::test]
async fn hyperloglog_tracks_distinct_visitors() {
    let (store, _) = shared();

    let visitors: Vec<String> = (0..200).map(|i| format!("visitor-{}", i)).collect();
    hyperloglog::pf_add(&store, "uniques", &visitors).await.unwrap();
    hyperloglog::pf_add(&store, "uniques", &visitors).await.unwrap();

    let estimate = hyperloglog::pf_count(&store, "uniques").await.unwrap();
    assert!(
        (190..=210).contains(&estimate),
        "estimate was {}",
        estimate
    );
}

#[tokio::test]
async fn pipeline_returns_one_slot_per_operation() {
    let (store, state) = shared();

    let operations = vec![
        Operation::Set {
            key: "k".to_string(),
            value: "v".to_string(),
            ttl: None,
        },
        Operation::Get {
            key: "absent".to_string(),
        },
        Operation::RPush {
            key: "l".to_string(),
            values: vec!["a".to_string(), "b".to_string()],
        },
        Operation::LPop {
            key: "l".to_string(),
        },
    ];

    let results = executor::pipeline(&store, &state, &operations).await;

    assert_eq!(
        results,
        vec![
            Ok(OperationOutput::Ok),
            Err(CommandError::NotFound),
            Ok(OperationOutput::Integer(2)),
            Ok(OperationOutput::Value("a".to_string())),
        ]
    );
}

#[tokio::test]
async fn transaction_is_all_or_nothing() {
    let (store, state) = shared();
    strings::set(&store, "counter", "not-a-number", None)
        .await
        .unwrap();

    let operations = vec![
        Operation::RPush {
            key: "audit".to_string(),
            values: vec!["attempt".to_string()],
        },
        Operation::Incr {
            key: "counter".to_string(),
        },
    ];

    let result = executor::transaction(&store, &state, &operations).await;
    assert!(matches!(result, Err(CommandError::TransactionAborted(_))));

    // the push in step 0 must have been rolled back with everything else
    assert_eq!(lists::llen(&store, "audit").await, Ok(0));

    // the same steps succeed once the conflict is removed
    keys::del(&store, &["counter".to_string()]).await.unwrap();
    let results = executor::transaction(&store, &state, &operations)
        .await
        .unwrap();
    assert_eq!(results[1], Ok(OperationOutput::Integer(1)));
    assert_eq!(lists::llen(&store, "audit").await, Ok(1));
}
