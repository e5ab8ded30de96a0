//! End-to-end tests for `Cloner::copy_database` against in-memory doubles.

use clonedb_core::{
    CloneError, CloneResult, CloneStats, CollectionOptions, CommitQuorum, DuplicateKeyPolicy,
    FailPointSite, HostAndPort, IndexBuildProtocol, IndexSpec, InternalCredential, Namespace,
    StorageEngine, StorageError,
};
use clonedb_testkit::prelude::*;
use std::sync::Arc;

fn shop(coll: &str) -> Namespace {
    Namespace::new("shop", coll)
}

fn run(
    cluster: &TestCluster,
    config: ClonerConfig,
    sharded: &[Namespace],
) -> (CloneResult<CloneStats>, ClonedNamespaces) {
    init_tracing();
    let mut cloned = ClonedNamespaces::new();
    let result =
        cluster
            .cloner(config)
            .copy_database("shop", &cluster.endpoint(), sharded, &mut cloned);
    (result, cloned)
}

fn names(cloned: &ClonedNamespaces) -> Vec<String> {
    cloned.iter().map(ToString::to_string).collect()
}

#[test]
fn clones_unsharded_and_creates_sharded_empty() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a")
            .with_documents(numbered_docs(3))
            .with_index(IndexSpec::new("x_1").ascending("x")),
    );
    let b = RemoteCollection::new("b").with_documents(numbered_docs(2));
    let b_uuid = b.uuid();
    cluster.remote.add_collection("shop", b);

    let (result, cloned) = run(&cluster, ClonerConfig::default(), &[shop("b")]);
    let stats = result.unwrap();

    assert_eq!(names(&cloned), vec!["shop.a"]);
    assert_eq!(cluster.storage.document_count(&shop("a")), 3);
    assert_eq!(cluster.storage.index_names(&shop("a")), vec!["_id_", "x_1"]);

    let local_b = cluster.storage.lookup_collection(&shop("b")).unwrap();
    assert_eq!(Some(local_b.uuid), b_uuid);
    assert_eq!(cluster.storage.document_count(&shop("b")), 0);

    assert_eq!(stats.collections_created, 2);
    assert_eq!(stats.documents_inserted(), 3);
    assert_eq!(stats.indexes_built(), 1);
    assert!(cluster.observer.entries().is_empty());
    assert!(!cluster.storage.is_locked("shop"));
}

#[test]
fn unsharded_collection_keeps_its_own_identity() {
    let cluster = TestCluster::new();
    let a = RemoteCollection::new("a");
    let remote_uuid = a.uuid();
    cluster.remote.add_collection("shop", a);

    let (result, _) = run(&cluster, ClonerConfig::default(), &[]);
    result.unwrap();

    let local = cluster.storage.lookup_collection(&shop("a")).unwrap();
    assert_ne!(Some(local.uuid), remote_uuid);
}

#[test]
fn existing_unsharded_collection_conflicts() {
    let cluster = TestCluster::new();
    cluster
        .storage
        .create_collection(&shop("a"), CollectionOptions::default())
        .unwrap();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a").with_documents(numbered_docs(3)),
    );

    let (result, cloned) = run(&cluster, ClonerConfig::default(), &[]);

    assert!(matches!(result, Err(CloneError::NamespaceConflict { nss }) if nss == shop("a")));
    assert!(cloned.is_empty());
    assert_eq!(cluster.storage.document_count(&shop("a")), 0);
    assert!(!cluster.storage.is_locked("shop"));
}

#[test]
fn sharded_collection_with_matching_identity_is_reused() {
    let cluster = TestCluster::new();
    let b = RemoteCollection::new("b");
    let uuid = b.uuid();
    cluster.remote.add_collection("shop", b);
    cluster
        .storage
        .create_collection(
            &shop("b"),
            CollectionOptions {
                uuid,
                ..CollectionOptions::default()
            },
        )
        .unwrap();

    let (result, cloned) = run(&cluster, ClonerConfig::default(), &[shop("b")]);
    let stats = result.unwrap();

    assert!(cloned.is_empty());
    assert_eq!(stats.collections_created, 0);
    assert_eq!(stats.collections_already_present, 1);
}

#[test]
fn sharded_collection_with_other_identity_conflicts() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection("shop", RemoteCollection::new("b"));
    cluster
        .storage
        .create_collection(&shop("b"), CollectionOptions::default())
        .unwrap();

    let (result, _) = run(&cluster, ClonerConfig::default(), &[shop("b")]);
    assert!(matches!(result, Err(CloneError::IdentityConflict { .. })));
}

#[test]
fn collection_dropped_at_yield_fails_the_clone() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a").with_documents(numbered_docs(10)),
    );
    let a = shop("a");
    cluster.storage.on_release(move |storage| {
        if storage.document_count(&a) >= 4 {
            storage.drop_collection(&a);
        }
    });

    let config = ClonerConfig::default().with_yield_interval(4);
    let (result, cloned) = run(&cluster, config, &[]);

    assert!(matches!(result, Err(CloneError::CollectionDropped { nss }) if nss == shop("a")));
    assert_eq!(names(&cloned), vec!["shop.a"]);
    assert!(cluster.storage.lookup_collection(&shop("a")).is_none());
    assert_eq!(cluster.storage.document_count(&shop("a")), 0);
    assert!(!cluster.storage.is_locked("shop"));
}

#[test]
fn database_dropped_at_yield_fails_the_clone() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a").with_documents(numbered_docs(10)),
    );
    let a = shop("a");
    cluster.storage.on_release(move |storage| {
        if storage.document_count(&a) >= 4 {
            storage.drop_database("shop");
        }
    });

    let config = ClonerConfig::default().with_yield_interval(4);
    let (result, _) = run(&cluster, config, &[]);

    assert!(matches!(result, Err(CloneError::DatabaseDropped { db }) if db == "shop"));
}

#[test]
fn yields_every_interval() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a").with_documents(numbered_docs(300)),
    );

    let (result, _) = run(&cluster, ClonerConfig::default(), &[]);
    let stats = result.unwrap();

    let a = stats.namespace(&shop("a")).unwrap();
    assert_eq!(a.documents_inserted, 300);
    assert_eq!(a.yields, 2);
}

#[test]
fn corrupt_document_aborts_strict_clone() {
    let cluster = TestCluster::new();
    let mut docs = numbered_docs(3);
    docs.insert(1, corrupt_doc());
    cluster
        .remote
        .add_collection("shop", RemoteCollection::new("a").with_documents(docs));

    let (result, _) = run(&cluster, ClonerConfig::default(), &[]);

    assert!(matches!(result, Err(CloneError::CorruptData { nss, .. }) if nss == shop("a")));
    assert_eq!(cluster.storage.document_count(&shop("a")), 1);
}

#[test]
fn corrupt_document_is_skipped_when_configured() {
    let cluster = TestCluster::new();
    let mut docs = numbered_docs(3);
    docs.insert(1, corrupt_doc());
    cluster
        .remote
        .add_collection("shop", RemoteCollection::new("a").with_documents(docs));

    let config = ClonerConfig::default().with_skip_corrupt_documents(true);
    let (result, _) = run(&cluster, config, &[]);
    let stats = result.unwrap();

    assert_eq!(cluster.storage.document_count(&shop("a")), 3);
    assert_eq!(stats.corrupt_skipped(), 1);
}

#[test]
fn duplicate_documents_follow_policy() {
    let docs = vec![doc_with_id(1, &[]), doc_with_id(1, &[]), doc_with_id(2, &[])];

    let cluster = TestCluster::new();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a").with_documents(docs.clone()),
    );
    let (result, _) = run(&cluster, ClonerConfig::default(), &[]);
    let stats = result.unwrap();
    assert_eq!(cluster.storage.document_count(&shop("a")), 2);
    assert_eq!(stats.duplicates_ignored(), 1);

    let cluster = TestCluster::new();
    cluster
        .remote
        .add_collection("shop", RemoteCollection::new("a").with_documents(docs));
    let config = ClonerConfig::default().with_duplicate_key_policy(DuplicateKeyPolicy::Reject);
    let (result, _) = run(&cluster, config, &[]);
    assert!(matches!(
        result,
        Err(CloneError::Storage(StorageError::DuplicateKey { .. }))
    ));
}

#[test]
fn failed_index_build_leaves_no_trace() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("b")
            .with_documents(numbered_docs(2))
            .with_index(IndexSpec::new("z_1").ascending("z")),
    );
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a")
            .with_documents(vec![
                doc_with_id(0, &[("x", int(1))]),
                doc_with_id(1, &[("x", int(1))]),
            ])
            .with_index(IndexSpec::new("x_1").ascending("x").unique())
            .with_index(IndexSpec::new("y_1").ascending("y")),
    );

    let (result, _) = run(&cluster, ClonerConfig::default(), &[]);

    assert!(matches!(
        result,
        Err(CloneError::IndexBuild {
            source: StorageError::DuplicateKey { .. },
            ..
        })
    ));
    assert_eq!(cluster.storage.index_names(&shop("a")), vec!["_id_"]);
    assert_eq!(cluster.storage.index_names(&shop("b")), vec!["_id_", "z_1"]);
    assert_eq!(cluster.storage.document_count(&shop("a")), 2);
    assert_eq!(cluster.storage.aborted_builds(), 1);
}

#[test]
fn two_phase_build_writes_start_and_commit() {
    let cluster = TestCluster::replicated();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a")
            .with_documents(numbered_docs(3))
            .with_index(IndexSpec::new("x_1").ascending("x")),
    );

    let (result, _) = run(&cluster, ClonerConfig::default(), &[]);
    result.unwrap();

    let uuid = cluster.storage.lookup_collection(&shop("a")).unwrap().uuid;
    let entries = cluster.observer.entries();
    assert_eq!(entries.len(), 2);
    let (start_id, commit_id) = match (&entries[0], &entries[1]) {
        (
            OplogEntry::StartIndexBuild {
                build_id: start,
                indexes,
                uuid: start_uuid,
                ..
            },
            OplogEntry::CommitIndexBuild {
                build_id: commit, ..
            },
        ) => {
            assert_eq!(indexes, &vec!["x_1".to_string()]);
            assert_eq!(*start_uuid, uuid);
            (*start, *commit)
        }
        other => panic!("unexpected oplog entries: {other:?}"),
    };
    assert_eq!(start_id, commit_id);

    let recorded = cluster.storage.index_build_entries();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].build_id, start_id);
    assert_eq!(recorded[0].collection_uuid, uuid);
    assert_eq!(recorded[0].commit_quorum, CommitQuorum::Disabled);
    assert_eq!(recorded[0].index_names, vec!["x_1"]);
}

#[test]
fn single_phase_build_writes_one_entry_per_index() {
    let cluster = TestCluster::replicated();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a")
            .with_documents(numbered_docs(3))
            .with_index(IndexSpec::new("x_1").ascending("x"))
            .with_index(IndexSpec::new("y_1").ascending("y")),
    );

    let config =
        ClonerConfig::default().with_index_build_protocol(IndexBuildProtocol::SinglePhase);
    let (result, _) = run(&cluster, config, &[]);
    result.unwrap();

    let created: Vec<String> = cluster
        .observer
        .entries()
        .into_iter()
        .map(|entry| match entry {
            OplogEntry::CreateIndex { index, .. } => index,
            other => panic!("unexpected oplog entry: {other:?}"),
        })
        .collect();
    assert_eq!(created, vec!["x_1", "y_1"]);
    assert!(cluster.storage.index_build_entries().is_empty());
}

#[test]
fn failed_start_entry_aborts_build() {
    let cluster = TestCluster::replicated();
    cluster.observer.fail_start_index_build();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a")
            .with_documents(numbered_docs(3))
            .with_index(IndexSpec::new("x_1").ascending("x")),
    );

    let (result, _) = run(&cluster, ClonerConfig::default(), &[]);

    assert!(matches!(result, Err(CloneError::IndexBuild { .. })));
    assert_eq!(cluster.storage.index_names(&shop("a")), vec!["_id_"]);
    assert_eq!(cluster.storage.aborted_builds(), 1);
}

#[test]
fn step_down_before_creation_fails() {
    let cluster = TestCluster::replicated();
    cluster.remote.add_collection("shop", RemoteCollection::new("a"));
    cluster.replication.step_down();

    let (result, _) = run(&cluster, ClonerConfig::default(), &[]);

    assert!(matches!(result, Err(CloneError::RoleChanged { .. })));
    assert!(cluster.storage.collection_names("shop").is_empty());
}

#[test]
fn step_down_at_yield_fails() {
    let cluster = TestCluster::replicated();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a").with_documents(numbered_docs(10)),
    );
    let a = shop("a");
    let replication = cluster.replication.clone();
    cluster.storage.on_release(move |storage| {
        if storage.document_count(&a) >= 2 {
            replication.step_down();
        }
    });

    let config = ClonerConfig::default().with_yield_interval(2);
    let (result, _) = run(&cluster, config, &[]);

    match result {
        Err(CloneError::RoleChanged { target, context }) => {
            assert_eq!(target, "shop.a");
            assert_eq!(context, "after yielding");
        }
        other => panic!("expected role change, got {other:?}"),
    }
    assert_eq!(cluster.storage.document_count(&shop("a")), 2);
}

#[test]
fn step_down_is_ignored_on_standalone() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a").with_documents(numbered_docs(3)),
    );
    cluster.replication.step_down();

    let (result, _) = run(&cluster, ClonerConfig::default(), &[]);
    result.unwrap();
}

#[test]
fn write_conflicts_are_retried() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a").with_documents(numbered_docs(5)),
    );
    cluster.storage.inject_write_conflicts(7);

    let (result, _) = run(&cluster, ClonerConfig::default(), &[]);
    let stats = result.unwrap();

    assert_eq!(stats.write_conflict_retries, 7);
    assert_eq!(cluster.storage.document_count(&shop("a")), 5);
}

#[test]
fn cancellation_before_start() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection("shop", RemoteCollection::new("a"));
    let cloner = cluster.cloner(ClonerConfig::default());
    cloner.cancellation_handle().cancel();

    let mut cloned = ClonedNamespaces::new();
    let err = cloner
        .copy_database("shop", &cluster.endpoint(), &[], &mut cloned)
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(cluster.storage.collection_names("shop").is_empty());
}

#[test]
fn cancellation_during_copy_leaves_partial_load() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a").with_documents(numbered_docs(10)),
    );
    let cloner = cluster.cloner(ClonerConfig::default().with_yield_interval(3));
    let handle = cloner.cancellation_handle();
    let a = shop("a");
    cluster.storage.on_release(move |storage| {
        if storage.document_count(&a) >= 3 {
            handle.cancel();
        }
    });

    let mut cloned = ClonedNamespaces::new();
    let err = cloner
        .copy_database("shop", &cluster.endpoint(), &[], &mut cloned)
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(cluster.storage.document_count(&shop("a")), 3);
    assert!(!cluster.storage.is_locked("shop"));
}

#[test]
fn fail_point_stops_creation_after_first_collection() {
    let cluster = TestCluster::new();
    for name in ["a", "b", "c"] {
        cluster
            .remote
            .add_collection("shop", RemoteCollection::new(name));
    }
    let fail_point =
        Arc::new(ScriptedFailPoint::new().always(FailPointSite::CreateCollectionsAfterFirst));
    let cloner = cluster
        .cloner(ClonerConfig::default())
        .with_fail_point(fail_point);

    let mut cloned = ClonedNamespaces::new();
    let err = cloner
        .copy_database("shop", &cluster.endpoint(), &[], &mut cloned)
        .unwrap_err();

    assert!(matches!(
        err,
        CloneError::FailPoint {
            site: FailPointSite::CreateCollectionsAfterFirst
        }
    ));
    assert_eq!(cluster.storage.collection_names("shop"), vec!["a"]);
    assert!(cloned.is_empty());
}

#[test]
fn fail_point_interrupts_copy() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a").with_documents(numbered_docs(5)),
    );
    let fail_point = Arc::new(ScriptedFailPoint::new().after(FailPointSite::CopyBeforeInsert, 2));
    let cloner = cluster
        .cloner(ClonerConfig::default())
        .with_fail_point(fail_point.clone());

    let mut cloned = ClonedNamespaces::new();
    let err = cloner
        .copy_database("shop", &cluster.endpoint(), &[], &mut cloned)
        .unwrap_err();

    assert!(matches!(err, CloneError::FailPoint { .. }));
    assert_eq!(cluster.storage.document_count(&shop("a")), 2);
    assert_eq!(fail_point.checks(FailPointSite::CopyBeforeInsert), 3);
}

#[test]
fn refuses_to_clone_from_self() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection("shop", RemoteCollection::new("a"));
    let config = ClonerConfig::default().with_local_host(HostAndPort::new(REMOTE_HOST, REMOTE_PORT));

    let (result, _) = run(&cluster, config, &[]);

    assert!(matches!(result, Err(CloneError::IllegalOperation { .. })));
    assert!(cluster.remote.queries().is_empty());
}

#[test]
fn unreachable_source_is_a_connection_error() {
    let cluster = TestCluster::new();
    cluster.remote.set_unreachable(true);

    let (result, _) = run(&cluster, ClonerConfig::default(), &[]);
    assert!(matches!(result, Err(CloneError::Connection { .. })));
}

#[test]
fn authenticates_with_internal_credential() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a").with_documents(numbered_docs(2)),
    );
    cluster
        .remote
        .require_credential(InternalCredential::new("__system", "keyfile"));

    let bad = ClonerConfig::default()
        .with_internal_credential(InternalCredential::new("__system", "wrong"));
    let (result, _) = run(&cluster, bad, &[]);
    assert!(matches!(result, Err(CloneError::Connection { .. })));

    let (result, _) = run(&cluster, ClonerConfig::default(), &[]);
    assert!(matches!(result, Err(CloneError::Remote(_))));

    let good = ClonerConfig::default()
        .with_internal_credential(InternalCredential::new("__system", "keyfile"));
    let (result, _) = run(&cluster, good, &[]);
    result.unwrap();
    assert_eq!(cluster.storage.document_count(&shop("a")), 2);
}

#[test]
fn cursor_failure_is_a_remote_error() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a").with_documents(numbered_docs(10)),
    );
    cluster.remote.set_default_batch_size(4);
    cluster.remote.fail_cursors();

    let (result, _) = run(&cluster, ClonerConfig::default(), &[]);

    assert!(matches!(result, Err(CloneError::Remote(_))));
    assert_eq!(cluster.storage.document_count(&shop("a")), 4);
    assert!(!cluster.storage.is_locked("shop"));
}

#[test]
fn queries_request_exhaustive_delivery() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a").with_documents(numbered_docs(2)),
    );

    let (result, _) = run(&cluster, ClonerConfig::default().with_batch_size(50), &[]);
    result.unwrap();

    let queries = cluster.remote.queries();
    assert_eq!(queries.len(), 1);
    assert!(queries[0].exhaust);
    assert!(queries[0].no_cursor_timeout);
    assert_eq!(queries[0].batch_size, 50);
    assert!(queries[0].filter.is_empty());
}

#[test]
fn skips_views_and_restricted_system_collections() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection("shop", RemoteCollection::new("a"));
    cluster.remote.add_collection("shop", RemoteCollection::view("recent"));
    cluster
        .remote
        .add_collection("shop", RemoteCollection::new("system.profile"));
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("system.js").with_documents(numbered_docs(1)),
    );

    let (result, cloned) = run(&cluster, ClonerConfig::default(), &[]);
    result.unwrap();

    assert_eq!(names(&cloned), vec!["shop.a", "shop.system.js"]);
    assert_eq!(cluster.storage.collection_names("shop"), vec!["a", "system.js"]);
}

#[test]
fn rejects_names_clients_cannot_create() {
    let cluster = TestCluster::new();
    cluster
        .remote
        .add_collection("shop", RemoteCollection::new("bad$name"));

    let (result, _) = run(&cluster, ClonerConfig::default(), &[]);
    assert!(matches!(result, Err(CloneError::InvalidNamespace { .. })));
}

#[test]
fn invalid_remote_options_fail_before_creation() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("a").with_options(vec![("capped".into(), int(1))]),
    );

    let (result, _) = run(&cluster, ClonerConfig::default(), &[]);

    assert!(matches!(result, Err(CloneError::InvalidOptions { .. })));
    assert!(cluster.storage.collection_names("shop").is_empty());
}

#[test]
fn remote_options_are_applied() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection(
        "shop",
        RemoteCollection::new("log")
            .with_embedded_id_index()
            .with_options(vec![
                ("capped".into(), clonedb_codec::Value::Bool(true)),
                ("size".into(), int(4096)),
            ]),
    );

    let (result, _) = run(&cluster, ClonerConfig::default(), &[]);
    result.unwrap();

    let local = cluster.storage.lookup_collection(&shop("log")).unwrap();
    assert!(local.options.capped);
    assert_eq!(local.options.size, Some(4096));
}

#[test]
fn cloned_set_is_reset_on_entry() {
    let cluster = TestCluster::new();
    cluster.remote.add_collection("shop", RemoteCollection::new("a"));

    let mut cloned = ClonedNamespaces::new();
    cloned.insert(shop("stale"));
    cluster
        .cloner(ClonerConfig::default())
        .copy_database("shop", &cluster.endpoint(), &[], &mut cloned)
        .unwrap();

    assert_eq!(names(&cloned), vec!["shop.a"]);
}
