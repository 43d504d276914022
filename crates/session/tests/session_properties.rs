//! End-to-end properties of the session over the layered engine and the
//! in-memory provider.

use std::{sync::Arc, time::Duration};

use stratadb_session::{Error, ManagerConfig, SessionManager, WritePermission};
use stratadb_store::{MemoryRowStore, Row, RowKey, RowScan, RowStore, WriteCondition, WriteOutcome};
use stratadb_test_utils::{fixture_registry, sequential_ids, simple_entity};
use stratadb_types::{Entity, Query, TenantId};

const BASE: &str = "entities-base";
const LIVE: &str = "entities-live";
const TABLE: &str = "simpletables";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn manager_over(store: Arc<MemoryRowStore>, layers: &[&str]) -> SessionManager {
    SessionManager::new(
        store,
        fixture_registry(),
        ManagerConfig::builder()
            .layers(layers.iter().map(|s| s.to_string()).collect())
            .id_generator(sequential_ids("id"))
            .build(),
    )
    .expect("manager")
}

fn single_layer() -> (Arc<MemoryRowStore>, SessionManager) {
    init_tracing();
    let store = Arc::new(MemoryRowStore::new([LIVE]));
    let manager = manager_over(store.clone(), &[LIVE]);
    (store, manager)
}

fn required_id(entity: &Entity) -> String {
    entity.id().expect("persisted entity has an id").to_string()
}

#[tokio::test]
async fn test_put_assigns_id_and_increments_revision() {
    let (_, manager) = single_layer();
    let session = manager.session("test");

    let entity = session.put(simple_entity("garry", "john")).await.expect("put");
    assert_eq!(entity.id(), Some("id-1"));
    assert_eq!(entity.revision, 1);

    let entity = session.put(entity).await.expect("second put");
    assert_eq!(entity.revision, 2);
}

#[tokio::test]
async fn test_stale_write_fails_with_revision_conflict() {
    let (_, manager) = single_layer();
    let writer = manager.session("test");
    let other = manager.session("test");

    let entity = writer.put(simple_entity("garry", "john")).await.expect("put");
    let id = required_id(&entity);

    let fresh = writer
        .run(writer.get(TABLE, &id))
        .await
        .expect("get")
        .expect("entity");
    let stale = other
        .run(other.get(TABLE, &id))
        .await
        .expect("get")
        .expect("entity");

    let written = writer.put(fresh).await.expect("fresh put");
    assert_eq!(written.revision, 2);

    let error = other.put(stale).await.expect_err("stale put must fail");
    assert!(error.is_revision_conflict(), "got: {error}");
}

#[tokio::test]
async fn test_plain_delete_refuses_dangling_links() {
    let (_, manager) = single_layer();
    let session = manager.session("test");

    let a = session.put(simple_entity("a", "a")).await.expect("put");
    let b = session.put(simple_entity("b", "b")).await.expect("put");
    let b_id = required_id(&b);

    let a = session.link(a, TABLE, vec![b_id]).await.expect("link");
    let error = session.delete(a, false).await.expect_err("must refuse");
    assert!(matches!(error, Error::DanglingLinks { .. }));
}

#[tokio::test]
async fn test_cascade_delete_removes_entity_and_reciprocal_links() {
    let (_, manager) = single_layer();
    let session = manager.session("test");

    let a = session.put(simple_entity("a", "a")).await.expect("put");
    let b = session.put(simple_entity("b", "b")).await.expect("put");
    let (a_id, b_id) = (required_id(&a), required_id(&b));

    let a = session.link(a, TABLE, vec![b_id.clone()]).await.expect("link");
    session.delete(a, true).await.expect("cascade delete");

    // A fresh session sees the entity gone and the target's back-reference
    // cleaned up.
    let reader = manager.session("test");
    let (gone, b) = reader
        .run(async { tokio::join!(reader.get(TABLE, &a_id), reader.get(TABLE, &b_id)) })
        .await;
    assert!(gone.expect("get").is_none());
    let b = b.expect("get").expect("target survives");
    assert!(!b.links.contains(TABLE, &a_id));
}

#[tokio::test]
async fn test_link_reciprocity() {
    let (_, manager) = single_layer();
    let session = manager.session("test");

    let a = session.put(simple_entity("a", "a")).await.expect("put");
    let b = session.put(simple_entity("b", "b")).await.expect("put");
    let c = session.put(simple_entity("c", "c")).await.expect("put");
    let (a_id, b_id, c_id) = (required_id(&a), required_id(&b), required_id(&c));

    let a = session
        .link(a, TABLE, vec![b_id.clone(), c_id.clone()])
        .await
        .expect("link");

    let linked = session
        .run(session.get_links(&a, TABLE))
        .await
        .expect("resolve links");
    let linked_ids: Vec<String> = linked.iter().map(required_id).collect();
    assert_eq!(linked_ids, [b_id.clone(), c_id.clone()]);

    let reader = manager.session("test");
    reader
        .run(async {
            for id in [&b_id, &c_id] {
                let target = reader.get(TABLE, id).await?.expect("target");
                assert!(target.links.contains(TABLE, &a_id), "{id} lost its back-link");
            }
            Ok::<_, Error>(())
        })
        .await
        .expect("reciprocal check");
}

#[tokio::test]
async fn test_link_removal_keeps_other_targets_intact() {
    let (_, manager) = single_layer();
    let session = manager.session("test");

    let a = session.put(simple_entity("a", "a")).await.expect("put");
    let b = session.put(simple_entity("b", "b")).await.expect("put");
    let c = session.put(simple_entity("c", "c")).await.expect("put");
    let (a_id, b_id, c_id) = (required_id(&a), required_id(&b), required_id(&c));

    let a = session
        .link(a, TABLE, vec![b_id.clone(), c_id.clone()])
        .await
        .expect("link");
    let a = session.link(a, TABLE, vec![b_id.clone()]).await.expect("drop c");
    assert_eq!(session.link_ids(&a, TABLE), [b_id.clone()].into_iter().collect());

    let reader = manager.session("test");
    reader
        .run(async {
            let b = reader.get(TABLE, &b_id).await?.expect("b");
            let c = reader.get(TABLE, &c_id).await?.expect("c");
            assert!(b.links.contains(TABLE, &a_id));
            assert!(!c.links.contains(TABLE, &a_id));
            Ok::<_, Error>(())
        })
        .await
        .expect("reciprocal check");
}

#[tokio::test]
async fn test_link_single_none_clears_links() {
    let (_, manager) = single_layer();
    let session = manager.session("test");

    let a = session.put(simple_entity("a", "a")).await.expect("put");
    let b = session.put(simple_entity("b", "b")).await.expect("put");
    let b_id = required_id(&b);

    let a = session.link_single(a, TABLE, Some(b_id)).await.expect("link");
    assert_eq!(session.link_ids(&a, TABLE).len(), 1);

    let a = session.link_single(a, TABLE, None).await.expect("clear");
    assert!(a.links.is_empty());
}

#[tokio::test]
async fn test_delete_links_clears_both_sides() {
    let (_, manager) = single_layer();
    let session = manager.session("test");

    let a = session.put(simple_entity("a", "a")).await.expect("put");
    let b = session.put(simple_entity("b", "b")).await.expect("put");
    let (a_id, b_id) = (required_id(&a), required_id(&b));

    let a = session.link(a, TABLE, vec![b_id.clone()]).await.expect("link");
    let a = session.delete_links(a).await.expect("delete links");
    assert!(a.links.is_empty());

    let reader = manager.session("test");
    let b = reader
        .run(reader.get(TABLE, &b_id))
        .await
        .expect("get")
        .expect("b");
    assert!(!b.links.contains(TABLE, &a_id));
}

#[tokio::test]
async fn test_global_index_override_precedence() {
    init_tracing();
    let store = Arc::new(MemoryRowStore::new([BASE, LIVE]));
    let base = manager_over(store.clone(), &[BASE]);
    let stacked = manager_over(store.clone(), &[BASE, LIVE]);

    let promoted = base
        .session("test")
        .put(simple_entity("garry", "john"))
        .await
        .expect("base put");
    let id = required_id(&promoted);

    let mut override_copy = simple_entity("barry", "john");
    override_copy.id = Some(id.clone());
    let session = stacked.session("test");
    session.put(override_copy).await.expect("override put");

    let found = session
        .run(session.query_global(TABLE, "john"))
        .await
        .expect("query global");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].string_attribute("name"), Some("barry"));

    let unique = session
        .run(session.query_global_unique(TABLE, "john"))
        .await
        .expect("unique")
        .expect("entity");
    assert_eq!(unique.string_attribute("name"), Some("barry"));
}

#[tokio::test]
async fn test_secondary_index_is_tenant_isolated() {
    let (_, manager) = single_layer();
    let tenant_x = manager.session("tenant-x");
    let tenant_y = manager.session("tenant-y");

    tenant_x.put(simple_entity("garry", "lookup-x")).await.expect("put");
    tenant_y.put(simple_entity("garry", "lookup-y")).await.expect("put");

    let found = tenant_x
        .run(tenant_x.query_secondary(TABLE, "garry"))
        .await
        .expect("query secondary");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].string_attribute("globalLookup"), Some("lookup-x"));

    let unique = tenant_x
        .run(tenant_x.query_secondary_unique(TABLE, "garry"))
        .await
        .expect("unique")
        .expect("entity");
    assert_eq!(unique.string_attribute("globalLookup"), Some("lookup-x"));
}

#[tokio::test]
async fn test_unique_lookup_rejects_multiple_matches() {
    let (_, manager) = single_layer();
    let session = manager.session("test");

    session.put(simple_entity("a", "dup")).await.expect("put");
    session.put(simple_entity("b", "dup")).await.expect("put");

    let error = session
        .run(session.query_global_unique(TABLE, "dup"))
        .await
        .expect_err("two matches must fail");
    assert!(matches!(error, Error::MultipleResults { count: 2, .. }));
}

#[tokio::test]
async fn test_concurrent_gets_share_one_physical_call() {
    let (store, manager) = single_layer();
    let session = manager.session("test");

    let entity = session.put(simple_entity("garry", "john")).await.expect("put");
    let id = required_id(&entity);

    let before = store.counts().batch_get;
    let (first, second) = session
        .run(async { tokio::join!(session.get(TABLE, &id), session.get(TABLE, &id)) })
        .await;
    assert!(first.expect("get").is_some());
    assert!(second.expect("get").is_some());
    assert_eq!(store.counts().batch_get - before, 1);
}

#[tokio::test]
async fn test_write_invalidates_cached_entity() {
    let (_, manager) = single_layer();
    let session = manager.session("test");

    session
        .run(async {
            let entity = session.put(simple_entity("garry", "john")).await?;
            let id = entity.id().expect("id").to_string();

            let first = session.get(TABLE, &id).await?.expect("entity");
            assert_eq!(first.string_attribute("name"), Some("garry"));

            let mut updated = first.clone();
            updated.set_attribute("name", "barry");
            session.put(updated).await?;

            let second = session.get(TABLE, &id).await?.expect("entity");
            assert_eq!(second.string_attribute("name"), Some("barry"));
            Ok::<_, Error>(())
        })
        .await
        .expect("invalidation round trip");
}

#[tokio::test]
async fn test_forbidden_write_leaves_cache_untouched() {
    let (store, manager) = single_layer();
    let permission: WritePermission =
        Arc::new(|entity| {
            let locked = entity.attribute("locked").is_some();
            Box::pin(async move { !locked })
        });
    let session = manager.session_with_permission("test", permission);

    let entity = session.put(simple_entity("garry", "john")).await.expect("put");
    let id = required_id(&entity);

    let first = session
        .run(session.get(TABLE, &id))
        .await
        .expect("get")
        .expect("entity");
    let gets_before = store.counts().batch_get;
    let puts_before = store.counts().put;

    let mut locked = first.clone();
    locked.set_attribute("locked", true);
    let error = session.put(locked).await.expect_err("must be forbidden");
    assert!(matches!(error, Error::ForbiddenWrite { .. }));

    // Nothing was written and the memoized slot survived.
    assert_eq!(store.counts().put, puts_before);
    let again = session
        .run(session.get(TABLE, &id))
        .await
        .expect("get")
        .expect("entity");
    assert_eq!(again.string_attribute("name"), Some("garry"));
    assert_eq!(store.counts().batch_get, gets_before);
}

#[tokio::test]
async fn test_multi_hop_traversal_through_dispatch_loop() {
    let (_, manager) = single_layer();
    let session = manager.session("test");

    let a = session.put(simple_entity("a", "a")).await.expect("put");
    let b = session.put(simple_entity("b", "b")).await.expect("put");
    let c = session.put(simple_entity("c", "c")).await.expect("put");
    let (a_id, b_id, c_id) = (required_id(&a), required_id(&b), required_id(&c));

    let a = session.link(a, TABLE, vec![b_id.clone()]).await.expect("link a-b");
    let b = session
        .run(session.get(TABLE, &b_id))
        .await
        .expect("get")
        .expect("b");
    session.link(b, TABLE, vec![a_id.clone(), c_id.clone()]).await.expect("link b-c");

    // Each hop is only discovered once the previous load resolves; the loop
    // flushes as many rounds as the chain needs.
    let reader = manager.session("test");
    let reached_c = reader
        .run(async {
            let a = reader.get(TABLE, &a_id).await?.expect("a");
            let hops = reader.get_links(&a, TABLE).await?;
            for hop in hops {
                let next = reader.get_links(&hop, TABLE).await?;
                if next.iter().any(|e| e.id() == Some(c_id.as_str())) {
                    return Ok(true);
                }
            }
            Ok::<_, Error>(false)
        })
        .await
        .expect("traversal");
    assert!(reached_c);
    // The write-side copy of `a` never saw b's later link; reads went through
    // the driver.
    assert_eq!(session.link_ids(&a, TABLE).len(), 1);
}

#[tokio::test]
async fn test_get_many_is_positional_and_empty_is_free() {
    let (store, manager) = single_layer();
    let session = manager.session("test");

    let entity = session.put(simple_entity("garry", "john")).await.expect("put");
    let id = required_id(&entity);

    let results = session
        .run(session.get_many(TABLE, &["missing".to_string(), id]))
        .await
        .expect("get many");
    assert_eq!(results.len(), 2);
    assert!(results[0].is_none());
    assert!(results[1].is_some());

    let before = store.counts().batch_get;
    let empty = session.run(session.get_many(TABLE, &[])).await.expect("empty");
    assert!(empty.is_empty());
    assert_eq!(store.counts().batch_get, before);
}

#[tokio::test]
async fn test_query_memoizes_and_write_invalidates() {
    let (store, manager) = single_layer();
    let session = manager.session("test");

    session.put(simple_entity("garry", "john")).await.expect("put");

    // One layer, two partitions probed (tenant + global) per physical query.
    let before = store.counts().query;
    let (first, second) = session
        .run(async { tokio::join!(session.query(TABLE), session.query(TABLE)) })
        .await;
    assert_eq!(first.expect("query").len(), 1);
    assert_eq!(second.expect("query").len(), 1);
    assert_eq!(store.counts().query - before, 2);

    // Same table, different filter: its own cache slot, its own call.
    let limited = session
        .run(session.query_where(Query::builder().table(TABLE).limit(1).build()))
        .await
        .expect("query");
    assert_eq!(limited.len(), 1);
    assert_eq!(store.counts().query - before, 4);

    // A write to the table evicts every slot for it.
    session.put(simple_entity("barry", "jane")).await.expect("put");
    let after_write = session.run(session.query(TABLE)).await.expect("query");
    assert_eq!(after_write.len(), 2);
    assert_eq!(store.counts().query - before, 6);
}

#[tokio::test]
async fn test_put_global_is_visible_to_every_tenant() {
    let (_, manager) = single_layer();
    let session = manager.session("tenant-a");

    let shared = session.put_global(simple_entity("shared", "s")).await.expect("put global");
    let id = required_id(&shared);
    assert!(shared.source.as_ref().is_some_and(|s| s.tenant == TenantId::global()));

    let other = manager.session("tenant-b");
    let seen = other
        .run(other.get(TABLE, &id))
        .await
        .expect("get")
        .expect("global entity visible");
    assert_eq!(seen.string_attribute("name"), Some("shared"));
}

#[tokio::test]
async fn test_query_pagination_filters() {
    let (_, manager) = single_layer();
    let session = manager.session("test");

    for id in ["a-1", "a-2", "a-3", "b-1"] {
        let mut entity = simple_entity(id, "x");
        entity.id = Some(id.to_string());
        session.put(entity).await.expect("put");
    }

    session
        .run(async {
            let prefixed = session
                .query_where(Query::builder().table(TABLE).starts_with("a-").build())
                .await?;
            assert_eq!(prefixed.len(), 3);

            let after = session
                .query_where(
                    Query::builder().table(TABLE).starts_with("a-").after("a-1").build(),
                )
                .await?;
            let ids: Vec<_> = after.iter().filter_map(Entity::id).collect();
            assert_eq!(ids, ["a-2", "a-3"]);

            let limited =
                session.query_where(Query::builder().table(TABLE).limit(2).build()).await?;
            assert_eq!(limited.len(), 2);
            Ok::<_, Error>(())
        })
        .await
        .expect("pagination");
}

#[tokio::test]
async fn test_run_drives_targets_without_pending_loads() {
    let (_, manager) = single_layer();
    let session = manager.session("test");

    // Already-complete work returns on the first poll.
    assert_eq!(session.run(async { 7 }).await, 7);

    // A target waiting on its own timer, not on session loads: the loop
    // parks on the grace interval and still notices completion promptly.
    let value = session
        .run(async {
            tokio::time::sleep(Duration::from_millis(25)).await;
            9
        })
        .await;
    assert_eq!(value, 9);
}

/// Provider double that fails every read.
struct FailingStore;

#[async_trait::async_trait]
impl RowStore for FailingStore {
    async fn batch_get(
        &self,
        _table: &str,
        _keys: &[RowKey],
    ) -> stratadb_store::Result<Vec<Row>> {
        stratadb_store::error::UnavailableSnafu { message: "injected outage".to_string() }.fail()
    }

    async fn query(
        &self,
        _table: &str,
        _partition: &TenantId,
        _scan: &RowScan,
    ) -> stratadb_store::Result<Vec<Row>> {
        stratadb_store::error::UnavailableSnafu { message: "injected outage".to_string() }.fail()
    }

    async fn query_global_index(
        &self,
        _table: &str,
        _value: &str,
    ) -> stratadb_store::Result<Vec<Row>> {
        stratadb_store::error::UnavailableSnafu { message: "injected outage".to_string() }.fail()
    }

    async fn query_secondary_index(
        &self,
        _table: &str,
        _partition: &TenantId,
        _value: &str,
    ) -> stratadb_store::Result<Vec<String>> {
        stratadb_store::error::UnavailableSnafu { message: "injected outage".to_string() }.fail()
    }

    async fn put(
        &self,
        _table: &str,
        _row: Row,
        _condition: WriteCondition,
    ) -> stratadb_store::Result<WriteOutcome> {
        stratadb_store::error::UnavailableSnafu { message: "injected outage".to_string() }.fail()
    }

    async fn update_links(
        &self,
        _table: &str,
        _key: &RowKey,
        _update: stratadb_store::LinkUpdate,
    ) -> stratadb_store::Result<WriteOutcome> {
        stratadb_store::error::UnavailableSnafu { message: "injected outage".to_string() }.fail()
    }

    async fn delete(&self, _table: &str, _key: &RowKey) -> stratadb_store::Result<bool> {
        stratadb_store::error::UnavailableSnafu { message: "injected outage".to_string() }.fail()
    }

    fn batch_limit(&self) -> usize {
        50
    }
}

#[tokio::test]
async fn test_provider_failure_reaches_every_coalesced_waiter() {
    init_tracing();
    let manager = SessionManager::new(
        Arc::new(FailingStore),
        fixture_registry(),
        ManagerConfig::builder().layers(vec![LIVE.to_string()]).build(),
    )
    .expect("manager");
    let session = manager.session("test");

    let (first, second) = session
        .run(async { tokio::join!(session.get(TABLE, "u-1"), session.get(TABLE, "u-1")) })
        .await;
    assert!(matches!(first, Err(Error::Driver { .. })));
    assert!(matches!(second, Err(Error::Driver { .. })));
}
