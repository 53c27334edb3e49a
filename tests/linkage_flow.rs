//! End-to-end linkage flows against the in-memory store

use std::sync::Arc;
use std::time::Duration;

use caregraph::{
    AccountDoc, AccountStore, CancelToken, CareGraphError, IdentityResolver, LinkageGraph,
    MemoryStore, ResolverConfig, Role, StorageKey,
};

struct Fixture {
    store: Arc<MemoryStore>,
    graph: Arc<LinkageGraph<MemoryStore>>,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let resolver = Arc::new(IdentityResolver::with_config(
        Arc::clone(&store),
        ResolverConfig {
            retry_base_delay: Duration::from_millis(1),
            ..ResolverConfig::default()
        },
    ));
    let graph = Arc::new(LinkageGraph::new(Arc::clone(&store), resolver));
    Fixture { store, graph }
}

async fn seed(fx: &Fixture, email: &str, role: Role) -> AccountDoc {
    let acc = AccountDoc::new(email, "Test", "Account", role).unwrap();
    fx.store.insert_account(acc.clone()).await.unwrap();
    acc
}

async fn seed_with_uid(fx: &Fixture, email: &str, role: Role, uid: &str) -> AccountDoc {
    let mut acc = AccountDoc::new(email, "Test", "Account", role).unwrap();
    acc.uid = uid.to_string();
    fx.store.insert_account(acc.clone()).await.unwrap();
    acc
}

async fn stored(fx: &Fixture, acc: &AccountDoc) -> AccountDoc {
    fx.store
        .get_account(&StorageKey::from_stored(acc.key.clone()))
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn link_stores_uid_not_email() {
    let fx = fixture();
    let cancel = CancelToken::new();

    let carer = seed(&fx, "a.b@example.com", Role::Caregiver).await;
    let elder = seed_with_uid(&fx, "elder@example.com", Role::Elderly, "UID123").await;

    fx.graph
        .link("a.b@example.com", "elder@example.com", &cancel)
        .await
        .unwrap();

    let record = stored(&fx, &carer).await;
    assert_eq!(record.linked_elderly, vec!["UID123".to_string()]);
    assert!(!record
        .link_identifier_union()
        .iter()
        .any(|e| e == "elder@example.com"));

    // Exactly one entry, even with the legacy mirror written
    let listed = fx.graph.list_linked_elderly(&record, &cancel).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].uid, elder.uid);
}

#[tokio::test]
async fn second_link_is_already_linked() {
    let fx = fixture();
    let cancel = CancelToken::new();

    seed(&fx, "carer@example.com", Role::Caregiver).await;
    seed(&fx, "elder@example.com", Role::Elderly).await;

    fx.graph
        .link("carer@example.com", "elder@example.com", &cancel)
        .await
        .unwrap();

    match fx
        .graph
        .link("carer@example.com", "elder@example.com", &cancel)
        .await
    {
        Err(CareGraphError::AlreadyLinked { .. }) => {}
        other => panic!("expected AlreadyLinked, got {other:?}"),
    }
}

#[tokio::test]
async fn link_detects_duplicates_across_mixed_identifier_forms() {
    let fx = fixture();
    let cancel = CancelToken::new();

    // Legacy record already references the elderly by email only
    let elder = seed(&fx, "elder@example.com", Role::Elderly).await;
    let mut carer = AccountDoc::new("carer@example.com", "Care", "Giver", Role::Caregiver)
        .unwrap();
    carer.elderly_ids = vec!["elder@example.com".into()];
    fx.store.insert_account(carer).await.unwrap();

    // Linking by uid must recognize the email-form edge as the same elderly
    match fx.graph.link("carer@example.com", &elder.uid, &cancel).await {
        Err(CareGraphError::AlreadyLinked { elderly, .. }) => {
            assert_eq!(elderly, elder.uid);
        }
        other => panic!("expected AlreadyLinked, got {other:?}"),
    }
}

#[tokio::test]
async fn unlink_is_idempotent() {
    let fx = fixture();
    let cancel = CancelToken::new();

    let carer = seed(&fx, "carer@example.com", Role::Caregiver).await;
    let elder = seed(&fx, "elder@example.com", Role::Elderly).await;

    fx.graph
        .link("carer@example.com", "elder@example.com", &cancel)
        .await
        .unwrap();

    fx.graph
        .unlink("carer@example.com", &elder.uid, &cancel)
        .await
        .unwrap();
    // Removing an absent edge is not an error
    fx.graph
        .unlink("carer@example.com", &elder.uid, &cancel)
        .await
        .unwrap();

    let record = stored(&fx, &carer).await;
    assert!(record.link_identifier_union().is_empty());
}

#[tokio::test]
async fn unlink_unknown_caregiver_is_not_found() {
    let fx = fixture();
    let cancel = CancelToken::new();

    assert!(matches!(
        fx.graph.unlink("ghost@example.com", "UID123", &cancel).await,
        Err(CareGraphError::PartyNotFound(_))
    ));
}

#[tokio::test]
async fn concurrent_links_produce_exactly_one_edge() {
    let fx = fixture();
    let cancel = CancelToken::new();

    let carer = seed(&fx, "carer@example.com", Role::Caregiver).await;
    seed(&fx, "elder@example.com", Role::Elderly).await;

    let graph_a = Arc::clone(&fx.graph);
    let graph_b = Arc::clone(&fx.graph);
    let cancel_a = cancel.clone();
    let cancel_b = cancel.clone();

    let (a, b) = tokio::join!(
        tokio::spawn(async move {
            graph_a
                .link("carer@example.com", "elder@example.com", &cancel_a)
                .await
        }),
        tokio::spawn(async move {
            graph_b
                .link("carer@example.com", "elder@example.com", &cancel_b)
                .await
        }),
    );
    let results = [a.unwrap(), b.unwrap()];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let already_linked = results
        .iter()
        .filter(|r| matches!(r, Err(CareGraphError::AlreadyLinked { .. })))
        .count();
    assert_eq!(successes, 1, "exactly one edge must be created");
    assert_eq!(already_linked, 1, "the loser must observe AlreadyLinked");

    // No silently duplicated array entry
    let record = stored(&fx, &carer).await;
    assert_eq!(record.linked_elderly.len(), 1);
    assert_eq!(record.linked_elder_uids.len(), 1);
}

#[tokio::test]
async fn link_survives_transient_store_failures_during_resolution() {
    let fx = fixture();
    let cancel = CancelToken::new();

    seed(&fx, "carer@example.com", Role::Caregiver).await;
    seed(&fx, "elder@example.com", Role::Elderly).await;

    // The resolver retries reads; the failure burst is shorter than the bound
    fx.store.fail_next_ops(2);
    fx.graph
        .link("carer@example.com", "elder@example.com", &cancel)
        .await
        .unwrap();
}

#[tokio::test]
async fn cancelled_link_does_not_mutate() {
    let fx = fixture();

    let carer = seed(&fx, "carer@example.com", Role::Caregiver).await;
    seed(&fx, "elder@example.com", Role::Elderly).await;

    let cancel = CancelToken::new();
    cancel.cancel();

    assert!(matches!(
        fx.graph
            .link("carer@example.com", "elder@example.com", &cancel)
            .await,
        Err(CareGraphError::Cancelled)
    ));

    let record = stored(&fx, &carer).await;
    assert!(record.linked_elderly.is_empty());
}
