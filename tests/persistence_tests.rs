// Core storage operation tests against the in-memory and file backends

use anyhow::Result;
use handinhand_store::*;
use pretty_assertions::assert_eq;
use std::sync::Arc;

use player_fixtures::*;

fn player_store() -> (Arc<MemoryBackend>, KeyValueStore<Player, MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let store = KeyValueStore::new(Arc::clone(&backend), "user");
    (backend, store)
}

#[tokio::test]
async fn test_new_player_receives_gold() -> Result<()> {
    let (backend, store) = player_store();
    assert!(!backend.contains_key("user:abc"));

    // Sign-up bonus applies to brand-new players as well as existing ones
    let grant = add_gold(100);
    let create = |id: &str| grant(new_player(id), id);

    let player = store.find_one_and_upsert("abc", &create, &grant).await?;
    assert_eq!(player.inventory.gold, 1100);
    assert_eq!(player.profile.nickname, "abc");
    assert!(backend.contains_key("user:abc"));
    assert_eq!(store.find_one("abc").await?, player);

    let richer = store.find_one_and_upsert("abc", &create, &grant).await?;
    assert_eq!(richer.inventory.gold, 1200);
    assert_eq!(store.find_one("abc").await?, richer);
    Ok(())
}

#[tokio::test]
async fn test_upsert_on_empty_store_writes_created_value() -> Result<()> {
    let (_, store) = player_store();

    let created = store
        .find_one_and_upsert("fresh", &new_player, &add_gold(100))
        .await?;
    assert_eq!(created, new_player("fresh"));
    assert_eq!(store.find_one("fresh").await?, new_player("fresh"));
    Ok(())
}

#[tokio::test]
async fn test_refusing_update_surfaces_as_error() -> Result<()> {
    let (backend, store) = player_store();
    let refuse = |_: Player, id: &str| -> Player { panic!("User {id} already exists") };

    store.find_one_and_upsert("abc", &new_player, &refuse).await?;
    let before = backend.get("user:abc").await?;

    let err = store
        .find_one_and_upsert("abc", &new_player, &refuse)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StoreError::CallbackPanicked {
            message: "User abc already exists".to_string()
        }
    );
    assert_eq!(backend.get("user:abc").await?, before);
    Ok(())
}

#[tokio::test]
async fn test_update_applies_transform() -> Result<()> {
    let (_, store) = player_store();
    store.insert_one("p1", &new_player).await?;

    let updated = store.find_one_and_update("p1", &add_gold(250)).await?;
    assert_eq!(updated.inventory.gold, STARTING_GOLD + 250);
    assert_eq!(store.find_one("p1").await?, updated);
    Ok(())
}

#[tokio::test]
async fn test_identity_update_is_idempotent() -> Result<()> {
    let (_, store) = player_store();
    store.insert_one("p1", &new_player).await?;

    let first = store.find_one_and_update("p1", &identity).await?;
    let second = store.find_one_and_update("p1", &identity).await?;
    assert_eq!(first, second);
    assert_eq!(first, new_player("p1"));
    Ok(())
}

#[tokio::test]
async fn test_update_missing_player_leaves_store_unchanged() {
    let (backend, store) = player_store();

    let result = store.find_one_and_update("ghost", &add_gold(5)).await;
    assert_eq!(result, Err(StoreError::not_found("ghost")));
    assert!(backend.is_empty());
    assert_eq!(backend.stats().sets, 0);
}

#[tokio::test]
async fn test_delete_then_find() -> Result<()> {
    let (_, store) = player_store();
    store.insert_one("p1", &new_player).await?;

    store.delete_one("p1").await?;
    assert_eq!(store.find_one("p1").await, Err(StoreError::not_found("p1")));
    assert_eq!(store.delete_one("p1").await, Err(StoreError::not_found("p1")));
    Ok(())
}

#[tokio::test]
async fn test_prefixes_isolate_entity_types() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let players: KeyValueStore<Player, _> = KeyValueStore::new(Arc::clone(&backend), "user");
    let inventories: KeyValueStore<Inventory, _> =
        KeyValueStore::new(Arc::clone(&backend), "inventory");

    players.insert_one("abc", &new_player).await?;
    assert_eq!(
        inventories.find_one("abc").await,
        Err(StoreError::not_found("abc"))
    );
    assert!(backend.contains_key("user:abc"));
    Ok(())
}

#[tokio::test]
async fn test_file_backend_persists_players() -> Result<()> {
    let dir = tempfile::tempdir()?;

    {
        let backend = Arc::new(create_file_backend(dir.path()).await?);
        let store: KeyValueStore<Player, _> = create_kv_store(backend, "user");
        store
            .find_one_and_upsert("abc", &new_player, &add_gold(100))
            .await?;
        store.find_one_and_update("abc", &add_gold(100)).await?;
    }

    let reopened = Arc::new(FileBackend::open(dir.path()).await?);
    let store: KeyValueStore<Player, _> = create_kv_store(reopened, "user");
    assert_eq!(store.find_one("abc").await?.inventory.gold, 1100);
    Ok(())
}

#[tokio::test]
async fn test_memory_repository_matches_kv_store() -> Result<()> {
    let repo = MemoryRepository::<Player>::new();

    let created = repo
        .find_one_and_upsert("abc", &new_player, &add_gold(100))
        .await?;
    let updated = repo
        .find_one_and_upsert("abc", &new_player, &add_gold(100))
        .await?;

    assert_eq!(created.inventory.gold, STARTING_GOLD);
    assert_eq!(updated.inventory.gold, 1100);
    assert_eq!(repo.find_one("abc").await?, updated);
    Ok(())
}

#[tokio::test]
async fn test_errors_keep_their_kind_through_anyhow() {
    let err: anyhow::Error = StoreError::not_found("abc").into();
    let back = StoreError::from(err.context("loading player"));
    assert_eq!(back, StoreError::not_found("abc"));

    let foreign = StoreError::from(anyhow::anyhow!("socket closed"));
    assert!(foreign.is_retryable());
    assert_eq!(foreign.kind(), "backend");
}
