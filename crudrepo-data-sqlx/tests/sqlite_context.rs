use crudrepo_data::{CrudRepository, DataError, Entity, FlushMode, ManagedKey, UnitOfWork};
use crudrepo_data_sqlx::{connect, PersistenceConfig, SqliteContext, SqliteEntity, SqliteQuery};
use sqlx::SqlitePool;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
struct TestEntity {
    id: Option<i64>,
    content: String,
}

impl TestEntity {
    fn new(content: &str) -> Self {
        Self {
            id: None,
            content: content.to_string(),
        }
    }
}

impl Entity for TestEntity {
    type Id = i64;

    fn table_name() -> &'static str {
        "test_entity"
    }
    fn id_column() -> &'static str {
        "id"
    }
    fn columns() -> &'static [&'static str] {
        &["id", "content"]
    }
    fn id(&self) -> Option<&i64> {
        self.id.as_ref()
    }
    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

impl SqliteEntity for TestEntity {
    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query.bind(self.content.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
struct Tag {
    id: Option<i64>,
    label: String,
}

impl Tag {
    fn new(label: &str) -> Self {
        Self {
            id: None,
            label: label.to_string(),
        }
    }
}

impl Entity for Tag {
    type Id = i64;

    fn table_name() -> &'static str {
        "tag"
    }
    fn id_column() -> &'static str {
        "id"
    }
    fn columns() -> &'static [&'static str] {
        &["id", "label"]
    }
    fn id(&self) -> Option<&i64> {
        self.id.as_ref()
    }
    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

impl SqliteEntity for Tag {
    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query.bind(self.label.as_str())
    }
}

const CONTENT: &str = "CONTENT";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn create_schema(pool: &SqlitePool) {
    sqlx::query(
        "CREATE TABLE test_entity (id INTEGER PRIMARY KEY AUTOINCREMENT, content TEXT NOT NULL)",
    )
    .execute(pool)
    .await
    .unwrap();
    sqlx::query(
        "CREATE TABLE tag (id INTEGER PRIMARY KEY AUTOINCREMENT, label TEXT NOT NULL UNIQUE)",
    )
    .execute(pool)
    .await
    .unwrap();
}

async fn setup() -> SqlitePool {
    init_tracing();
    let pool = connect(&PersistenceConfig::default()).await.unwrap();
    create_schema(&pool).await;
    pool
}

async fn row_count(ctx: &SqliteContext, table: &str) -> i64 {
    let mut conn = ctx.connection().await;
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(&mut *conn)
        .await
        .unwrap()
}

async fn stored_content(ctx: &SqliteContext, id: i64) -> String {
    let mut conn = ctx.connection().await;
    sqlx::query_scalar("SELECT content FROM test_entity WHERE id = ?")
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_save_inserts_row_immediately() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();
    assert_eq!(row_count(&ctx, "test_entity").await, 0);

    let saved = repo.save(TestEntity::new(CONTENT)).await.unwrap();

    assert!(saved.id.is_some());
    assert_eq!(row_count(&ctx, "test_entity").await, 1);
    assert_eq!(ctx.pending_writes().await, 0);
}

#[tokio::test]
async fn test_save_and_flush_returns_entity_with_generated_id() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();

    let saved = repo.save_and_flush(TestEntity::new(CONTENT)).await.unwrap();

    assert_eq!(saved.id, Some(1));
    assert_eq!(saved.content, CONTENT);
    assert_eq!(stored_content(&ctx, 1).await, CONTENT);
}

#[tokio::test]
async fn test_save_all_and_find_all_keep_insertion_order() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();

    let saved = repo
        .save_all(["test1", "test2", "test3"].map(TestEntity::new))
        .await
        .unwrap();
    assert_eq!(saved.len(), 3);
    repo.flush().await.unwrap();

    let found = repo.find_all().await.unwrap();
    assert_eq!(found, saved);
    let contents: Vec<_> = found.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["test1", "test2", "test3"]);
}

#[tokio::test]
async fn test_find_one_missing_id() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();

    assert!(repo.find_one(&9999).await.unwrap().is_none());
    assert!(!repo.exists(&9999).await.unwrap());

    match repo.require_one(&9999).await {
        Err(DataError::NotFound(msg)) => assert!(msg.contains("9999"), "{msg}"),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn test_find_one_loads_row_into_managed_set() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    {
        let mut conn = ctx.connection().await;
        sqlx::query("INSERT INTO test_entity (id, content) VALUES (7, 'raw')")
            .execute(&mut *conn)
            .await
            .unwrap();
    }
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();
    let key = ManagedKey::of::<TestEntity>(&7);
    assert!(!ctx.is_managed(&key).await);

    let found = repo.require_one(&7).await.unwrap();

    assert_eq!(found.content, "raw");
    assert!(repo.exists(&7).await.unwrap());
    assert!(ctx.is_managed(&key).await);
}

#[tokio::test]
async fn test_update_is_deferred_until_flush() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();

    let mut saved = repo.save_and_flush(TestEntity::new("before")).await.unwrap();
    let id = saved.id.unwrap();

    saved.content = "draft".into();
    repo.save(saved.clone()).await.unwrap();
    saved.content = "after".into();
    repo.save(saved).await.unwrap();

    assert_eq!(ctx.pending_writes().await, 1);
    assert_eq!(stored_content(&ctx, id).await, "before");
    assert_eq!(repo.require_one(&id).await.unwrap().content, "after");

    repo.flush().await.unwrap();

    assert_eq!(ctx.pending_writes().await, 0);
    assert_eq!(stored_content(&ctx, id).await, "after");
}

#[tokio::test]
async fn test_merge_of_unknown_id_inserts_with_generated_id() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();

    let detached = TestEntity {
        id: Some(42),
        content: CONTENT.into(),
    };
    let saved = repo.save_and_flush(detached).await.unwrap();

    assert_eq!(saved.id, Some(1));
    assert!(repo.find_one(&42).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_transient_entity_is_noop() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();
    repo.save_and_flush(TestEntity::new("kept")).await.unwrap();

    repo.delete(&TestEntity::new("kept")).await.unwrap();
    repo.flush().await.unwrap();

    assert_eq!(ctx.pending_writes().await, 0);
    assert_eq!(row_count(&ctx, "test_entity").await, 1);
}

#[tokio::test]
async fn test_delete_removes_row_on_flush() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();
    let saved = repo.save_and_flush(TestEntity::new(CONTENT)).await.unwrap();
    let id = saved.id.unwrap();

    repo.delete(&saved).await.unwrap();

    assert!(repo.find_one(&id).await.unwrap().is_none());
    assert!(repo.find_all().await.unwrap().is_empty());
    assert_eq!(row_count(&ctx, "test_entity").await, 1);

    repo.flush().await.unwrap();
    assert_eq!(row_count(&ctx, "test_entity").await, 0);
}

#[tokio::test]
async fn test_merge_of_removed_entity_fails() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();
    let saved = repo.save_and_flush(TestEntity::new(CONTENT)).await.unwrap();

    repo.delete(&saved).await.unwrap();
    let err = repo.save(saved).await.unwrap_err();

    assert!(matches!(err, DataError::Other(_)), "{err}");
}

#[tokio::test]
async fn test_delete_all_accepts_borrowed_entities() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();
    let saved = repo
        .save_all(["a", "b", "c"].map(TestEntity::new))
        .await
        .unwrap();

    repo.delete_all(&saved[..2]).await.unwrap();
    repo.flush().await.unwrap();

    let remaining = repo.find_all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].content, "c");
}

#[tokio::test]
async fn test_delete_all_of_type_returns_affected_count() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();
    repo.save_all(["test1", "test2", "test3"].map(TestEntity::new))
        .await
        .unwrap();
    repo.flush().await.unwrap();

    let affected = repo.delete_all_of_type().await.unwrap();
    repo.flush().await.unwrap();

    assert_eq!(affected, 3);
    assert!(repo.find_all().await.unwrap().is_empty());
    assert_eq!(row_count(&ctx, "test_entity").await, 0);
}

#[tokio::test]
async fn test_bulk_delete_leaves_managed_entities_stale() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();
    let saved = repo.save_and_flush(TestEntity::new(CONTENT)).await.unwrap();
    let id = saved.id.unwrap();

    repo.delete_all_of_type().await.unwrap();

    assert_eq!(row_count(&ctx, "test_entity").await, 0);
    // The managed copy is not evicted by the bulk statement.
    assert_eq!(repo.find_one(&id).await.unwrap(), Some(saved));
}

#[tokio::test]
async fn test_flush_of_update_to_deleted_row_fails_as_stale() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();
    let mut saved = repo.save_and_flush(TestEntity::new(CONTENT)).await.unwrap();
    repo.delete_all_of_type().await.unwrap();

    saved.content = "edited".into();
    let err = repo.save_and_flush(saved).await.unwrap_err();

    assert!(
        matches!(&err, DataError::Other(msg) if msg.contains("stale entity test_entity#1")),
        "{err}"
    );
    assert_eq!(ctx.pending_writes().await, 1);
    assert_eq!(row_count(&ctx, "test_entity").await, 0);
}

#[tokio::test]
async fn test_save_all_stops_at_first_failure() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let tags = CrudRepository::<Tag, _>::new(&ctx).unwrap();

    let err = tags
        .save_all(["x", "x", "y"].map(Tag::new))
        .await
        .unwrap_err();

    assert!(matches!(err, DataError::Database(_)), "{err}");
    assert_eq!(row_count(&ctx, "tag").await, 1);
    let mut conn = ctx.connection().await;
    let later: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tag WHERE label = 'y'")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    assert_eq!(later, 0);
}

#[tokio::test]
async fn test_auto_flush_before_query() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Auto).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();
    assert_eq!(repo.context().flush_mode(), FlushMode::Auto);
    let mut saved = repo.save(TestEntity::new("before")).await.unwrap();
    let id = saved.id.unwrap();

    saved.content = "after".into();
    repo.save(saved).await.unwrap();
    assert_eq!(ctx.pending_writes().await, 1);

    repo.find_all().await.unwrap();

    assert_eq!(ctx.pending_writes().await, 0);
    assert_eq!(stored_content(&ctx, id).await, "after");
}

#[tokio::test]
async fn test_immediate_flush_after_every_write() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Immediate).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();
    assert_eq!(repo.context().flush_mode(), FlushMode::Immediate);
    let mut saved = repo.save(TestEntity::new("before")).await.unwrap();
    let id = saved.id.unwrap();

    saved.content = "after".into();
    repo.save(saved.clone()).await.unwrap();
    assert_eq!(ctx.pending_writes().await, 0);
    assert_eq!(stored_content(&ctx, id).await, "after");

    repo.delete(&saved).await.unwrap();
    assert_eq!(row_count(&ctx, "test_entity").await, 0);
}

#[tokio::test]
async fn test_provider_error_is_surfaced() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let tags = CrudRepository::<Tag, _>::new(&ctx).unwrap();
    tags.save(Tag::new("rust")).await.unwrap();

    let err = tags.save(Tag::new("rust")).await.unwrap_err();

    assert!(matches!(err, DataError::Database(_)), "{err}");
    assert_eq!(row_count(&ctx, "tag").await, 1);
}

#[tokio::test]
async fn test_failed_flush_keeps_writes_pending() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let tags = CrudRepository::<Tag, _>::new(&ctx).unwrap();
    tags.save(Tag::new("a")).await.unwrap();
    let mut b = tags.save(Tag::new("b")).await.unwrap();

    b.label = "a".into();
    tags.save(b).await.unwrap();
    let err = tags.flush().await.unwrap_err();

    assert!(matches!(err, DataError::Database(_)), "{err}");
    assert_eq!(ctx.pending_writes().await, 1);
}

#[tokio::test]
async fn test_repositories_share_one_context() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let entities = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();
    let tags = CrudRepository::<Tag, _>::new(&ctx).unwrap();

    let mut entity = entities.save(TestEntity::new("before")).await.unwrap();
    entity.content = "after".into();
    entities.save(entity.clone()).await.unwrap();
    let tag = tags.save(Tag::new("shared")).await.unwrap();
    tags.delete(&tag).await.unwrap();
    assert_eq!(ctx.pending_writes().await, 2);

    // Flushing through one repository applies the writes of both.
    tags.flush().await.unwrap();

    assert_eq!(ctx.pending_writes().await, 0);
    assert_eq!(stored_content(&ctx, entity.id.unwrap()).await, "after");
    assert_eq!(row_count(&ctx, "tag").await, 0);
}

#[tokio::test]
async fn test_commit_makes_writes_visible_to_pool() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();
    let mut saved = repo.save(TestEntity::new("before")).await.unwrap();
    saved.content = "after".into();
    repo.save(saved).await.unwrap();
    drop(repo);

    ctx.commit().await.unwrap();

    let content: String = sqlx::query_scalar("SELECT content FROM test_entity WHERE id = 1")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(content, "after");
}

#[tokio::test]
async fn test_rollback_discards_writes() {
    let pool = setup().await;
    let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();
    repo.save_and_flush(TestEntity::new(CONTENT)).await.unwrap();
    drop(repo);

    ctx.rollback().await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM test_entity")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_file_database_survives_reconnect() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = PersistenceConfig {
        url: format!("sqlite://{}?mode=rwc", dir.path().join("crud.db").display()),
        ..PersistenceConfig::default()
    };

    let pool = connect(&config).await.unwrap();
    create_schema(&pool).await;
    let ctx = SqliteContext::begin(&pool, config.flush_mode).await.unwrap();
    {
        let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();
        repo.save_all(["one", "two"].map(TestEntity::new))
            .await
            .unwrap();
    }
    ctx.commit().await.unwrap();
    pool.close().await;

    let pool = connect(&config).await.unwrap();
    let ctx = SqliteContext::begin(&pool, config.flush_mode).await.unwrap();
    let repo = CrudRepository::<TestEntity, _>::new(&ctx).unwrap();
    let contents: Vec<_> = repo
        .find_all()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.content)
        .collect();
    assert_eq!(contents, vec!["one", "two"]);
}
