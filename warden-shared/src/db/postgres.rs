/// PostgreSQL document store
///
/// Documents are JSONB rows in the shared `documents` table. Filters become
/// SQL over the `body` column:
///
/// - equality and existence use SQL/JSONPath in lax mode, so a path that
///   crosses an array matches any element
/// - range comparisons work on scalar paths and only compare values of the
///   same JSON type; strings compare by code point (`COLLATE "C"`)
///
/// Updates lock the matched row with `FOR UPDATE`, apply the update in Rust
/// and write the row back. Under READ COMMITTED a concurrent writer waiting
/// on the same row re-checks the filter after the first commits, so
/// conditional updates have at most one winner.
///
/// Unique indexes are enforced through `document_keys`; TTL indexes are
/// enforced by [`DocumentStore::purge_expired`], which a scheduled job calls.

use super::document::{self, Document};
use super::migrations::run_migrations;
use super::pool::{close_pool, create_pool, health_check, DatabaseConfig};
use super::query::{Filter, FindOptions, IndexSpec, SortDirection, Update};
use super::{DocumentStore, Session, StoreError, PRIMARY_KEY_INDEX};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{Postgres, QueryBuilder, Row};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Document store backed by PostgreSQL
#[derive(Debug)]
pub struct PostgresStore {
    pool: PgPool,
    closed: AtomicBool,
}

impl PostgresStore {
    /// Creates the pool and brings the schema up to date
    pub async fn connect(config: DatabaseConfig) -> Result<Self, StoreError> {
        let pool = create_pool(config).await?;
        run_migrations(&pool).await?;
        Ok(Self::from_pool(pool))
    }

    /// Wraps an existing pool whose schema is already migrated
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

struct PgSession {
    tx: sqlx::Transaction<'static, Postgres>,
}

fn path_segments(path: &str) -> Vec<String> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// SQL/JSONPath expression for a dotted path
fn json_path(path: &str) -> String {
    let mut out = String::from("$");
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        if segment.chars().all(|c| c.is_ascii_digit()) {
            out.push('[');
            out.push_str(segment);
            out.push(']');
        } else {
            out.push_str(".\"");
            for c in segment.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        }
    }
    out
}

fn push_eq(qb: &mut QueryBuilder<'_, Postgres>, path: &str, value: &Value) {
    let target = json_path(path);

    if value.is_null() {
        qb.push("(NOT jsonb_path_exists(body, ");
        qb.push_bind(target.clone());
        qb.push("::jsonpath) OR jsonb_path_exists(body, ");
        qb.push_bind(format!("{target} ? (@ == null)"));
        qb.push("::jsonpath))");
        return;
    }

    qb.push("jsonb_path_exists(body, ");
    qb.push_bind(format!("{target} ? (@ == $v)"));
    qb.push("::jsonpath, ");
    qb.push_bind(json!({ "v": value }));
    qb.push("::jsonb)");
}

fn push_range(qb: &mut QueryBuilder<'_, Postgres>, path: &str, op: &str, bound: &Value) {
    let segments = path_segments(path);

    match bound {
        Value::Number(n) => {
            qb.push("(jsonb_typeof(body #> ");
            qb.push_bind(segments.clone());
            qb.push("::text[]) = 'number' AND (body #> ");
            qb.push_bind(segments);
            qb.push(format!("::text[])::numeric {op} "));
            match n.as_i64() {
                Some(int) => qb.push_bind(int),
                None => qb.push_bind(n.as_f64().unwrap_or_default()),
            };
            qb.push("::numeric)");
        }
        Value::String(s) => {
            qb.push("(jsonb_typeof(body #> ");
            qb.push_bind(segments.clone());
            qb.push("::text[]) = 'string' AND (body #>> ");
            qb.push_bind(segments);
            qb.push(format!("::text[]) COLLATE \"C\" {op} "));
            qb.push_bind(s.clone());
            qb.push(")");
        }
        _ => {
            qb.push("FALSE");
        }
    }
}

fn push_joined(qb: &mut QueryBuilder<'_, Postgres>, filters: &[Filter], separator: &str, empty: &str) {
    if filters.is_empty() {
        qb.push(empty);
        return;
    }

    qb.push("(");
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            qb.push(separator);
        }
        push_filter(qb, filter);
    }
    qb.push(")");
}

/// Appends `filter` as a boolean SQL expression over `body`
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    match filter {
        Filter::All => {
            qb.push("TRUE");
        }
        Filter::Eq(path, value) => push_eq(qb, path, value),
        Filter::Ne(path, value) => {
            qb.push("NOT (");
            push_eq(qb, path, value);
            qb.push(")");
        }
        Filter::In(path, values) => {
            if values.is_empty() {
                qb.push("FALSE");
                return;
            }
            qb.push("(");
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                push_eq(qb, path, value);
            }
            qb.push(")");
        }
        Filter::Gt(path, value) => push_range(qb, path, ">", value),
        Filter::Gte(path, value) => push_range(qb, path, ">=", value),
        Filter::Lt(path, value) => push_range(qb, path, "<", value),
        Filter::Lte(path, value) => push_range(qb, path, "<=", value),
        Filter::Exists(path, expected) => {
            if !expected {
                qb.push("NOT ");
            }
            qb.push("jsonb_path_exists(body, ");
            qb.push_bind(json_path(path));
            qb.push("::jsonpath)");
        }
        Filter::And(filters) => push_joined(qb, filters, " AND ", "TRUE"),
        Filter::Or(filters) => push_joined(qb, filters, " OR ", "FALSE"),
    }
}

/// Ordering that matches the in-memory comparator: type rank first, then value
fn push_order_by(qb: &mut QueryBuilder<'_, Postgres>, sort: &[(String, SortDirection)]) {
    qb.push(" ORDER BY ");
    if sort.is_empty() {
        qb.push("id COLLATE \"C\" ASC");
        return;
    }

    for (i, (path, direction)) in sort.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        let dir = match direction {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        };

        if path == "_id" {
            qb.push(format!("id COLLATE \"C\" {dir}"));
            continue;
        }

        let segments = path_segments(path);
        qb.push("CASE jsonb_typeof(body #> ");
        qb.push_bind(segments.clone());
        qb.push(
            "::text[]) WHEN 'null' THEN 0 WHEN 'number' THEN 1 WHEN 'string' THEN 2 \
             WHEN 'object' THEN 3 WHEN 'array' THEN 4 WHEN 'boolean' THEN 5 ELSE -1 END ",
        );
        qb.push(dir);
        qb.push(", CASE WHEN jsonb_typeof(body #> ");
        qb.push_bind(segments.clone());
        qb.push("::text[]) = 'number' THEN (body #> ");
        qb.push_bind(segments.clone());
        qb.push(format!("::text[])::numeric END {dir}, (body #>> "));
        qb.push_bind(segments);
        qb.push(format!("::text[]) COLLATE \"C\" {dir}"));
    }
}

fn select<'a>(columns: &str, collection: &str, filter: &Filter) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {columns} FROM documents WHERE collection = "));
    qb.push_bind(collection.to_string());
    qb.push(" AND ");
    push_filter(&mut qb, filter);
    qb
}

async fn load_indexes(conn: &mut PgConnection, collection: &str) -> Result<Vec<IndexSpec>, StoreError> {
    let rows: Vec<(String, Value, bool, bool, Option<i64>)> = sqlx::query_as(
        "SELECT name, keys, is_unique, is_sparse, expire_after_ms
         FROM document_indexes WHERE collection = $1",
    )
    .bind(collection)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|(name, keys, unique, sparse, expire_after_ms)| {
            Ok(IndexSpec {
                name,
                keys: serde_json::from_value(keys)?,
                unique,
                sparse,
                expire_after: expire_after_ms.map(|ms| Duration::from_millis(ms.max(0) as u64)),
            })
        })
        .collect()
}

async fn insert_keys(
    conn: &mut PgConnection,
    collection: &str,
    index: &IndexSpec,
    id: &str,
    doc: &Document,
) -> Result<(), StoreError> {
    for key in document::index_keys(doc, index) {
        let inserted = sqlx::query(
            "INSERT INTO document_keys (collection, index_name, key, doc_id)
             VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
        )
        .bind(collection)
        .bind(&index.name)
        .bind(&key)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::DuplicateKey {
                index: index.name.clone(),
            });
        }
    }
    Ok(())
}

/// Rewrites the unique-index keys held by one document
async fn sync_keys(conn: &mut PgConnection, collection: &str, id: &str, doc: &Document) -> Result<(), StoreError> {
    let indexes = load_indexes(conn, collection).await?;

    sqlx::query("DELETE FROM document_keys WHERE collection = $1 AND doc_id = $2")
        .bind(collection)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    for index in indexes.iter().filter(|index| index.unique) {
        insert_keys(conn, collection, index, id, doc).await?;
    }
    Ok(())
}

async fn insert_document(conn: &mut PgConnection, collection: &str, doc: &Document) -> Result<(), StoreError> {
    let id = document::document_id(doc)
        .ok_or_else(|| StoreError::InvalidDocument("document has no _id".to_string()))?
        .to_string();

    let inserted = sqlx::query(
        "INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
    )
    .bind(collection)
    .bind(&id)
    .bind(doc)
    .execute(&mut *conn)
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(StoreError::DuplicateKey {
            index: PRIMARY_KEY_INDEX.to_string(),
        });
    }

    sync_keys(conn, collection, &id, doc).await
}

#[async_trait]
impl Session for PgSession {
    async fn find_one(&mut self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError> {
        let options = FindOptions {
            sort: Vec::new(),
            limit: Some(1),
        };
        Ok(self.find(collection, filter, &options).await?.into_iter().next())
    }

    async fn find(
        &mut self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, StoreError> {
        let mut qb = select("body", collection, filter);
        push_order_by(&mut qb, &options.sort);
        if let Some(limit) = options.limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit as i64);
        }

        let rows = qb.build().fetch_all(&mut *self.tx).await?;
        rows.iter()
            .map(|row| row.try_get::<Value, _>("body").map_err(StoreError::from))
            .collect()
    }

    async fn count(&mut self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut qb = select("COUNT(*) AS total", collection, filter);
        let row = qb.build().fetch_one(&mut *self.tx).await?;
        let total: i64 = row.try_get("total")?;
        Ok(total.max(0) as u64)
    }

    async fn insert_one(&mut self, collection: &str, document: Document) -> Result<(), StoreError> {
        insert_document(&mut self.tx, collection, &document).await
    }

    async fn find_one_and_update(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<Option<Document>, StoreError> {
        let mut qb = select("id, body", collection, filter);
        qb.push(" ORDER BY id LIMIT 1 FOR UPDATE");
        let row = qb.build().fetch_optional(&mut *self.tx).await?;

        let Some(row) = row else {
            if !upsert {
                return Ok(None);
            }
            let mut doc = document::seed_from_filter(filter)?;
            document::apply_update(&mut doc, update, true)?;
            insert_document(&mut self.tx, collection, &doc).await?;
            return Ok(Some(doc));
        };

        let id: String = row.try_get("id")?;
        let mut doc: Value = row.try_get("body")?;
        document::apply_update(&mut doc, update, false)?;
        if document::document_id(&doc) != Some(id.as_str()) {
            return Err(StoreError::InvalidDocument("_id is immutable".to_string()));
        }

        sqlx::query("UPDATE documents SET body = $3 WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(&id)
            .bind(&doc)
            .execute(&mut *self.tx)
            .await?;

        sync_keys(&mut self.tx, collection, &id, &doc).await?;
        Ok(Some(doc))
    }

    async fn delete_many(&mut self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut qb = QueryBuilder::new("DELETE FROM documents WHERE collection = ");
        qb.push_bind(collection.to_string());
        qb.push(" AND ");
        push_filter(&mut qb, filter);

        let result = qb.build().execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn Session>, StoreError> {
        self.ensure_open()?;
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSession { tx }))
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO document_indexes (collection, name, keys, is_unique, is_sparse, expire_after_ms)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (collection, name) DO UPDATE SET
                keys = EXCLUDED.keys,
                is_unique = EXCLUDED.is_unique,
                is_sparse = EXCLUDED.is_sparse,
                expire_after_ms = EXCLUDED.expire_after_ms",
        )
        .bind(collection)
        .bind(&index.name)
        .bind(serde_json::to_value(&index.keys)?)
        .bind(index.unique)
        .bind(index.sparse)
        .bind(index.expire_after.map(|ttl| ttl.as_millis() as i64))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM document_keys WHERE collection = $1 AND index_name = $2")
            .bind(collection)
            .bind(&index.name)
            .execute(&mut *tx)
            .await?;

        if index.unique {
            let rows: Vec<(String, Value)> =
                sqlx::query_as("SELECT id, body FROM documents WHERE collection = $1")
                    .bind(collection)
                    .fetch_all(&mut *tx)
                    .await?;

            for (id, body) in rows {
                insert_keys(&mut tx, collection, index, &id, &body).await?;
            }
        }

        tx.commit().await?;
        tracing::debug!(collection, index = %index.name, "Index created");
        Ok(())
    }

    async fn purge_expired(&self, collection: &str, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let mut conn = self.pool.acquire().await?;
        let indexes = load_indexes(&mut conn, collection).await?;

        let mut purged = 0;
        for index in &indexes {
            let (Some(ttl), Some(key)) = (index.expire_after, index.keys.first()) else {
                continue;
            };

            let result = sqlx::query(
                "DELETE FROM documents
                 WHERE collection = $1
                 AND jsonb_typeof(body #> $2::text[]) = 'number'
                 AND (body #> $2::text[])::numeric + $3 <= $4",
            )
            .bind(collection)
            .bind(path_segments(key))
            .bind(ttl.as_millis() as i64)
            .bind(now.timestamp_millis())
            .execute(&mut *conn)
            .await?;

            purged += result.rows_affected();
        }
        Ok(purged)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        health_check(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            close_pool(&self.pool).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(filter: &Filter) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("");
        push_filter(&mut qb, filter);
        qb.sql().to_string()
    }

    #[test]
    fn test_json_path() {
        assert_eq!(json_path("emails.address"), r#"$."emails"."address""#);
        assert_eq!(json_path("emails.1"), r#"$."emails"[1]"#);
        assert_eq!(json_path(r#"we"ird"#), r#"$."we\"ird""#);
    }

    #[test]
    fn test_equality_binds_values() {
        let sql = render(&Filter::eq("handle", "hunter"));
        assert_eq!(sql, "jsonb_path_exists(body, $1::jsonpath, $2::jsonb)");
    }

    #[test]
    fn test_compound_filter() {
        let filter = Filter::And(vec![
            Filter::lte("intended", 10),
            Filter::missing("started"),
            Filter::is_in("name", ["a", "b"]),
        ]);
        let sql = render(&filter);
        assert!(sql.starts_with("((jsonb_typeof(body #> $1::text[]) = 'number'"));
        assert!(sql.contains("NOT jsonb_path_exists(body, $4::jsonpath)"));
        assert!(sql.contains(" OR "));
    }

    #[test]
    fn test_empty_disjunction_is_false() {
        assert_eq!(render(&Filter::Or(vec![])), "FALSE");
        assert_eq!(render(&Filter::In("name".into(), vec![])), "FALSE");
        assert_eq!(render(&Filter::All), "TRUE");
    }

    #[test]
    fn test_order_by_id() {
        let mut qb = QueryBuilder::<Postgres>::new("");
        push_order_by(&mut qb, &[("_id".to_string(), SortDirection::Descending)]);
        assert_eq!(qb.sql(), " ORDER BY id COLLATE \"C\" DESC");
    }
}
