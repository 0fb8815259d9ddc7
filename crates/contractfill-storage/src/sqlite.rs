//! SQLite storage backend for ContractFill.
//!
//! Every contract table lives in one document table, `contract_rows`, keyed by
//! `(table_name, row_key)` with the row serialized as JSON. Filters compile to
//! `json_extract` predicates, and views are real SQLite views over
//! `contract_rows`. Two catalog tables record table definitions and schema
//! objects. Uses `sqlx` with WAL mode for file-backed databases.
//!
//! # Usage
//! ```rust,no_run
//! use contractfill_storage::sqlite::SqliteDatabase;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let db = SqliteDatabase::open("./fill.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let db = SqliteDatabase::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row as _, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use contractfill_core::db::{Database, DatabaseTransaction};
use contractfill_core::error::FillerError;
use contractfill_core::row::{
    Condition, Filter, NaturalKey, ObjectKind, Order, Query, Row, SchemaObject, TableDef,
};

/// Rows per multi-row `INSERT`, well below SQLite's bind-parameter limit.
const INSERT_BATCH: usize = 500;

fn storage(e: sqlx::Error) -> FillerError {
    FillerError::Storage(e.to_string())
}

/// SQLite-backed [`Database`].
#[derive(Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./fill.db"`) or a full
    /// SQLite URL (`"sqlite:./fill.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, FillerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(storage)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(storage)?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Uses a single, never-recycled connection (each SQLite in-memory
    /// connection is its own database). All data is lost when the pool is
    /// dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, FillerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage)?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), FillerError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS contract_tables (
                name        TEXT NOT NULL PRIMARY KEY,
                natural_key TEXT NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_objects (
                kind   TEXT NOT NULL,
                name   TEXT NOT NULL,
                script TEXT NOT NULL,
                PRIMARY KEY (kind, name)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS contract_rows (
                table_name TEXT NOT NULL,
                row_key    TEXT NOT NULL,
                row_json   TEXT NOT NULL,
                PRIMARY KEY (table_name, row_key)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    /// Run a read-only SQL statement (e.g. against a view) and return every
    /// row as a JSON object of its text/integer/real columns.
    #[cfg(test)]
    async fn fetch_json(&self, sql: &str) -> Result<Vec<Value>, FillerError> {
        use sqlx::{Column, TypeInfo, ValueRef};

        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut object = serde_json::Map::new();
            for (i, column) in row.columns().iter().enumerate() {
                let raw = row.try_get_raw(i).map_err(storage)?;
                let value = if raw.is_null() {
                    Value::Null
                } else {
                    match raw.type_info().name() {
                        "INTEGER" => Value::from(row.try_get::<i64, _>(i).map_err(storage)?),
                        "REAL" => Value::from(row.try_get::<f64, _>(i).map_err(storage)?),
                        _ => Value::from(row.try_get::<String, _>(i).map_err(storage)?),
                    }
                };
                object.insert(column.name().to_string(), value);
            }
            out.push(Value::Object(object));
        }
        Ok(out)
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn begin(&self) -> Result<Box<dyn DatabaseTransaction>, FillerError> {
        let tx = self.pool.begin().await.map_err(storage)?;
        Ok(Box::new(SqliteTransaction {
            tx,
            known_tables: HashSet::new(),
        }))
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

// ─── SQL building ─────────────────────────────────────────────────────────────

/// Table and column names are inlined into SQL, so only plain identifiers
/// are accepted.
fn ident(name: &str) -> Result<&str, FillerError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(FillerError::Storage(format!("invalid identifier '{name}'")))
    }
}

fn column_expr(column: &str) -> Result<String, FillerError> {
    Ok(format!("json_extract(row_json, '$.\"{}\"')", ident(column)?))
}

fn push_value(qb: &mut QueryBuilder<'_, Sqlite>, value: &Value) {
    match value {
        Value::Null => {
            qb.push("NULL");
        }
        Value::Bool(b) => {
            qb.push_bind(i64::from(*b));
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                qb.push_bind(i);
            } else {
                qb.push_bind(n.as_f64().unwrap_or(f64::NAN));
            }
        }
        Value::String(s) => {
            qb.push_bind(s.clone());
        }
        other => {
            qb.push_bind(other.to_string());
        }
    }
}

/// `json_type` values a bound comparison value is comparable with.
fn json_types(value: &Value) -> &'static str {
    match value {
        Value::Number(_) => "('integer', 'real')",
        Value::String(_) => "('text')",
        Value::Bool(_) => "('true', 'false')",
        Value::Array(_) => "('array')",
        Value::Object(_) => "('object')",
        Value::Null => "('null')",
    }
}

fn push_equals(qb: &mut QueryBuilder<'_, Sqlite>, expr: &str, path: &str, value: &Value) {
    if value.is_null() {
        qb.push(format!("{expr} IS NULL"));
        return;
    }
    qb.push(format!("(json_type(row_json, '{path}') IN {} AND ", json_types(value)));
    if value.is_array() || value.is_object() {
        qb.push(format!("json({expr}) = json("));
        push_value(qb, value);
        qb.push("))");
        return;
    }
    qb.push(format!("{expr} = "));
    push_value(qb, value);
    qb.push(")");
}

fn push_condition(
    qb: &mut QueryBuilder<'_, Sqlite>,
    condition: &Condition,
) -> Result<(), FillerError> {
    let column = match condition {
        Condition::Eq(c, _)
        | Condition::In(c, _)
        | Condition::IsNull(c)
        | Condition::NotNull(c)
        | Condition::Lte(c, _)
        | Condition::Gte(c, _) => c,
    };
    let expr = column_expr(column)?;
    let path = format!("$.\"{}\"", ident(column)?);
    match condition {
        Condition::Eq(_, value) => push_equals(qb, &expr, &path, value),
        Condition::In(_, values) => {
            if values.is_empty() {
                qb.push("0");
            } else {
                qb.push("(");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        qb.push(" OR ");
                    }
                    push_equals(qb, &expr, &path, value);
                }
                qb.push(")");
            }
        }
        Condition::IsNull(_) => {
            qb.push(format!("{expr} IS NULL"));
        }
        Condition::NotNull(_) => {
            qb.push(format!("{expr} IS NOT NULL"));
        }
        Condition::Lte(_, bound) | Condition::Gte(_, bound) => {
            let op = if matches!(condition, Condition::Lte(..)) { "<=" } else { ">=" };
            qb.push(format!(
                "(json_type(row_json, '{path}') IN {} AND {expr} {op} ",
                json_types(bound)
            ));
            push_value(qb, bound);
            qb.push(")");
        }
    }
    Ok(())
}

fn push_where(
    qb: &mut QueryBuilder<'_, Sqlite>,
    table: &str,
    filter: &Filter,
) -> Result<(), FillerError> {
    qb.push(format!(" WHERE table_name = '{}'", ident(table)?));
    for condition in &filter.conditions {
        qb.push(" AND ");
        push_condition(qb, condition)?;
    }
    Ok(())
}

fn decode_row(row_key: &str, row_json: &str) -> Result<(NaturalKey, Row), FillerError> {
    Ok((NaturalKey::decode(row_key)?, serde_json::from_str(row_json)?))
}

// ─── SqliteTransaction ────────────────────────────────────────────────────────

pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
    known_tables: HashSet<String>,
}

impl SqliteTransaction {
    async fn require_table(&mut self, table: &str) -> Result<(), FillerError> {
        if self.known_tables.contains(table) {
            return Ok(());
        }
        if self.table_exists(table).await? {
            self.known_tables.insert(table.to_string());
            Ok(())
        } else {
            Err(FillerError::Storage(format!("unknown table '{table}'")))
        }
    }
}

#[async_trait]
impl DatabaseTransaction for SqliteTransaction {
    async fn table_exists(&mut self, table: &str) -> Result<bool, FillerError> {
        let row = sqlx::query("SELECT 1 FROM contract_tables WHERE name = ?")
            .bind(table)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage)?;
        Ok(row.is_some())
    }

    async fn create_table(&mut self, def: &TableDef) -> Result<bool, FillerError> {
        let name = ident(&def.name)?;
        let natural_key = serde_json::to_string(&def.natural_key)?;
        let created = sqlx::query(
            "INSERT OR IGNORE INTO contract_tables (name, natural_key) VALUES (?, ?)",
        )
        .bind(name)
        .bind(&natural_key)
        .execute(&mut *self.tx)
        .await
        .map_err(storage)?
        .rows_affected()
            == 1;

        if created {
            // Partial expression index over the natural key, per table.
            let columns = def
                .natural_key
                .iter()
                .map(|c| column_expr(c))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ");
            if !columns.is_empty() {
                sqlx::query(&format!(
                    "CREATE INDEX IF NOT EXISTS \"ix_rows_{name}\" ON contract_rows ({columns}) \
                     WHERE table_name = '{name}'"
                ))
                .execute(&mut *self.tx)
                .await
                .map_err(storage)?;
            }
            debug!(table = name, "table created");
        }
        self.known_tables.insert(name.to_string());
        Ok(created)
    }

    async fn object_exists(&mut self, kind: ObjectKind, name: &str) -> Result<bool, FillerError> {
        let row = sqlx::query("SELECT 1 FROM schema_objects WHERE kind = ? AND name = ?")
            .bind(kind.to_string())
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage)?;
        Ok(row.is_some())
    }

    async fn create_object(&mut self, object: &SchemaObject) -> Result<(), FillerError> {
        let name = ident(&object.name)?;
        if object.kind == ObjectKind::View {
            sqlx::query(&format!("DROP VIEW IF EXISTS \"{name}\""))
                .execute(&mut *self.tx)
                .await
                .map_err(storage)?;
            sqlx::query(&format!("CREATE VIEW \"{name}\" AS {}", object.script))
                .execute(&mut *self.tx)
                .await
                .map_err(storage)?;
        }
        // SQLite has no stored procedures; they are kept in the catalog only.
        sqlx::query(
            "INSERT INTO schema_objects (kind, name, script) VALUES (?, ?, ?)
             ON CONFLICT (kind, name) DO UPDATE SET script = excluded.script",
        )
        .bind(object.kind.to_string())
        .bind(name)
        .bind(&object.script)
        .execute(&mut *self.tx)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn drop_object(&mut self, kind: ObjectKind, name: &str) -> Result<bool, FillerError> {
        let name = ident(name)?;
        if kind == ObjectKind::View {
            sqlx::query(&format!("DROP VIEW IF EXISTS \"{name}\""))
                .execute(&mut *self.tx)
                .await
                .map_err(storage)?;
        }
        let removed = sqlx::query("DELETE FROM schema_objects WHERE kind = ? AND name = ?")
            .bind(kind.to_string())
            .bind(name)
            .execute(&mut *self.tx)
            .await
            .map_err(storage)?
            .rows_affected();
        Ok(removed > 0)
    }

    async fn get(&mut self, table: &str, key: &NaturalKey) -> Result<Option<Row>, FillerError> {
        self.require_table(table).await?;
        let row = sqlx::query(
            "SELECT row_json FROM contract_rows WHERE table_name = ? AND row_key = ?",
        )
        .bind(table)
        .bind(key.encode())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage)?;
        match row {
            Some(r) => {
                let json: String = r.get("row_json");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn put(
        &mut self,
        table: &str,
        key: &NaturalKey,
        row: Row,
    ) -> Result<Option<Row>, FillerError> {
        let previous = self.get(table, key).await?;
        sqlx::query(
            "INSERT INTO contract_rows (table_name, row_key, row_json) VALUES (?, ?, ?)
             ON CONFLICT (table_name, row_key) DO UPDATE SET row_json = excluded.row_json",
        )
        .bind(table)
        .bind(key.encode())
        .bind(serde_json::to_string(&row)?)
        .execute(&mut *self.tx)
        .await
        .map_err(storage)?;
        Ok(previous)
    }

    async fn insert_new(
        &mut self,
        table: &str,
        rows: Vec<(NaturalKey, Row)>,
    ) -> Result<(), FillerError> {
        self.require_table(table).await?;
        if rows.is_empty() {
            return Ok(());
        }
        let encoded = rows
            .iter()
            .map(|(key, row)| Ok((key.encode(), serde_json::to_string(row)?)))
            .collect::<Result<Vec<_>, FillerError>>()?;

        for batch in encoded.chunks(INSERT_BATCH) {
            let mut qb: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new("SELECT row_key FROM contract_rows WHERE table_name = ");
            qb.push_bind(table.to_string());
            qb.push(" AND row_key IN (");
            let mut keys = qb.separated(", ");
            for (key, _) in batch {
                keys.push_bind(key.clone());
            }
            keys.push_unseparated(") LIMIT 1");
            if let Some(existing) = qb
                .build()
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(storage)?
            {
                return Err(FillerError::KeyConflict {
                    table: table.to_string(),
                    key: existing.get("row_key"),
                });
            }
        }

        for batch in encoded.chunks(INSERT_BATCH) {
            let mut qb: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new("INSERT INTO contract_rows (table_name, row_key, row_json) ");
            qb.push_values(batch, |mut b, (key, json)| {
                b.push_bind(table.to_string())
                    .push_bind(key.clone())
                    .push_bind(json.clone());
            });
            qb.build()
                .execute(&mut *self.tx)
                .await
                .map_err(storage)?;
        }
        Ok(())
    }

    async fn remove(&mut self, table: &str, key: &NaturalKey) -> Result<Option<Row>, FillerError> {
        let previous = self.get(table, key).await?;
        if previous.is_some() {
            sqlx::query("DELETE FROM contract_rows WHERE table_name = ? AND row_key = ?")
                .bind(table)
                .bind(key.encode())
                .execute(&mut *self.tx)
                .await
                .map_err(storage)?;
        }
        Ok(previous)
    }

    async fn select(
        &mut self,
        table: &str,
        query: &Query,
    ) -> Result<Vec<(NaturalKey, Row)>, FillerError> {
        self.require_table(table).await?;
        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT row_key, row_json FROM contract_rows");
        push_where(&mut qb, table, &query.filter)?;
        qb.push(" ORDER BY ");
        for (column, order) in &query.order_by {
            let direction = match order {
                Order::Asc => "ASC",
                Order::Desc => "DESC",
            };
            qb.push(format!("{} {direction}, ", column_expr(column)?));
        }
        qb.push("row_key ASC");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ");
            qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = qb
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(storage)?;
        rows.iter()
            .map(|r| decode_row(r.get("row_key"), r.get("row_json")))
            .collect()
    }

    async fn count(&mut self, table: &str, filter: &Filter) -> Result<u64, FillerError> {
        self.require_table(table).await?;
        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) AS cnt FROM contract_rows");
        push_where(&mut qb, table, filter)?;
        let row = qb
            .build()
            .fetch_one(&mut *self.tx)
            .await
            .map_err(storage)?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), FillerError> {
        self.tx.commit().await.map_err(storage)
    }

    async fn rollback(self: Box<Self>) -> Result<(), FillerError> {
        self.tx.rollback().await.map_err(storage)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use contractfill_core::row::row_from;
    use serde_json::json;

    const KEY: &[&str] = &["contract", "asset_id"];

    fn asset(id: &str, owner: Option<&str>, block: u64) -> (NaturalKey, Row) {
        let row = row_from(json!({
            "contract": "atomicassets",
            "asset_id": id,
            "owner": owner,
            "minted_at_block": block,
            "data": { "name": format!("asset {id}") },
        }))
        .unwrap();
        (NaturalKey::from_row("assets", &row, KEY).unwrap(), row)
    }

    async fn db_with_assets() -> SqliteDatabase {
        let db = SqliteDatabase::in_memory().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        assert!(tx.create_table(&TableDef::new("assets", KEY)).await.unwrap());
        assert!(!tx.create_table(&TableDef::new("assets", KEY)).await.unwrap());
        tx.insert_new(
            "assets",
            vec![
                asset("1", Some("alice"), 100),
                asset("2", None, 101),
                asset("10", Some("bob"), 102),
            ],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        db
    }

    #[tokio::test]
    async fn rows_roundtrip() {
        let db = db_with_assets().await;
        let mut tx = db.begin().await.unwrap();
        let (key, _) = asset("1", None, 0);
        let row = tx.get("assets", &key).await.unwrap().unwrap();
        assert_eq!(row["owner"], "alice");
        assert_eq!(row["data"]["name"], "asset 1");

        let (_, replacement) = asset("1", Some("carol"), 100);
        let previous = tx.put("assets", &key, replacement).await.unwrap().unwrap();
        assert_eq!(previous["owner"], "alice");
        assert!(tx.remove("assets", &key).await.unwrap().is_some());
        assert!(tx.remove("assets", &key).await.unwrap().is_none());
        tx.rollback().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        assert!(tx.get("assets", &key).await.unwrap().is_some());
        assert!(tx.get("missing", &key).await.is_err());
    }

    #[tokio::test]
    async fn insert_new_conflict() {
        let db = db_with_assets().await;
        let mut tx = db.begin().await.unwrap();
        let err = tx
            .insert_new("assets", vec![asset("3", None, 1), asset("2", None, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, FillerError::KeyConflict { .. }));
        assert_eq!(tx.count("assets", &Filter::new()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn filters_match_memory_semantics() {
        let db = db_with_assets().await;
        let mut tx = db.begin().await.unwrap();

        let burned = Filter::new().eq("contract", "atomicassets").is_null("owner");
        assert_eq!(tx.count("assets", &burned).await.unwrap(), 1);

        let owned = Filter::new().any("owner", ["alice", "bob"]);
        assert_eq!(tx.count("assets", &owned).await.unwrap(), 2);

        let early = Filter::new().lte("minted_at_block", 101);
        assert_eq!(tx.count("assets", &early).await.unwrap(), 2);

        // A string bound never matches a numeric column.
        let mixed = Filter::new().gte("minted_at_block", "0");
        assert_eq!(tx.count("assets", &mixed).await.unwrap(), 0);

        let data = Filter::new().eq("data", json!({ "name": "asset 2" }));
        assert_eq!(tx.count("assets", &data).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn select_orders_and_limits() {
        let db = db_with_assets().await;
        let mut tx = db.begin().await.unwrap();
        let query = Query::new(Filter::new())
            .order_by("minted_at_block", Order::Desc)
            .limit(2);
        let rows = tx.select("assets", &query).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|(_, r)| r["asset_id"].clone()).collect();
        assert_eq!(ids, vec![json!("10"), json!("2")]);
    }

    #[tokio::test]
    async fn views_run_as_sql() {
        let db = db_with_assets().await;
        let mut tx = db.begin().await.unwrap();
        let view = SchemaObject::view(
            "owned_assets",
            "SELECT json_extract(row_json, '$.asset_id') AS asset_id \
             FROM contract_rows WHERE table_name = 'assets' \
             AND json_extract(row_json, '$.owner') IS NOT NULL",
        );
        tx.create_object(&view).await.unwrap();
        tx.create_object(&SchemaObject::procedure("noop", "-- catalog only"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let rows = db.fetch_json("SELECT asset_id FROM owned_assets ORDER BY asset_id").await.unwrap();
        assert_eq!(rows, vec![json!({ "asset_id": "1" }), json!({ "asset_id": "10" })]);

        let mut tx = db.begin().await.unwrap();
        assert!(tx.object_exists(ObjectKind::Procedure, "noop").await.unwrap());
        assert!(tx.drop_object(ObjectKind::View, "owned_assets").await.unwrap());
        assert!(!tx.drop_object(ObjectKind::View, "owned_assets").await.unwrap());
        tx.commit().await.unwrap();
        assert!(db.fetch_json("SELECT * FROM owned_assets").await.is_err());
    }

    #[test]
    fn identifiers_are_validated() {
        assert!(ident("atomicassets_assets").is_ok());
        assert!(ident("x'; DROP TABLE y").is_err());
        assert!(ident("").is_err());
    }
}
