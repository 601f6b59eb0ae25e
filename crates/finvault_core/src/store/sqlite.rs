//! SQLite-backed record store.
//!
//! # Responsibility
//! - Implement `RecordRepository` for any `Entity` over its table.
//! - Stamp and guard lifecycle columns; business columns come from `Entity`.
//! - Route every write through `TransactionRunner`.
//!
//! # Invariants
//! - The table shape is verified once in `try_new`; SQL text is built from
//!   verified identifiers only.
//! - Every write uses one timestamp: the attempt's start instant.
//! - `updated_at` only moves forward and never drops below `created_at`.

use crate::db::{ensure_table_shape, DbError, DbResult};
use crate::store::entity::{Entity, Record, RecordId, LIFECYCLE_COLUMNS};
use crate::store::error::{StoreError, StoreResult};
use crate::store::options::{Clock, SystemClock, TransactionOptions};
use crate::store::repository::{ListQuery, OrderBy, RecordRepository, SortDirection};
use crate::store::transaction::TransactionRunner;
use log::debug;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

/// Upper bound on ids bound into one `IN (...)` list.
const MAX_IDS_PER_STATEMENT: usize = 500;

/// Transactional record store for one entity type.
///
/// While a write runs the store owns the connection's progress handler and
/// busy timeout. A progress handler installed by the caller is removed by the
/// first write; the busy timeout is restored after each attempt.
pub struct RecordStore<'conn, T: Entity> {
    conn: &'conn Connection,
    runner: TransactionRunner<'conn>,
    sql: EntitySql,
    _entity: PhantomData<fn() -> T>,
}

impl<'conn, T: Entity> RecordStore<'conn, T> {
    /// Creates a store with default transaction options.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        Self::try_with_options(conn, TransactionOptions::default())
    }

    /// Creates a store after verifying `T::TABLE` has every required column.
    ///
    /// # Errors
    /// - `Storage` when the table or a column is missing, or when a business
    ///   column collides with a lifecycle column.
    pub fn try_with_options(
        conn: &'conn Connection,
        options: TransactionOptions,
    ) -> StoreResult<Self> {
        if let Some(column) = T::COLUMNS
            .iter()
            .copied()
            .find(|column| LIFECYCLE_COLUMNS.contains(column))
        {
            return Err(DbError::InvalidIdentifier(column).into());
        }

        let mut required: Vec<&'static str> = LIFECYCLE_COLUMNS.to_vec();
        required.extend_from_slice(T::COLUMNS);
        ensure_table_shape(conn, T::TABLE, &required)?;

        Ok(Self {
            conn,
            runner: TransactionRunner::new(conn, options, Arc::new(SystemClock)),
            sql: EntitySql::build(T::TABLE, T::COLUMNS),
            _entity: PhantomData,
        })
    }

    /// Replaces the timestamp source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.runner.set_clock(clock);
        self
    }

    pub fn options(&self) -> &TransactionOptions {
        self.runner.options()
    }

    fn load(
        &self,
        conn: &Connection,
        id: RecordId,
        include_deleted: bool,
    ) -> StoreResult<Option<Record<T>>> {
        let mut stmt = conn.prepare(&format!(
            "{}
             WHERE id = ?1
               AND (?2 = 1 OR deleted_at IS NULL);",
            self.sql.select
        ))?;
        let mut rows = stmt.query(params![id.to_string(), include_deleted])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_record::<T>(row)?));
        }
        Ok(None)
    }

    fn load_live_in(&self, conn: &Connection, ids: &[RecordId]) -> StoreResult<Vec<Record<T>>> {
        let mut records = Vec::new();
        for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
            let mut stmt = conn.prepare(&format!(
                "{}
                 WHERE deleted_at IS NULL
                   AND id IN ({})
                 ORDER BY created_at ASC, id ASC;",
                self.sql.select,
                numbered_placeholders(1, chunk.len())
            ))?;
            let mut rows = stmt.query(params_from_iter(chunk.iter().map(|id| id.to_string())))?;
            while let Some(row) = rows.next()? {
                records.push(parse_record::<T>(row)?);
            }
        }
        Ok(records)
    }

    fn insert(&self, conn: &Connection, id: RecordId, data: &T, now: i64) -> StoreResult<()> {
        let mut values = Vec::with_capacity(T::COLUMNS.len() + 3);
        values.push(Value::Text(id.to_string()));
        values.extend(data.to_values());
        values.push(Value::Integer(now));
        values.push(Value::Integer(now));
        conn.execute(&self.sql.insert, params_from_iter(values))?;
        Ok(())
    }

    fn write_data(&self, conn: &Connection, record: &Record<T>) -> StoreResult<()> {
        let mut values = record.data.to_values();
        values.push(Value::Integer(record.updated_at));
        values.push(Value::Text(record.id.to_string()));
        conn.execute(&self.sql.update_data, params_from_iter(values))?;
        Ok(())
    }
}

impl<T: Entity> RecordRepository<T> for RecordStore<'_, T> {
    fn get(&self, id: RecordId, include_deleted: bool) -> StoreResult<Option<Record<T>>> {
        self.load(self.conn, id, include_deleted)
    }

    fn list(&self, query: &ListQuery) -> StoreResult<Vec<Record<T>>> {
        let mut sql = format!("{} WHERE 1 = 1", self.sql.select);
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }

        let order_column = match query.order_by {
            OrderBy::CreatedAt => "created_at",
            OrderBy::UpdatedAt => "updated_at",
        };
        let direction = match query.direction {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        };
        sql.push_str(&format!(" ORDER BY {order_column} {direction}, id ASC"));

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record::<T>(row)?);
        }
        Ok(records)
    }

    fn count(&self, include_deleted: bool) -> StoreResult<u64> {
        let sql = if include_deleted {
            format!("SELECT COUNT(*) FROM {};", T::TABLE)
        } else {
            format!("SELECT COUNT(*) FROM {} WHERE deleted_at IS NULL;", T::TABLE)
        };
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn create(&self, data: T) -> StoreResult<Record<T>> {
        data.validate()?;
        let id = Uuid::new_v4();

        let now = self.runner.run(T::TABLE, "create", |conn, now| {
            self.insert(conn, id, &data, now)?;
            Ok(now)
        })?;

        Ok(Record {
            id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            data,
        })
    }

    fn create_many(&self, items: Vec<T>) -> StoreResult<Vec<Record<T>>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        for item in &items {
            item.validate()?;
        }
        let ids: Vec<RecordId> = items.iter().map(|_| Uuid::new_v4()).collect();

        let now = self.runner.run(T::TABLE, "create_many", |conn, now| {
            for (id, item) in ids.iter().zip(&items) {
                self.insert(conn, *id, item, now)?;
            }
            Ok(now)
        })?;

        Ok(ids
            .into_iter()
            .zip(items)
            .map(|(id, data)| Record {
                id,
                created_at: now,
                updated_at: now,
                deleted_at: None,
                data,
            })
            .collect())
    }

    fn update(&self, id: RecordId, patch: &T::Patch) -> StoreResult<Record<T>> {
        self.runner.run(T::TABLE, "update", |conn, now| {
            let mut record = self
                .load(conn, id, false)?
                .ok_or(StoreError::NotFound(id))?;
            record.data.apply_patch(patch);
            record.data.validate()?;
            record.updated_at = now.max(record.updated_at);
            self.write_data(conn, &record)?;
            Ok(record)
        })
    }

    fn update_many(&self, ids: &[RecordId], patch: &T::Patch) -> StoreResult<Vec<Record<T>>> {
        let ids = unique_ids(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.runner.run(T::TABLE, "update_many", |conn, now| {
            let mut records = self.load_live_in(conn, &ids)?;
            for record in &mut records {
                record.data.apply_patch(patch);
                record.data.validate()?;
                record.updated_at = now.max(record.updated_at);
                self.write_data(conn, record)?;
            }
            Ok(records)
        })?;

        debug!(
            "event=store_bulk module=store status=ok table={} op=update_many requested={} affected={}",
            T::TABLE,
            ids.len(),
            records.len()
        );
        Ok(records)
    }

    fn soft_delete(&self, id: RecordId) -> StoreResult<()> {
        let sql = format!(
            "UPDATE {}
             SET deleted_at = ?2,
                 updated_at = MAX(updated_at, ?2)
             WHERE id = ?1
               AND deleted_at IS NULL;",
            T::TABLE
        );
        self.runner.run(T::TABLE, "soft_delete", |conn, now| {
            let changed = conn.execute(&sql, params![id.to_string(), now])?;
            if changed == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
    }

    fn delete_many(&self, ids: &[RecordId]) -> StoreResult<()> {
        let ids = unique_ids(ids);
        if ids.is_empty() {
            return Ok(());
        }

        let affected = self.runner.run(T::TABLE, "delete_many", |conn, now| {
            let mut affected = 0;
            for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
                let sql = format!(
                    "UPDATE {}
                     SET deleted_at = ?1,
                         updated_at = MAX(updated_at, ?1)
                     WHERE deleted_at IS NULL
                       AND id IN ({});",
                    T::TABLE,
                    numbered_placeholders(2, chunk.len())
                );
                let mut values = Vec::with_capacity(chunk.len() + 1);
                values.push(Value::Integer(now));
                values.extend(chunk.iter().map(|id| Value::Text(id.to_string())));
                affected += conn.execute(&sql, params_from_iter(values))?;
            }
            Ok(affected)
        })?;

        debug!(
            "event=store_bulk module=store status=ok table={} op=delete_many requested={} affected={}",
            T::TABLE,
            ids.len(),
            affected
        );
        Ok(())
    }

    fn restore(&self, id: RecordId) -> StoreResult<()> {
        let restore_sql = format!(
            "UPDATE {}
             SET deleted_at = NULL,
                 updated_at = MAX(updated_at, ?2)
             WHERE id = ?1
               AND deleted_at IS NOT NULL;",
            T::TABLE
        );
        let exists_sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1);", T::TABLE);

        self.runner.run(T::TABLE, "restore", |conn, now| {
            let changed = conn.execute(&restore_sql, params![id.to_string(), now])?;
            if changed > 0 {
                return Ok(());
            }
            let exists: i64 = conn.query_row(&exists_sql, [id.to_string()], |row| row.get(0))?;
            if exists == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
    }
}

/// SQL text derived from an entity's table and columns.
struct EntitySql {
    select: String,
    insert: String,
    update_data: String,
}

impl EntitySql {
    fn build(table: &str, columns: &[&str]) -> Self {
        let mut select_columns: Vec<&str> = LIFECYCLE_COLUMNS.to_vec();
        select_columns.extend_from_slice(columns);
        let select = format!("SELECT {} FROM {table}", select_columns.join(", "));

        let mut insert_columns: Vec<&str> = vec!["id"];
        insert_columns.extend_from_slice(columns);
        insert_columns.extend(["created_at", "updated_at", "deleted_at"]);
        let insert = format!(
            "INSERT INTO {table} ({}) VALUES ({}, NULL);",
            insert_columns.join(", "),
            numbered_placeholders(1, columns.len() + 3)
        );

        let mut assignments: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(index, column)| format!("{column} = ?{}", index + 1))
            .collect();
        assignments.push(format!("updated_at = ?{}", columns.len() + 1));
        let update_data = format!(
            "UPDATE {table} SET {} WHERE id = ?{};",
            assignments.join(", "),
            columns.len() + 2
        );

        Self {
            select,
            insert,
            update_data,
        }
    }
}

fn parse_record<T: Entity>(row: &Row<'_>) -> DbResult<Record<T>> {
    let id_text: String = row.get("id")?;
    let id = Uuid::parse_str(&id_text).map_err(|_| {
        DbError::InvalidData(format!("invalid uuid value `{id_text}` in {}.id", T::TABLE))
    })?;

    let created_at: i64 = row.get("created_at")?;
    let updated_at: i64 = row.get("updated_at")?;
    if updated_at < created_at {
        return Err(DbError::InvalidData(format!(
            "{}.updated_at {updated_at} precedes created_at {created_at} for {id}",
            T::TABLE
        )));
    }

    Ok(Record {
        id,
        created_at,
        updated_at,
        deleted_at: row.get("deleted_at")?,
        data: T::from_row(row)?,
    })
}

/// `?start, ?start+1, ...` with `count` entries.
fn numbered_placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn unique_ids(ids: &[RecordId]) -> Vec<RecordId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
