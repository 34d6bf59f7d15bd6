//! # Convoy Store
//!
//! Durable state on embedded SQLite: operations, compose backups,
//! rollback policies, the crash-surviving update queue, and the
//! config key/value + snapshot tables. The rest of the system only
//! sees [Store]; the schema is private to this crate.

use std::{path::Path, str::FromStr, sync::Mutex};

use convoy_client::entities::{
  convoy_timestamp,
  operation::{
    ComposeBackup, OperationStatus, OperationType, PolicyScope,
    QueuedUpdate, RollbackPolicy, UpdateOperation,
  },
};
use rusqlite::{Connection, OpenFlags, Row, params};
use serde::{Serialize, de::DeserializeOwned};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),
  #[error("{0} not found: {1}")]
  NotFound(&'static str, String),
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Filters for the operations listing.
#[derive(Debug, Default, Clone)]
pub struct OperationFilter {
  pub container: Option<String>,
  pub status: Option<OperationStatus>,
  pub operation_type: Option<OperationType>,
  pub limit: Option<usize>,
}

pub struct Store {
  conn: Mutex<Connection>,
}

impl Store {
  pub fn open(path: &Path) -> Result<Store> {
    let conn = Connection::open_with_flags(
      path,
      OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE,
    )?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Self::from_connection(conn)
  }

  pub fn in_memory() -> Result<Store> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Store> {
    init_schema(&conn)?;
    Ok(Store {
      conn: Mutex::new(conn),
    })
  }

  fn with_conn<T>(
    &self,
    f: impl FnOnce(&mut Connection) -> Result<T>,
  ) -> Result<T> {
    let mut conn =
      self.conn.lock().expect("store mutex poisoned");
    f(&mut conn)
  }

  // ==================
  //     OPERATIONS
  // ==================

  pub fn create_operation(
    &self,
    operation: &UpdateOperation,
  ) -> Result<()> {
    self.with_conn(|conn| {
      upsert_operation(conn, operation)?;
      Ok(())
    })
  }

  /// Updates an existing operation record in place.
  pub fn update_operation(
    &self,
    operation: &UpdateOperation,
  ) -> Result<()> {
    self.create_operation(operation)
  }

  /// Writes the backup row and the operation state it belongs to in
  /// one transaction, so a crash can never leave a backup that no
  /// operation explains.
  pub fn record_backup(
    &self,
    operation: &UpdateOperation,
    backup: &ComposeBackup,
  ) -> Result<i64> {
    self.with_conn(|conn| {
      let tx = conn.transaction()?;
      upsert_operation(&tx, operation)?;
      tx.execute(
        "INSERT INTO compose_backups
          (operation_id, container_name, stack, compose_file_path,
           backup_file_path, env_backup_path, backup_timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
          backup.operation_id,
          backup.container_name,
          backup.stack,
          backup.compose_file_path,
          backup.backup_file_path,
          backup.env_backup_path,
          backup.backup_timestamp,
        ],
      )?;
      let id = tx.last_insert_rowid();
      tx.commit()?;
      Ok(id)
    })
  }

  pub fn get_operation(&self, id: &str) -> Result<UpdateOperation> {
    self.with_conn(|conn| {
      conn
        .query_row(
          &format!(
            "SELECT {OPERATION_COLUMNS} FROM operations WHERE id = ?1"
          ),
          params![id],
          row_to_operation,
        )
        .map_err(|e| match e {
          rusqlite::Error::QueryReturnedNoRows => {
            StoreError::NotFound("operation", id.to_string())
          }
          e => e.into(),
        })
    })
  }

  pub fn list_operations(
    &self,
    filter: &OperationFilter,
  ) -> Result<Vec<UpdateOperation>> {
    self.with_conn(|conn| {
      let mut sql = format!(
        "SELECT {OPERATION_COLUMNS} FROM operations"
      );
      let mut clauses = Vec::new();
      let mut args = Vec::new();
      if let Some(container) = &filter.container {
        clauses.push("container_name = ?");
        args.push(container.clone());
      }
      if let Some(status) = &filter.status {
        clauses.push("status = ?");
        args.push(status.to_string());
      }
      if let Some(operation_type) = &filter.operation_type {
        clauses.push("type = ?");
        args.push(operation_type.to_string());
      }
      if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
      }
      sql.push_str(" ORDER BY id DESC");
      if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
      }
      let mut stmt = conn.prepare(&sql)?;
      let rows = stmt.query_map(
        rusqlite::params_from_iter(args),
        row_to_operation,
      )?;
      Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    })
  }

  /// Operations still marked in flight, used by the startup resume
  /// pass.
  pub fn unfinished_operations(
    &self,
  ) -> Result<Vec<UpdateOperation>> {
    self.with_conn(|conn| {
      let mut stmt = conn.prepare(&format!(
        "SELECT {OPERATION_COLUMNS} FROM operations
         WHERE status IN ('queued', 'in_progress', 'pending_restart')
         ORDER BY id ASC"
      ))?;
      let rows = stmt.query_map([], row_to_operation)?;
      Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    })
  }

  // ==================
  //      BACKUPS
  // ==================

  pub fn list_backups(&self) -> Result<Vec<ComposeBackup>> {
    self.with_conn(|conn| {
      let mut stmt = conn.prepare(&format!(
        "SELECT {BACKUP_COLUMNS} FROM compose_backups
         ORDER BY id DESC"
      ))?;
      let rows = stmt.query_map([], row_to_backup)?;
      Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    })
  }

  pub fn backups_for_operation(
    &self,
    operation_id: &str,
  ) -> Result<Vec<ComposeBackup>> {
    self.with_conn(|conn| {
      let mut stmt = conn.prepare(&format!(
        "SELECT {BACKUP_COLUMNS} FROM compose_backups
         WHERE operation_id = ?1 ORDER BY id ASC"
      ))?;
      let rows =
        stmt.query_map(params![operation_id], row_to_backup)?;
      Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    })
  }

  /// Deletes a consumed backup row. The backup file on disk is left
  /// alone.
  pub fn delete_backup(&self, id: i64) -> Result<()> {
    self.with_conn(|conn| {
      conn.execute(
        "DELETE FROM compose_backups WHERE id = ?1",
        params![id],
      )?;
      Ok(())
    })
  }

  // ==================
  //      POLICIES
  // ==================

  pub fn set_rollback_policy(
    &self,
    policy: &RollbackPolicy,
  ) -> Result<()> {
    self.with_conn(|conn| {
      conn.execute(
        "INSERT INTO rollback_policies
          (entity_type, entity_id, auto_rollback_enabled,
           health_check_required)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (entity_type, entity_id) DO UPDATE SET
           auto_rollback_enabled = excluded.auto_rollback_enabled,
           health_check_required = excluded.health_check_required",
        params![
          policy.scope.to_string(),
          policy.entity_id,
          policy.auto_rollback_enabled,
          policy.health_check_required,
        ],
      )?;
      Ok(())
    })
  }

  /// Effective policy for a container: container row, then its stack
  /// row, then the global row (always present).
  pub fn rollback_policy(
    &self,
    container: &str,
    stack: Option<&str>,
  ) -> Result<RollbackPolicy> {
    self.with_conn(|conn| {
      let mut lookup = |scope: &str, entity_id: &str| {
        conn
          .query_row(
            "SELECT entity_type, entity_id, auto_rollback_enabled,
                    health_check_required
             FROM rollback_policies
             WHERE entity_type = ?1 AND entity_id = ?2",
            params![scope, entity_id],
            row_to_policy,
          )
          .map(Some)
          .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            e => Err(e),
          })
      };
      if let Some(policy) = lookup("container", container)? {
        return Ok(policy);
      }
      if let Some(stack) = stack
        && let Some(policy) = lookup("stack", stack)?
      {
        return Ok(policy);
      }
      lookup("global", "")?.ok_or_else(|| {
        StoreError::NotFound("rollback policy", "global".into())
      })
    })
  }

  pub fn list_rollback_policies(
    &self,
  ) -> Result<Vec<RollbackPolicy>> {
    self.with_conn(|conn| {
      let mut stmt = conn.prepare(
        "SELECT entity_type, entity_id, auto_rollback_enabled,
                health_check_required
         FROM rollback_policies ORDER BY entity_type, entity_id",
      )?;
      let rows = stmt.query_map([], row_to_policy)?;
      Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    })
  }

  // ==================
  //       QUEUE
  // ==================

  pub fn enqueue_update(
    &self,
    stack: Option<&str>,
    containers: &[String],
    priority: i64,
  ) -> Result<i64> {
    let containers_json = serde_json::to_string(containers)?;
    self.with_conn(|conn| {
      conn.execute(
        "INSERT INTO update_queue
          (stack, containers_json, priority, queued_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
          stack,
          containers_json,
          priority,
          convoy_timestamp()
        ],
      )?;
      Ok(conn.last_insert_rowid())
    })
  }

  pub fn dequeue_update(&self, id: i64) -> Result<()> {
    self.with_conn(|conn| {
      conn.execute(
        "DELETE FROM update_queue WHERE id = ?1",
        params![id],
      )?;
      Ok(())
    })
  }

  pub fn pending_queue(&self) -> Result<Vec<QueuedUpdate>> {
    self.with_conn(|conn| {
      let mut stmt = conn.prepare(
        "SELECT id, stack, containers_json, priority, queued_at
         FROM update_queue ORDER BY priority DESC, id ASC",
      )?;
      let rows = stmt.query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, Option<String>>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, i64>(3)?,
          row.get::<_, i64>(4)?,
        ))
      })?;
      let mut queue = Vec::new();
      for row in rows {
        let (id, stack, containers_json, priority, queued_at) =
          row?;
        queue.push(QueuedUpdate {
          id,
          stack,
          containers: serde_json::from_str(&containers_json)?,
          priority,
          queued_at,
        });
      }
      Ok(queue)
    })
  }

  // ==================
  //     CONFIG KV
  // ==================

  pub fn get_kv(&self, key: &str) -> Result<Option<String>> {
    self.with_conn(|conn| {
      conn
        .query_row(
          "SELECT value FROM config_kv WHERE key = ?1",
          params![key],
          |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
          rusqlite::Error::QueryReturnedNoRows => Ok(None),
          e => Err(e.into()),
        })
    })
  }

  pub fn set_kv(&self, key: &str, value: &str) -> Result<()> {
    self.with_conn(|conn| {
      conn.execute(
        "INSERT INTO config_kv (key, value) VALUES (?1, ?2)
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        params![key, value],
      )?;
      Ok(())
    })
  }

  pub fn get_kv_json<T: DeserializeOwned>(
    &self,
    key: &str,
  ) -> Result<Option<T>> {
    match self.get_kv(key)? {
      Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
      None => Ok(None),
    }
  }

  pub fn set_kv_json<T: Serialize>(
    &self,
    key: &str,
    value: &T,
  ) -> Result<()> {
    self.set_kv(key, &serde_json::to_string(value)?)
  }

  // ==================
  //     SNAPSHOTS
  // ==================

  pub fn latest_config_snapshot(
    &self,
  ) -> Result<Option<String>> {
    self.with_conn(|conn| {
      conn
        .query_row(
          "SELECT config_data_json FROM config_snapshots
           ORDER BY id DESC LIMIT 1",
          [],
          |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
          rusqlite::Error::QueryReturnedNoRows => Ok(None),
          e => Err(e.into()),
        })
    })
  }

  pub fn insert_config_snapshot(
    &self,
    config_data_json: &str,
    changed_by: &str,
  ) -> Result<()> {
    self.with_conn(|conn| {
      conn.execute(
        "INSERT INTO config_snapshots
          (snapshot_time, config_data_json, changed_by)
         VALUES (?1, ?2, ?3)",
        params![convoy_timestamp(), config_data_json, changed_by],
      )?;
      Ok(())
    })
  }
}

const OPERATION_COLUMNS: &str = "id, container_name, stack, type, \
  status, old_version, new_version, started_at, completed_at, \
  error_message, dependents_affected_json, rollback_occurred, \
  pulled_digest";

const BACKUP_COLUMNS: &str = "id, operation_id, container_name, \
  stack, compose_file_path, backup_file_path, env_backup_path, \
  backup_timestamp";

fn init_schema(conn: &Connection) -> Result<()> {
  conn.execute_batch(
    "CREATE TABLE IF NOT EXISTS operations (
       id TEXT PRIMARY KEY,
       container_name TEXT NOT NULL,
       stack TEXT,
       type TEXT NOT NULL,
       status TEXT NOT NULL,
       old_version TEXT,
       new_version TEXT,
       started_at INTEGER NOT NULL,
       completed_at INTEGER,
       error_message TEXT,
       dependents_affected_json TEXT NOT NULL DEFAULT '[]',
       rollback_occurred INTEGER NOT NULL DEFAULT 0,
       pulled_digest TEXT
     );
     CREATE INDEX IF NOT EXISTS idx_operations_container
       ON operations (container_name);
     CREATE INDEX IF NOT EXISTS idx_operations_status
       ON operations (status);
     CREATE TABLE IF NOT EXISTS compose_backups (
       id INTEGER PRIMARY KEY AUTOINCREMENT,
       operation_id TEXT NOT NULL,
       container_name TEXT NOT NULL,
       stack TEXT,
       compose_file_path TEXT NOT NULL,
       backup_file_path TEXT NOT NULL,
       env_backup_path TEXT,
       backup_timestamp INTEGER NOT NULL
     );
     CREATE TABLE IF NOT EXISTS rollback_policies (
       entity_type TEXT NOT NULL,
       entity_id TEXT NOT NULL,
       auto_rollback_enabled INTEGER NOT NULL,
       health_check_required INTEGER NOT NULL,
       PRIMARY KEY (entity_type, entity_id)
     );
     CREATE TABLE IF NOT EXISTS update_queue (
       id INTEGER PRIMARY KEY AUTOINCREMENT,
       stack TEXT,
       containers_json TEXT NOT NULL,
       priority INTEGER NOT NULL DEFAULT 0,
       queued_at INTEGER NOT NULL
     );
     CREATE TABLE IF NOT EXISTS config_kv (
       key TEXT PRIMARY KEY,
       value TEXT NOT NULL
     );
     CREATE TABLE IF NOT EXISTS config_snapshots (
       id INTEGER PRIMARY KEY AUTOINCREMENT,
       snapshot_time INTEGER NOT NULL,
       config_data_json TEXT NOT NULL,
       changed_by TEXT NOT NULL
     );",
  )?;
  // The global policy row always exists.
  conn.execute(
    "INSERT OR IGNORE INTO rollback_policies
      (entity_type, entity_id, auto_rollback_enabled,
       health_check_required)
     VALUES ('global', '', 0, 1)",
    [],
  )?;
  Ok(())
}

fn upsert_operation(
  conn: &Connection,
  operation: &UpdateOperation,
) -> Result<()> {
  let dependents_json =
    serde_json::to_string(&operation.dependents_affected)?;
  conn.execute(
    "INSERT INTO operations
      (id, container_name, stack, type, status, old_version,
       new_version, started_at, completed_at, error_message,
       dependents_affected_json, rollback_occurred, pulled_digest)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
     ON CONFLICT (id) DO UPDATE SET
       status = excluded.status,
       old_version = excluded.old_version,
       new_version = excluded.new_version,
       completed_at = excluded.completed_at,
       error_message = excluded.error_message,
       dependents_affected_json = excluded.dependents_affected_json,
       rollback_occurred = excluded.rollback_occurred,
       pulled_digest = excluded.pulled_digest",
    params![
      operation.id,
      operation.container_name,
      operation.stack,
      operation.operation_type.to_string(),
      operation.status.to_string(),
      operation.old_version,
      operation.new_version,
      operation.started_at,
      operation.completed_at,
      operation.error_message,
      dependents_json,
      operation.rollback_occurred,
      operation.pulled_digest,
    ],
  )?;
  Ok(())
}

fn row_to_operation(
  row: &Row<'_>,
) -> rusqlite::Result<UpdateOperation> {
  let type_raw = row.get::<_, String>(3)?;
  let status_raw = row.get::<_, String>(4)?;
  let dependents_json = row.get::<_, String>(10)?;
  Ok(UpdateOperation {
    id: row.get(0)?,
    container_name: row.get(1)?,
    stack: row.get(2)?,
    operation_type: OperationType::from_str(&type_raw)
      .unwrap_or_default(),
    status: OperationStatus::from_str(&status_raw)
      .unwrap_or_default(),
    old_version: row.get(5)?,
    new_version: row.get(6)?,
    started_at: row.get(7)?,
    completed_at: row.get(8)?,
    error_message: row.get(9)?,
    dependents_affected: serde_json::from_str(&dependents_json)
      .unwrap_or_default(),
    rollback_occurred: row.get(11)?,
    pulled_digest: row.get(12)?,
  })
}

fn row_to_backup(row: &Row<'_>) -> rusqlite::Result<ComposeBackup> {
  Ok(ComposeBackup {
    id: row.get(0)?,
    operation_id: row.get(1)?,
    container_name: row.get(2)?,
    stack: row.get(3)?,
    compose_file_path: row.get(4)?,
    backup_file_path: row.get(5)?,
    env_backup_path: row.get(6)?,
    backup_timestamp: row.get(7)?,
  })
}

fn row_to_policy(row: &Row<'_>) -> rusqlite::Result<RollbackPolicy> {
  let scope_raw = row.get::<_, String>(0)?;
  Ok(RollbackPolicy {
    scope: PolicyScope::from_str(&scope_raw).unwrap_or_default(),
    entity_id: row.get(1)?,
    auto_rollback_enabled: row.get(2)?,
    health_check_required: row.get(3)?,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn operation(id: &str, name: &str) -> UpdateOperation {
    UpdateOperation {
      id: id.to_string(),
      container_name: name.to_string(),
      stack: Some("media".to_string()),
      operation_type: OperationType::Single,
      status: OperationStatus::Queued,
      old_version: Some("1.25.0".to_string()),
      started_at: convoy_timestamp(),
      ..Default::default()
    }
  }

  #[test]
  fn operation_round_trip() {
    let store = Store::in_memory().unwrap();
    let mut op = operation("20240101120000-abc123", "nginx");
    store.create_operation(&op).unwrap();

    op.status = OperationStatus::Complete;
    op.new_version = Some("1.25.3".to_string());
    op.completed_at = Some(convoy_timestamp());
    op.dependents_affected = vec!["qbittorrent".to_string()];
    store.update_operation(&op).unwrap();

    let loaded =
      store.get_operation("20240101120000-abc123").unwrap();
    assert_eq!(loaded.status, OperationStatus::Complete);
    assert_eq!(loaded.new_version.as_deref(), Some("1.25.3"));
    assert_eq!(loaded.dependents_affected, ["qbittorrent"]);
  }

  #[test]
  fn missing_operation_is_not_found() {
    let store = Store::in_memory().unwrap();
    match store.get_operation("nope") {
      Err(StoreError::NotFound("operation", _)) => {}
      other => panic!("unexpected: {other:?}"),
    }
  }

  #[test]
  fn list_operations_filters_and_limits() {
    let store = Store::in_memory().unwrap();
    for (id, name) in [
      ("20240101120000-aaaaaa", "nginx"),
      ("20240101120001-bbbbbb", "nginx"),
      ("20240101120002-cccccc", "gluetun"),
    ] {
      store.create_operation(&operation(id, name)).unwrap();
    }

    let nginx = store
      .list_operations(&OperationFilter {
        container: Some("nginx".to_string()),
        ..Default::default()
      })
      .unwrap();
    assert_eq!(nginx.len(), 2);
    // Newest first.
    assert_eq!(nginx[0].id, "20240101120001-bbbbbb");

    let limited = store
      .list_operations(&OperationFilter {
        limit: Some(1),
        ..Default::default()
      })
      .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, "20240101120002-cccccc");
  }

  #[test]
  fn backup_rows_are_transactional_with_operation() {
    let store = Store::in_memory().unwrap();
    let mut op = operation("20240101120000-abc123", "nginx");
    store.create_operation(&op).unwrap();

    op.status = OperationStatus::InProgress;
    let backup = ComposeBackup {
      operation_id: op.id.clone(),
      container_name: "nginx".to_string(),
      stack: op.stack.clone(),
      compose_file_path: "/srv/media/compose.yaml".to_string(),
      backup_file_path:
        "/srv/media/compose.yaml.backup.20240101120000".to_string(),
      backup_timestamp: convoy_timestamp(),
      ..Default::default()
    };
    let backup_id = store.record_backup(&op, &backup).unwrap();
    assert!(backup_id > 0);

    let listed = store.list_backups().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].operation_id, op.id);
    assert_eq!(
      store.get_operation(&op.id).unwrap().status,
      OperationStatus::InProgress
    );

    store.delete_backup(backup_id).unwrap();
    assert!(store.list_backups().unwrap().is_empty());
  }

  #[test]
  fn policy_lookup_resolves_container_stack_global() {
    let store = Store::in_memory().unwrap();
    // Global row seeded at open.
    let global =
      store.rollback_policy("anything", Some("media")).unwrap();
    assert_eq!(global.scope, PolicyScope::Global);
    assert!(!global.auto_rollback_enabled);

    store
      .set_rollback_policy(&RollbackPolicy {
        scope: PolicyScope::Stack,
        entity_id: "media".to_string(),
        auto_rollback_enabled: true,
        health_check_required: true,
      })
      .unwrap();
    let stack =
      store.rollback_policy("qbittorrent", Some("media")).unwrap();
    assert_eq!(stack.scope, PolicyScope::Stack);
    assert!(stack.auto_rollback_enabled);

    store
      .set_rollback_policy(&RollbackPolicy {
        scope: PolicyScope::Container,
        entity_id: "qbittorrent".to_string(),
        auto_rollback_enabled: false,
        health_check_required: false,
      })
      .unwrap();
    let container =
      store.rollback_policy("qbittorrent", Some("media")).unwrap();
    assert_eq!(container.scope, PolicyScope::Container);
    assert!(!container.auto_rollback_enabled);
  }

  #[test]
  fn queue_survives_round_trip() {
    let store = Store::in_memory().unwrap();
    let id = store
      .enqueue_update(
        Some("media"),
        &["gluetun".to_string(), "qbittorrent".to_string()],
        0,
      )
      .unwrap();
    let pending = store.pending_queue().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].containers, ["gluetun", "qbittorrent"]);

    store.dequeue_update(id).unwrap();
    assert!(store.pending_queue().unwrap().is_empty());
  }

  #[test]
  fn kv_and_snapshots() {
    let store = Store::in_memory().unwrap();
    assert_eq!(store.get_kv("last_cache_refresh").unwrap(), None);
    store.set_kv("last_cache_refresh", "1700000000000").unwrap();
    store.set_kv("last_cache_refresh", "1700000001000").unwrap();
    assert_eq!(
      store.get_kv("last_cache_refresh").unwrap().as_deref(),
      Some("1700000001000")
    );

    assert!(store.latest_config_snapshot().unwrap().is_none());
    store
      .insert_config_snapshot("{\"check_interval\":3600}", "startup")
      .unwrap();
    assert_eq!(
      store.latest_config_snapshot().unwrap().as_deref(),
      Some("{\"check_interval\":3600}")
    );
  }
}
