//! SQLite store for VBoxDash state persistence

use crate::store::InstanceStore;
use crate::types::*;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const INSTANCE_COLUMNS: &str = "id, user_id, name, os, cpu, ram, storage, ip_address, status, \
                                script_status, script_error, created_at";

/// Local instance store backed by a single SQLite connection
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self::from_connection(conn)?;
        info!("Opened database at {:?}", path.as_ref());
        Ok(store)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS instances (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                os TEXT NOT NULL,
                cpu INTEGER NOT NULL,
                ram INTEGER NOT NULL,
                storage INTEGER NOT NULL,
                ip_address TEXT,
                status TEXT NOT NULL DEFAULT 'stopped',
                script_status TEXT NOT NULL DEFAULT 'pending',
                script_error TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (name, user_id)
            );
            CREATE INDEX IF NOT EXISTS idx_instances_user ON instances(user_id);

            CREATE TABLE IF NOT EXISTS services (
                id TEXT PRIMARY KEY,
                instance_id TEXT NOT NULL REFERENCES instances(id) ON DELETE CASCADE,
                service_name TEXT NOT NULL,
                status TEXT NOT NULL,
                installed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_services_instance ON services(instance_id);

            CREATE TABLE IF NOT EXISTS vm_users (
                id TEXT PRIMARY KEY,
                instance_id TEXT NOT NULL REFERENCES instances(id) ON DELETE CASCADE,
                username TEXT NOT NULL,
                sudo INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_vm_users_instance ON vm_users(instance_id);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    fn query_instance(&self, sql: &str, args: &[&dyn ToSql]) -> Result<Option<Instance>> {
        let conn = self.conn.lock();
        let instance = conn.query_row(sql, args, instance_from_row).optional()?;
        Ok(instance)
    }
}

#[async_trait]
impl InstanceStore for SqliteStore {
    async fn list_instances(&self, user_id: &str) -> Result<Vec<Instance>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM instances WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
            INSTANCE_COLUMNS
        ))?;

        let rows = stmt.query_map(params![user_id], instance_from_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    async fn get_instance(&self, id: &str, user_id: &str) -> Result<Option<Instance>> {
        self.query_instance(
            &format!("SELECT {} FROM instances WHERE id = ?1 AND user_id = ?2", INSTANCE_COLUMNS),
            params![id, user_id],
        )
    }

    async fn find_instance_by_name(&self, user_id: &str, name: &str) -> Result<Option<Instance>> {
        self.query_instance(
            &format!("SELECT {} FROM instances WHERE user_id = ?1 AND name = ?2", INSTANCE_COLUMNS),
            params![user_id, name],
        )
    }

    async fn insert_instance(&self, new: NewInstance) -> Result<Instance> {
        let instance = Instance {
            id: Uuid::new_v4().to_string(),
            user_id: new.user_id,
            name: new.name,
            os: new.os,
            cpu: new.cpu,
            ram: new.ram,
            storage: new.storage,
            ip_address: None,
            status: new.status,
            script_status: new.script_status,
            script_error: None,
            created_at: Utc::now(),
        };

        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO instances (id, user_id, name, os, cpu, ram, storage, status, script_status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                instance.id,
                instance.user_id,
                instance.name,
                instance.os,
                instance.cpu,
                instance.ram,
                instance.storage,
                instance.status.as_str(),
                instance.script_status.as_str(),
                instance.created_at,
            ],
        );

        match inserted {
            Ok(_) => {
                debug!("Inserted instance {} ({})", instance.name, instance.id);
                Ok(instance)
            }
            Err(e) if is_unique_violation(&e) => Err(Error::AlreadyExists {
                kind: "instance".to_string(),
                id: instance.name,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_instance(&self, id: &str, patch: InstancePatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(status) = patch.status {
            values.push(Box::new(status.as_str()));
            sets.push(format!("status = ?{}", values.len()));
        }
        if let Some(script_status) = patch.script_status {
            values.push(Box::new(script_status.as_str()));
            sets.push(format!("script_status = ?{}", values.len()));
        }
        if let Some(script_error) = patch.script_error {
            values.push(Box::new(script_error));
            sets.push(format!("script_error = ?{}", values.len()));
        }
        values.push(Box::new(id.to_string()));

        let sql = format!("UPDATE instances SET {} WHERE id = ?{}", sets.join(", "), values.len());
        let conn = self.conn.lock();
        let rows = conn.execute(&sql, params_from_iter(values))?;

        debug!("Updated instance {} ({} rows)", id, rows);
        Ok(())
    }

    async fn delete_instance(&self, id: &str, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "DELETE FROM instances WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;

        if rows > 0 {
            debug!("Deleted instance {}", id);
        }
        Ok(rows > 0)
    }

    async fn list_services(&self, instance_id: &str) -> Result<Vec<Service>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, instance_id, service_name, status, installed_at
             FROM services WHERE instance_id = ?1 ORDER BY installed_at, rowid",
        )?;

        let rows = stmt.query_map(params![instance_id], |row| {
            Ok(Service {
                id: row.get(0)?,
                instance_id: row.get(1)?,
                service_name: row.get(2)?,
                status: row.get(3)?,
                installed_at: row.get(4)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    async fn insert_services(&self, services: Vec<NewService>) -> Result<Vec<Service>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();
        let mut inserted = Vec::with_capacity(services.len());

        for new in services {
            let service = Service {
                id: Uuid::new_v4().to_string(),
                instance_id: new.instance_id,
                service_name: new.service_name,
                status: new.status,
                installed_at: now,
            };
            tx.execute(
                "INSERT INTO services (id, instance_id, service_name, status, installed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    service.id,
                    service.instance_id,
                    service.service_name,
                    service.status,
                    service.installed_at,
                ],
            )?;
            inserted.push(service);
        }

        tx.commit()?;
        Ok(inserted)
    }

    async fn list_users(&self, instance_id: &str) -> Result<Vec<VmUser>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, instance_id, username, sudo, created_at
             FROM vm_users WHERE instance_id = ?1 ORDER BY created_at, rowid",
        )?;

        let rows = stmt.query_map(params![instance_id], |row| {
            Ok(VmUser {
                id: row.get(0)?,
                instance_id: row.get(1)?,
                username: row.get(2)?,
                sudo: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    async fn insert_users(&self, users: Vec<NewVmUser>) -> Result<Vec<VmUser>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();
        let mut inserted = Vec::with_capacity(users.len());

        for new in users {
            let user = VmUser {
                id: Uuid::new_v4().to_string(),
                instance_id: new.instance_id,
                username: new.username,
                sudo: new.sudo,
                created_at: now,
            };
            tx.execute(
                "INSERT INTO vm_users (id, instance_id, username, sudo, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user.id, user.instance_id, user.username, user.sudo, user.created_at],
            )?;
            inserted.push(user);
        }

        tx.commit()?;
        Ok(inserted)
    }
}

fn instance_from_row(row: &Row<'_>) -> rusqlite::Result<Instance> {
    Ok(Instance {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        os: row.get(3)?,
        cpu: row.get(4)?,
        ram: row.get(5)?,
        storage: row.get(6)?,
        ip_address: row.get(7)?,
        status: parse_text(row, 8)?,
        script_status: parse_text(row, 9)?,
        script_error: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn parse_text<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
