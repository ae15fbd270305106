//! Persistence collaborator: connection strings, schema migrations, and an
//! in-memory database.
//!
//! The [`Database`] trait is the migration seam the bootstrap drives.
//! [`MemoryDatabase`] implements it together with
//! [`IdentityStore`](crate::identity::IdentityStore); its tables only exist
//! once the migrations that create them have been applied, so anything that
//! touches identity data before migration fails with
//! [`PersistenceError::SchemaNotReady`].

use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::handler::BoxFuture;
use crate::identity::{IdentityRole, IdentityUser};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("database schema is not ready; apply pending migrations first")]
    SchemaNotReady,

    #[error("migration `{id}` failed: {reason}")]
    Migration { id: &'static str, reason: String },
}

// ── Connection string ─────────────────────────────────────────────────────────

/// `key=value;key=value` connection string. Keys compare case-insensitively.
#[derive(Clone, Debug)]
pub struct ConnectionString {
    pairs: Vec<(String, String)>,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self, PersistenceError> {
        let mut pairs = Vec::new();
        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                PersistenceError::InvalidConnectionString(format!("`{part}` is not key=value"))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(PersistenceError::InvalidConnectionString("empty key".to_owned()));
            }
            pairs.push((key.to_owned(), value.trim().to_owned()));
        }
        if pairs.is_empty() {
            return Err(PersistenceError::InvalidConnectionString("no settings".to_owned()));
        }
        Ok(Self { pairs })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// The database name: `Database`, else `Initial Catalog`, else `Data Source`.
    pub fn database(&self) -> Option<&str> {
        self.get("Database")
            .or_else(|| self.get("Initial Catalog"))
            .or_else(|| self.get("Data Source"))
            .filter(|v| !v.is_empty())
    }
}

// ── Migrations ────────────────────────────────────────────────────────────────

/// Tables of the in-memory database. A table is `None` until the migration
/// that creates it has run.
#[derive(Debug, Default)]
pub struct Schema {
    pub(crate) users: Option<Vec<IdentityUser>>,
    pub(crate) roles: Option<Vec<IdentityRole>>,
    pub(crate) user_roles: Option<Vec<(Uuid, Uuid)>>,
}

/// One ordered schema change.
#[derive(Clone, Copy)]
pub struct Migration {
    pub id: &'static str,
    pub apply: fn(&mut Schema) -> Result<(), String>,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration").field("id", &self.id).finish()
    }
}

/// Migrations shipped with the application, in order.
pub const MIGRATIONS: &[Migration] = &[
    Migration { id: "00000000000000_CreateIdentitySchema", apply: create_identity_schema },
    Migration { id: "00000000000001_CreateUserRoles", apply: create_user_roles },
];

fn create_identity_schema(schema: &mut Schema) -> Result<(), String> {
    schema.users.get_or_insert_with(Vec::new);
    schema.roles.get_or_insert_with(Vec::new);
    Ok(())
}

fn create_user_roles(schema: &mut Schema) -> Result<(), String> {
    if schema.users.is_none() || schema.roles.is_none() {
        return Err("user and role tables must exist".to_owned());
    }
    schema.user_roles.get_or_insert_with(Vec::new);
    Ok(())
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MigrationReport {
    /// Migrations applied by this call, in order. Empty if none were pending.
    pub applied: Vec<&'static str>,
}

/// Schema management seam used during startup.
pub trait Database: Send + Sync + 'static {
    /// Migrations not yet applied, in order.
    fn pending_migrations(&self) -> BoxFuture<'_, Vec<&'static str>>;

    /// Applies every pending migration in order, stopping at the first
    /// failure. Already-applied migrations are never re-run.
    fn migrate(&self) -> BoxFuture<'_, Result<MigrationReport, PersistenceError>>;
}

// ── MemoryDatabase ────────────────────────────────────────────────────────────

/// In-process database holding the identity tables.
pub struct MemoryDatabase {
    name: String,
    migrations: Vec<Migration>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    applied: Vec<&'static str>,
    schema: Schema,
}

impl MemoryDatabase {
    /// Opens the database named by the connection string.
    pub fn connect(connection_string: &str) -> Result<Self, PersistenceError> {
        let parsed = ConnectionString::parse(connection_string)?;
        let name = parsed.database().ok_or_else(|| {
            PersistenceError::InvalidConnectionString("no database name".to_owned())
        })?;
        Ok(Self {
            name: name.to_owned(),
            migrations: MIGRATIONS.to_vec(),
            state: Mutex::new(State::default()),
        })
    }

    /// Appends a migration after the shipped ones.
    pub fn with_migration(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn applied_migrations(&self) -> Vec<&'static str> {
        self.lock().applied.clone()
    }

    /// Runs `f` against the schema.
    pub(crate) fn with_schema<T>(
        &self,
        f: impl FnOnce(&mut Schema) -> Result<T, PersistenceError>,
    ) -> Result<T, PersistenceError> {
        f(&mut self.lock().schema)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Database for MemoryDatabase {
    fn pending_migrations(&self) -> BoxFuture<'_, Vec<&'static str>> {
        Box::pin(async move {
            let state = self.lock();
            self.migrations.iter()
                .map(|m| m.id)
                .filter(|id| !state.applied.contains(id))
                .collect()
        })
    }

    fn migrate(&self) -> BoxFuture<'_, Result<MigrationReport, PersistenceError>> {
        Box::pin(async move {
            let mut state = self.lock();
            let mut report = MigrationReport::default();
            for migration in &self.migrations {
                if state.applied.contains(&migration.id) {
                    continue;
                }
                (migration.apply)(&mut state.schema).map_err(|reason| {
                    PersistenceError::Migration { id: migration.id, reason }
                })?;
                state.applied.push(migration.id);
                report.applied.push(migration.id);
                info!(database = %self.name, migration = migration.id, "applied migration");
            }
            Ok(report)
        })
    }
}
