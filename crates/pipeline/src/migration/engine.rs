use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::step::Migration;
use crate::error::MigrationError;
use crate::store::MigrationStore;

/// Applies an ordered migration chain against a store, exactly once each
pub struct MigrationEngine {
    store: Arc<dyn MigrationStore>,
    migrations: Vec<Migration>,
}

impl MigrationEngine {
    /// The chain must be numbered 1, 2, 3, ... in order
    pub fn new(
        store: Arc<dyn MigrationStore>,
        migrations: Vec<Migration>,
    ) -> Result<Self, MigrationError> {
        for (index, migration) in migrations.iter().enumerate() {
            let expected = index as u32 + 1;
            if migration.sequence != expected {
                return Err(MigrationError::Sequence {
                    expected,
                    found: migration.sequence,
                });
            }
        }
        Ok(Self { store, migrations })
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    async fn applied_sequences(&self) -> Result<HashSet<u32>, MigrationError> {
        let records = self.store.applied().await?;
        let known = self.migrations.len() as u32;
        for record in records.iter().filter(|r| r.sequence > known) {
            warn!(sequence = record.sequence, name = %record.name, "ledger holds a migration this build does not know");
        }
        Ok(records.into_iter().map(|r| r.sequence).collect())
    }

    /// Migrations without a ledger record, in sequence order. The ledger is
    /// read once; the returned iterator is lazy and can be cloned to restart.
    pub async fn pending_migrations(&self) -> Result<PendingMigrations<'_>, MigrationError> {
        let applied = self.applied_sequences().await?;
        Ok(PendingMigrations {
            remaining: self.migrations.iter(),
            applied: Arc::new(applied),
        })
    }

    /// Apply one migration. Returns false if its record already exists.
    pub async fn apply(&self, migration: &Migration) -> Result<bool, MigrationError> {
        let applied = self.applied_sequences().await?;
        if applied.contains(&migration.sequence) {
            debug!(sequence = migration.sequence, name = %migration.name, "migration already applied");
            return Ok(false);
        }
        if migration.sequence > 1 && !applied.contains(&(migration.sequence - 1)) {
            return Err(MigrationError::OutOfOrder {
                sequence: migration.sequence,
                name: migration.name.clone(),
                missing: migration.sequence - 1,
            });
        }

        info!(sequence = migration.sequence, name = %migration.name, steps = migration.steps.len(), "applying migration");
        self.store
            .apply(migration)
            .await
            .map_err(|source| MigrationError::Failed {
                sequence: migration.sequence,
                name: migration.name.clone(),
                source,
            })?;
        info!(sequence = migration.sequence, name = %migration.name, "migration applied");
        Ok(true)
    }

    /// Apply everything pending, stopping at the first failure.
    /// Returns the names applied by this run.
    pub async fn run(&self) -> Result<Vec<String>, MigrationError> {
        let pending: Vec<&Migration> = self.pending_migrations().await?.collect();
        if pending.is_empty() {
            info!(total = self.migrations.len(), "schema is up to date");
            return Ok(Vec::new());
        }
        info!(total = self.migrations.len(), pending = pending.len(), "running migrations");

        let mut applied = Vec::with_capacity(pending.len());
        for migration in pending {
            if let Err(e) = self.apply(migration).await {
                error!(sequence = migration.sequence, name = %migration.name, error = %e, "migration failed, halting");
                return Err(e);
            }
            applied.push(migration.name.clone());
        }
        Ok(applied)
    }
}

/// Lazy view over the migrations missing from the ledger
#[derive(Clone)]
pub struct PendingMigrations<'a> {
    remaining: std::slice::Iter<'a, Migration>,
    applied: Arc<HashSet<u32>>,
}

impl<'a> PendingMigrations<'a> {
    /// Names only
    pub fn names(self) -> impl Iterator<Item = &'a str> {
        self.map(|m| m.name.as_str())
    }
}

impl<'a> Iterator for PendingMigrations<'a> {
    type Item = &'a Migration;

    fn next(&mut self) -> Option<Self::Item> {
        let applied = &self.applied;
        self.remaining.find(|m| !applied.contains(&m.sequence))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining.len()))
    }
}
