//! Versioned schema log.
//!
//! A migration is an immutable record: an id, the id of its predecessor, forward operations and optional
//! backward operations. Migrations form a single chain from one root. The database keeps a ledger of the
//! ids it has applied, which must always be a prefix of the chain.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{
    apperror::{ApplicationError, ErrorType},
    schema::{IndexDef, TableDef},
};

/**
 * One schema transformation.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /**
     * Creates a table with its indexes and uniqueness constraints.
     */
    CreateTable(TableDef),
    /**
     * Drops a table and all of its data.
     */
    DropTable(TableDef),
    CreateIndex { table: &'static str, index: IndexDef },
    DropIndex { table: &'static str, index: IndexDef },
}

impl Operation {
    pub fn describe(&self) -> String {
        match self {
            Operation::CreateTable(table) => format!("create table {}", table.name),
            Operation::DropTable(table) => format!("drop table {}", table.name),
            Operation::CreateIndex { table, index } => format!("create index {} on {table}", index.name),
            Operation::DropIndex { table, index } => format!("drop index {} on {table}", index.name),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        match self {
            Operation::CreateTable(table) => table.create_statements(),
            Operation::DropTable(table) => table.drop_statements(),
            Operation::CreateIndex { table, index } => vec![index.create_sql(table)],
            Operation::DropIndex { index, .. } => vec![index.drop_sql()],
        }
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, Operation::DropTable(_))
    }

    /**
     * Applies the operation to an in-memory schema.
     *
     * # Returns
     * An error describing the operation when it does not fit the schema, e.g. dropping a table that does not exist.
     */
    pub fn apply_to(&self, schema: &mut SchemaState) -> Result<(), String> {
        match self {
            Operation::CreateTable(table) => {
                if schema.tables.contains_key(table.name) {
                    return Err(format!("{}: table already exists", self.describe()));
                }
                schema.tables.insert(table.name, table.clone());
            }
            Operation::DropTable(table) => {
                if schema.tables.remove(table.name).is_none() {
                    return Err(format!("{}: table does not exist", self.describe()));
                }
            }
            Operation::CreateIndex { table, index } => {
                let Some(existing) = schema.tables.get_mut(table) else {
                    return Err(format!("{}: table does not exist", self.describe()));
                };
                if existing.indexes.iter().any(|other| other.name == index.name) {
                    return Err(format!("{}: index already exists", self.describe()));
                }
                existing.indexes.push(index.clone());
            }
            Operation::DropIndex { table, index } => {
                let Some(existing) = schema.tables.get_mut(table) else {
                    return Err(format!("{}: table does not exist", self.describe()));
                };
                let before = existing.indexes.len();
                existing.indexes.retain(|other| other.name != index.name);
                if existing.indexes.len() == before {
                    return Err(format!("{}: index does not exist", self.describe()));
                }
            }
        }
        Ok(())
    }
}

/**
 * In-memory view of a schema, used to replay migrations without a database.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaState {
    pub tables: BTreeMap<&'static str, TableDef>,
}

impl SchemaState {
    pub fn table_names(&self) -> Vec<&'static str> {
        self.tables.keys().copied().collect()
    }
}

/**
 * An immutable, versioned schema transformation.
 */
#[derive(Debug, Clone)]
pub struct Migration {
    pub id: &'static str,
    /**
     * Id of the migration this one builds on. `None` only for the root.
     */
    pub predecessor: Option<&'static str>,
    pub description: &'static str,
    pub forward: Vec<Operation>,
    /**
     * Operations undoing `forward`. `None` marks a one-way migration.
     */
    pub backward: Option<Vec<Operation>>,
}

impl Migration {
    pub fn is_reversible(&self) -> bool {
        self.backward.is_some()
    }

    /**
     * A migration is breaking when it drops data on the way forward.
     */
    pub fn is_breaking(&self) -> bool {
        self.forward.iter().any(Operation::is_destructive)
    }
}

/**
 * A row of the applied migrations ledger.
 */
#[derive(Debug, Clone, Serialize)]
pub struct AppliedMigration {
    pub id: String,
    pub predecessor: Option<String>,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}

/**
 * Status of one migration of the chain against a database.
 */
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    pub id: String,
    pub description: String,
    pub applied_at: Option<DateTime<Utc>>,
    pub reversible: bool,
    pub breaking: bool,
}

/**
 * Migrations ordered from the root to the latest one.
 */
#[derive(Debug, Clone)]
pub struct MigrationChain {
    migrations: Vec<Migration>,
}

impl MigrationChain {
    /**
     * Orders the migrations by their predecessor links.
     *
     * # Arguments
     * `migrations`: Migrations in any order.
     *
     * # Returns
     * The ordered chain, or a `Migration` error when ids are duplicated, there is not exactly one root, a
     * predecessor is unknown, two migrations share a predecessor, or the links form a cycle.
     */
    pub fn new(migrations: Vec<Migration>) -> Result<Self, ApplicationError> {
        let mut by_id: HashMap<&'static str, Migration> = HashMap::new();
        let mut successor: HashMap<&'static str, &'static str> = HashMap::new();
        let mut root: Option<&'static str> = None;

        for migration in &migrations {
            if by_id.contains_key(migration.id) {
                return Err(chain_error(format!("Duplicate migration id {}", migration.id)));
            }
            by_id.insert(migration.id, migration.clone());
        }
        for migration in &migrations {
            match migration.predecessor {
                None => {
                    if let Some(existing) = root {
                        return Err(chain_error(format!("Migrations {existing} and {} both have no predecessor", migration.id)));
                    }
                    root = Some(migration.id);
                }
                Some(predecessor) => {
                    if !by_id.contains_key(predecessor) {
                        return Err(chain_error(format!("Migration {} depends on unknown migration {predecessor}", migration.id)));
                    }
                    if let Some(existing) = successor.insert(predecessor, migration.id) {
                        return Err(chain_error(format!("Migrations {existing} and {} both depend on {predecessor}", migration.id)));
                    }
                }
            }
        }

        let mut ordered = Vec::with_capacity(migrations.len());
        let mut current = root;
        while let Some(id) = current {
            if let Some(migration) = by_id.remove(id) {
                ordered.push(migration);
            }
            current = successor.get(id).copied();
        }
        if !by_id.is_empty() {
            let mut remaining: Vec<&str> = by_id.keys().copied().collect();
            remaining.sort_unstable();
            return Err(chain_error(format!("Migrations {} form a cycle", remaining.join(", "))));
        }
        Ok(MigrationChain { migrations: ordered })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Migration> {
        self.migrations.iter().find(|migration| migration.id == id)
    }

    /**
     * Computes the migrations still to apply given the ledger of a database.
     *
     * # Arguments
     * `applied`: Ledger rows in any order.
     *
     * # Returns
     * The pending migrations in order, or a `Migration` error when the ledger is not a prefix of the chain.
     */
    pub fn pending(&self, applied: &[AppliedMigration]) -> Result<Vec<&Migration>, ApplicationError> {
        let applied_count = self.verify_ledger(applied)?;
        Ok(self.migrations[applied_count..].iter().collect())
    }

    /**
     * The last applied migration of the chain, if any.
     */
    pub fn last_applied(&self, applied: &[AppliedMigration]) -> Result<Option<&Migration>, ApplicationError> {
        let applied_count = self.verify_ledger(applied)?;
        Ok(applied_count.checked_sub(1).map(|index| &self.migrations[index]))
    }

    pub fn status(&self, applied: &[AppliedMigration]) -> Vec<MigrationStatus> {
        let applied_at: HashMap<&str, DateTime<Utc>> = applied.iter().map(|entry| (entry.id.as_str(), entry.applied_at)).collect();
        self.migrations
            .iter()
            .map(|migration| MigrationStatus {
                id: migration.id.to_string(),
                description: migration.description.to_string(),
                applied_at: applied_at.get(migration.id).copied(),
                reversible: migration.is_reversible(),
                breaking: migration.is_breaking(),
            })
            .collect()
    }

    /**
     * Replays the forward operations of the first `count` migrations on an empty schema.
     */
    pub fn schema_after(&self, count: usize) -> Result<SchemaState, ApplicationError> {
        let mut schema = SchemaState::default();
        for migration in self.migrations.iter().take(count) {
            for operation in &migration.forward {
                operation.apply_to(&mut schema).map_err(|err| chain_error(format!("Migration {} does not replay: {err}", migration.id)))?;
            }
        }
        Ok(schema)
    }

    /**
     * Schema produced by applying the whole chain to an empty database.
     */
    pub fn final_schema(&self) -> Result<SchemaState, ApplicationError> {
        self.schema_after(self.migrations.len())
    }

    fn verify_ledger(&self, applied: &[AppliedMigration]) -> Result<usize, ApplicationError> {
        let applied_ids: HashSet<&str> = applied.iter().map(|entry| entry.id.as_str()).collect();
        for entry in applied {
            let Some(migration) = self.get(&entry.id) else {
                return Err(chain_error(format!("Database has applied migration {} which is not part of this build", entry.id)));
            };
            if migration.predecessor != entry.predecessor.as_deref() {
                return Err(chain_error(format!(
                    "Migration {} was applied after {} but now depends on {}",
                    entry.id,
                    entry.predecessor.as_deref().unwrap_or("nothing"),
                    migration.predecessor.unwrap_or("nothing")
                )));
            }
        }
        let applied_count = applied_ids.len();
        if let Some(gap) = self.migrations[..applied_count.min(self.migrations.len())].iter().find(|migration| !applied_ids.contains(migration.id)) {
            return Err(chain_error(format!("Migration {} is missing from the ledger while later migrations are applied", gap.id)));
        }
        Ok(applied_count)
    }
}

fn chain_error(message: String) -> ApplicationError {
    ApplicationError::new(ErrorType::Migration, message)
}

#[cfg(test)]
mod test {
    use crate::model::schema::{ColumnDef, ColumnType};

    use super::*;

    fn table(name: &'static str) -> TableDef {
        TableDef::new(name).column(ColumnDef::id()).column(ColumnDef::new("value", ColumnType::Integer))
    }

    fn migration(id: &'static str, predecessor: Option<&'static str>, forward: Vec<Operation>) -> Migration {
        Migration { id, predecessor, description: id, forward, backward: None }
    }

    fn applied(id: &str, predecessor: Option<&str>) -> AppliedMigration {
        AppliedMigration { id: id.to_string(), predecessor: predecessor.map(str::to_string), description: id.to_string(), applied_at: Utc::now() }
    }

    fn sample_chain() -> MigrationChain {
        MigrationChain::new(vec![
            migration("0003_c", Some("0002_b"), vec![Operation::CreateTable(table("c"))]),
            migration("0001_a", None, vec![Operation::CreateTable(table("a")), Operation::CreateTable(table("placeholder"))]),
            migration("0002_b", Some("0001_a"), vec![Operation::DropTable(table("placeholder")), Operation::CreateTable(table("b"))]),
        ])
        .unwrap()
    }

    #[test]
    fn test_chain_is_ordered_by_predecessor() {
        let chain = sample_chain();
        let ids: Vec<&str> = chain.iter().map(|migration| migration.id).collect();
        assert_eq!(ids, vec!["0001_a", "0002_b", "0003_c"]);
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let result = MigrationChain::new(vec![migration("0001_a", None, vec![]), migration("0001_a", None, vec![])]);
        assert_eq!(result.err().unwrap().error_type, ErrorType::Migration);
    }

    #[test]
    fn test_two_roots_are_rejected() {
        let result = MigrationChain::new(vec![migration("0001_a", None, vec![]), migration("0001_b", None, vec![])]);
        assert!(result.err().unwrap().message.contains("no predecessor"));
    }

    #[test]
    fn test_unknown_predecessor_is_rejected() {
        let result = MigrationChain::new(vec![migration("0001_a", None, vec![]), migration("0002_b", Some("0001_x"), vec![])]);
        assert!(result.err().unwrap().message.contains("unknown migration 0001_x"));
    }

    #[test]
    fn test_branch_is_rejected() {
        let result = MigrationChain::new(vec![migration("0001_a", None, vec![]), migration("0002_b", Some("0001_a"), vec![]), migration("0002_c", Some("0001_a"), vec![])]);
        assert!(result.err().unwrap().message.contains("both depend on 0001_a"));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let result = MigrationChain::new(vec![migration("0001_a", None, vec![]), migration("0002_b", Some("0003_c"), vec![]), migration("0003_c", Some("0002_b"), vec![])]);
        let error = result.err().unwrap();
        assert!(error.message.contains("cycle"));
        assert!(error.message.contains("0002_b, 0003_c"));
    }

    #[test]
    fn test_pending_on_empty_ledger() {
        let chain = sample_chain();
        let pending: Vec<&str> = chain.pending(&[]).unwrap().iter().map(|migration| migration.id).collect();
        assert_eq!(pending, vec!["0001_a", "0002_b", "0003_c"]);
    }

    #[test]
    fn test_pending_skips_applied() {
        let chain = sample_chain();
        let ledger = vec![applied("0002_b", Some("0001_a")), applied("0001_a", None)];
        let pending: Vec<&str> = chain.pending(&ledger).unwrap().iter().map(|migration| migration.id).collect();
        assert_eq!(pending, vec!["0003_c"]);
    }

    #[test]
    fn test_fully_applied_ledger_has_nothing_pending() {
        let chain = sample_chain();
        let ledger = vec![applied("0001_a", None), applied("0002_b", Some("0001_a")), applied("0003_c", Some("0002_b"))];
        assert!(chain.pending(&ledger).unwrap().is_empty());
        assert_eq!(chain.last_applied(&ledger).unwrap().unwrap().id, "0003_c");
    }

    #[test]
    fn test_unknown_ledger_entry_is_rejected() {
        let chain = sample_chain();
        let ledger = vec![applied("0001_a", None), applied("0009_z", Some("0001_a"))];
        assert!(chain.pending(&ledger).err().unwrap().message.contains("0009_z"));
    }

    #[test]
    fn test_ledger_gap_is_rejected() {
        let chain = sample_chain();
        let ledger = vec![applied("0002_b", Some("0001_a"))];
        assert!(chain.pending(&ledger).err().unwrap().message.contains("0001_a is missing"));
    }

    #[test]
    fn test_ledger_predecessor_mismatch_is_rejected() {
        let chain = sample_chain();
        let ledger = vec![applied("0001_a", Some("0000_old"))];
        assert_eq!(chain.pending(&ledger).err().unwrap().error_type, ErrorType::Migration);
    }

    #[test]
    fn test_last_applied_on_empty_ledger() {
        assert!(sample_chain().last_applied(&[]).unwrap().is_none());
    }

    #[test]
    fn test_final_schema_has_no_placeholder() {
        let schema = sample_chain().final_schema().unwrap();
        assert_eq!(schema.table_names(), vec!["a", "b", "c"]);
        let intermediate = sample_chain().schema_after(1).unwrap();
        assert_eq!(intermediate.table_names(), vec!["a", "placeholder"]);
    }

    #[test]
    fn test_replay_rejects_drop_of_missing_table() {
        let chain = MigrationChain::new(vec![migration("0001_a", None, vec![Operation::DropTable(table("a"))])]).unwrap();
        assert!(chain.final_schema().err().unwrap().message.contains("drop table a"));
    }

    #[test]
    fn test_index_operations_replay() {
        let index = IndexDef::new("a_value_idx", &["value"]);
        let chain = MigrationChain::new(vec![
            migration("0001_a", None, vec![Operation::CreateTable(table("a"))]),
            migration("0002_b", Some("0001_a"), vec![Operation::CreateIndex { table: "a", index: index.clone() }]),
            migration("0003_c", Some("0002_b"), vec![Operation::DropIndex { table: "a", index: index.clone() }]),
        ])
        .unwrap();
        assert_eq!(chain.schema_after(2).unwrap().tables["a"].indexes, vec![index]);
        assert!(chain.final_schema().unwrap().tables["a"].indexes.is_empty());
    }

    #[test]
    fn test_status_marks_breaking_and_applied() {
        let chain = sample_chain();
        let status = chain.status(&[applied("0001_a", None)]);
        assert_eq!(status.len(), 3);
        assert!(status[0].applied_at.is_some());
        assert!(!status[0].breaking);
        assert!(status[1].applied_at.is_none());
        assert!(status[1].breaking);
        assert!(!status[1].reversible);
    }
}
