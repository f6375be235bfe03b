//! Schema Diff Engine
//!
//! Name-keyed structural comparison of two schema snapshots. This is the
//! "git diff" for a schema: everything the migration generator emits is
//! derived from a [`SchemaDiff`].
//!
//! Output order follows the inputs (target order for additions, current
//! order for removals and modifications), so the same pair of schemas always
//! yields the same diff and therefore the same migration checksum.

use crate::schema::model::{
    Column, Constraint, EnumType, Function, Index, RlsPolicy, Schema, Table, Trigger,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

/// Knobs for column comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiffOptions {
    pub ignore_default_values: bool,
    pub ignore_comments: bool,
}

/// Aspect of a column that changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnChange {
    Type,
    Nullability,
    Default,
    Unique,
    PrimaryKey,
    References,
    Check,
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDiff {
    pub column_name: String,
    pub before: Column,
    pub after: Column,
    pub changes: Vec<ColumnChange>,
}

impl ColumnDiff {
    fn inverted(&self) -> Self {
        Self {
            column_name: self.column_name.clone(),
            before: self.after.clone(),
            after: self.before.clone(),
            changes: self.changes.clone(),
        }
    }
}

/// Changes inside a table present in both schemas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDiff {
    pub table_name: String,
    pub schema: String,
    pub added_columns: Vec<Column>,
    pub removed_columns: Vec<Column>,
    pub modified_columns: Vec<ColumnDiff>,
    pub added_indexes: Vec<Index>,
    pub removed_indexes: Vec<Index>,
    #[serde(default)]
    pub added_constraints: Vec<Constraint>,
    #[serde(default)]
    pub removed_constraints: Vec<Constraint>,
}

impl TableDiff {
    pub fn is_empty(&self) -> bool {
        self.added_columns.is_empty()
            && self.removed_columns.is_empty()
            && self.modified_columns.is_empty()
            && self.added_indexes.is_empty()
            && self.removed_indexes.is_empty()
            && self.added_constraints.is_empty()
            && self.removed_constraints.is_empty()
    }

    pub fn qualified_name(&self) -> String {
        crate::schema::model::qualify(&self.schema, &self.table_name)
    }

    fn inverted(&self) -> Self {
        Self {
            table_name: self.table_name.clone(),
            schema: self.schema.clone(),
            added_columns: self.removed_columns.clone(),
            removed_columns: self.added_columns.clone(),
            modified_columns: self.modified_columns.iter().map(ColumnDiff::inverted).collect(),
            added_indexes: self.removed_indexes.clone(),
            removed_indexes: self.added_indexes.clone(),
            added_constraints: self.removed_constraints.clone(),
            removed_constraints: self.added_constraints.clone(),
        }
    }
}

/// Before/after pair for an object replaced wholesale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change<T> {
    pub name: String,
    pub before: T,
    pub after: T,
}

impl<T: Clone> Change<T> {
    fn inverted(&self) -> Self {
        Self {
            name: self.name.clone(),
            before: self.after.clone(),
            after: self.before.clone(),
        }
    }
}

pub type PolicyDiff = Change<RlsPolicy>;
pub type FunctionDiff = Change<Function>;
pub type TriggerDiff = Change<Trigger>;
pub type EnumDiff = Change<EnumType>;

/// Complete structural delta between two schemas
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchemaDiff {
    pub added_tables: Vec<Table>,
    pub removed_tables: Vec<Table>,
    pub modified_tables: Vec<TableDiff>,
    pub added_policies: Vec<RlsPolicy>,
    pub removed_policies: Vec<RlsPolicy>,
    pub modified_policies: Vec<PolicyDiff>,
    pub added_functions: Vec<Function>,
    pub removed_functions: Vec<Function>,
    pub modified_functions: Vec<FunctionDiff>,
    pub added_triggers: Vec<Trigger>,
    pub removed_triggers: Vec<Trigger>,
    pub modified_triggers: Vec<TriggerDiff>,
    pub added_enums: Vec<EnumType>,
    pub removed_enums: Vec<EnumType>,
    pub modified_enums: Vec<EnumDiff>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.added_tables.is_empty()
            && self.removed_tables.is_empty()
            && self.modified_tables.is_empty()
            && self.added_policies.is_empty()
            && self.removed_policies.is_empty()
            && self.modified_policies.is_empty()
            && self.added_functions.is_empty()
            && self.removed_functions.is_empty()
            && self.modified_functions.is_empty()
            && self.added_triggers.is_empty()
            && self.removed_triggers.is_empty()
            && self.modified_triggers.is_empty()
            && self.added_enums.is_empty()
            && self.removed_enums.is_empty()
            && self.modified_enums.is_empty()
    }

    /// Removing a table or a column loses data
    pub fn is_destructive(&self) -> bool {
        !self.removed_tables.is_empty()
            || self
                .modified_tables
                .iter()
                .any(|t| !t.removed_columns.is_empty())
    }

    /// Every table touched, in diff order, without duplicates
    pub fn affected_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut push = |name: &str| {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        };

        self.added_tables.iter().for_each(|t| push(&t.name));
        self.modified_tables.iter().for_each(|t| push(&t.table_name));
        self.removed_tables.iter().for_each(|t| push(&t.name));
        self.added_policies
            .iter()
            .chain(&self.removed_policies)
            .for_each(|p| push(&p.table));
        self.modified_policies.iter().for_each(|p| push(&p.after.table));
        self.added_triggers
            .iter()
            .chain(&self.removed_triggers)
            .for_each(|t| push(&t.table));
        self.modified_triggers.iter().for_each(|t| push(&t.after.table));

        names
    }

    /// The diff that undoes this one: added and removed swap, before and
    /// after swap.
    pub fn inverted(&self) -> Self {
        Self {
            added_tables: self.removed_tables.clone(),
            removed_tables: self.added_tables.clone(),
            modified_tables: self.modified_tables.iter().map(TableDiff::inverted).collect(),
            added_policies: self.removed_policies.clone(),
            removed_policies: self.added_policies.clone(),
            modified_policies: self.modified_policies.iter().map(Change::inverted).collect(),
            added_functions: self.removed_functions.clone(),
            removed_functions: self.added_functions.clone(),
            modified_functions: self.modified_functions.iter().map(Change::inverted).collect(),
            added_triggers: self.removed_triggers.clone(),
            removed_triggers: self.added_triggers.clone(),
            modified_triggers: self.modified_triggers.iter().map(Change::inverted).collect(),
            added_enums: self.removed_enums.clone(),
            removed_enums: self.added_enums.clone(),
            modified_enums: self.modified_enums.iter().map(Change::inverted).collect(),
        }
    }

    /// Patch `schema` structurally with this diff, returning a new schema.
    ///
    /// `diff(a, b).apply_to(a)` is equivalent to `b` under [`SchemaDiffer`].
    pub fn apply_to(&self, schema: &Schema) -> Schema {
        let mut patched = schema.clone();

        patched
            .tables
            .retain(|t| !self.removed_tables.iter().any(|r| r.name == t.name));
        patched.tables.extend(self.added_tables.iter().cloned());
        for table_diff in &self.modified_tables {
            if let Some(table) = patched
                .tables
                .iter_mut()
                .find(|t| t.name == table_diff.table_name)
            {
                patch_table(table, table_diff);
            }
        }

        patch_collection(
            &mut patched.policies,
            &self.removed_policies,
            &self.added_policies,
            &self.modified_policies,
            policy_key,
        );
        patch_collection(
            &mut patched.functions,
            &self.removed_functions,
            &self.added_functions,
            &self.modified_functions,
            function_key,
        );
        patch_collection(
            &mut patched.triggers,
            &self.removed_triggers,
            &self.added_triggers,
            &self.modified_triggers,
            trigger_key,
        );
        patch_collection(
            &mut patched.enums,
            &self.removed_enums,
            &self.added_enums,
            &self.modified_enums,
            enum_key,
        );

        patched
    }

    pub fn change_count(&self) -> usize {
        let table_changes: usize = self
            .modified_tables
            .iter()
            .map(|t| {
                t.added_columns.len()
                    + t.removed_columns.len()
                    + t.modified_columns.len()
                    + t.added_indexes.len()
                    + t.removed_indexes.len()
                    + t.added_constraints.len()
                    + t.removed_constraints.len()
            })
            .sum();

        self.added_tables.len()
            + self.removed_tables.len()
            + table_changes
            + self.added_policies.len()
            + self.removed_policies.len()
            + self.modified_policies.len()
            + self.added_functions.len()
            + self.removed_functions.len()
            + self.modified_functions.len()
            + self.added_triggers.len()
            + self.removed_triggers.len()
            + self.modified_triggers.len()
            + self.added_enums.len()
            + self.removed_enums.len()
            + self.modified_enums.len()
    }
}

fn patch_table(table: &mut Table, diff: &TableDiff) {
    table
        .columns
        .retain(|c| !diff.removed_columns.iter().any(|r| r.name == c.name));
    for change in &diff.modified_columns {
        if let Some(column) = table.columns.iter_mut().find(|c| c.name == change.column_name) {
            *column = change.after.clone();
        }
    }
    table.columns.extend(diff.added_columns.iter().cloned());

    table
        .indexes
        .retain(|i| !diff.removed_indexes.iter().any(|r| r.name == i.name));
    table.indexes.extend(diff.added_indexes.iter().cloned());

    table
        .constraints
        .retain(|c| !diff.removed_constraints.iter().any(|r| r.name == c.name));
    table.constraints.extend(diff.added_constraints.iter().cloned());
}

fn patch_collection<T, K>(
    items: &mut Vec<T>,
    removed: &[T],
    added: &[T],
    modified: &[Change<T>],
    key: fn(&T) -> K,
) where
    T: Clone,
    K: PartialEq,
{
    items.retain(|item| !removed.iter().any(|r| key(r) == key(item)));
    for change in modified {
        if let Some(item) = items.iter_mut().find(|i| key(i) == key(&change.before)) {
            *item = change.after.clone();
        }
    }
    items.extend(added.iter().cloned());
}

fn policy_key(p: &RlsPolicy) -> (String, String) {
    (p.table.clone(), p.name.clone())
}

fn function_key(f: &Function) -> String {
    f.name.clone()
}

fn trigger_key(t: &Trigger) -> (String, String) {
    (t.table.clone(), t.name.clone())
}

fn enum_key(e: &EnumType) -> String {
    e.name.clone()
}

/// Buckets produced by comparing one keyed collection
struct Buckets<T> {
    added: Vec<T>,
    removed: Vec<T>,
    modified: Vec<(T, T)>,
}

/// Added in target order, removed and modified in current order.
fn compare_keyed<T, K>(
    current: &[T],
    target: &[T],
    key: impl Fn(&T) -> K,
    differs: impl Fn(&T, &T) -> bool,
) -> Buckets<T>
where
    T: Clone,
    K: Eq + Hash,
{
    let current_map: HashMap<K, &T> = current.iter().map(|item| (key(item), item)).collect();
    let target_map: HashMap<K, &T> = target.iter().map(|item| (key(item), item)).collect();

    let added = target
        .iter()
        .filter(|item| !current_map.contains_key(&key(*item)))
        .cloned()
        .collect();

    let mut removed = Vec::new();
    let mut modified = Vec::new();
    for item in current {
        match target_map.get(&key(item)) {
            None => removed.push(item.clone()),
            Some(after) if differs(item, after) => modified.push((item.clone(), (*after).clone())),
            Some(_) => {}
        }
    }

    Buckets { added, removed, modified }
}

/// Structural differ for schema snapshots
#[derive(Debug, Clone, Default)]
pub struct SchemaDiffer {
    options: DiffOptions,
}

impl SchemaDiffer {
    pub fn new(options: DiffOptions) -> Self {
        Self { options }
    }

    /// Compare two schemas and return every difference
    pub fn diff(&self, current: &Schema, target: &Schema) -> SchemaDiff {
        let tables = compare_keyed(&current.tables, &target.tables, |t| t.name.clone(), |_, _| true);
        let modified_tables = tables
            .modified
            .iter()
            .map(|(before, after)| self.diff_table(before, after))
            .filter(|d| !d.is_empty())
            .collect();

        let policies = compare_keyed(&current.policies, &target.policies, policy_key, |a, b| a != b);
        let functions = compare_keyed(&current.functions, &target.functions, function_key, |a, b| a != b);
        let triggers = compare_keyed(&current.triggers, &target.triggers, trigger_key, |a, b| a != b);
        let enums = compare_keyed(&current.enums, &target.enums, enum_key, |a, b| a.values != b.values);

        SchemaDiff {
            added_tables: tables.added,
            removed_tables: tables.removed,
            modified_tables,
            added_policies: policies.added,
            removed_policies: policies.removed,
            modified_policies: into_changes(policies.modified, |p| p.name.clone()),
            added_functions: functions.added,
            removed_functions: functions.removed,
            modified_functions: into_changes(functions.modified, |f| f.name.clone()),
            added_triggers: triggers.added,
            removed_triggers: triggers.removed,
            modified_triggers: into_changes(triggers.modified, |t| t.name.clone()),
            added_enums: enums.added,
            removed_enums: enums.removed,
            modified_enums: into_changes(enums.modified, |e| e.name.clone()),
        }
    }

    fn diff_table(&self, before: &Table, after: &Table) -> TableDiff {
        let columns = compare_keyed(
            &before.columns,
            &after.columns,
            |c| c.name.clone(),
            |a, b| !self.column_changes(a, b).is_empty(),
        );
        let indexes = compare_keyed(&before.indexes, &after.indexes, |i| i.name.clone(), |a, b| a != b);
        let constraints = compare_keyed(
            &before.constraints,
            &after.constraints,
            |c| c.name.clone(),
            |a, b| a != b,
        );

        let modified_columns = columns
            .modified
            .into_iter()
            .map(|(before, after)| ColumnDiff {
                column_name: before.name.clone(),
                changes: self.column_changes(&before, &after),
                before,
                after,
            })
            .collect();

        // A redefined index or constraint is dropped and recreated under its name
        let mut removed_indexes = indexes.removed;
        let mut added_indexes = Vec::new();
        for (old, new) in indexes.modified {
            removed_indexes.push(old);
            added_indexes.push(new);
        }
        added_indexes.extend(indexes.added);

        let mut removed_constraints = constraints.removed;
        let mut added_constraints = Vec::new();
        for (old, new) in constraints.modified {
            removed_constraints.push(old);
            added_constraints.push(new);
        }
        added_constraints.extend(constraints.added);

        TableDiff {
            table_name: before.name.clone(),
            schema: before.schema.clone(),
            added_columns: columns.added,
            removed_columns: columns.removed,
            modified_columns,
            added_indexes,
            removed_indexes,
            added_constraints,
            removed_constraints,
        }
    }

    /// Field-by-field column comparison
    pub fn column_changes(&self, before: &Column, after: &Column) -> Vec<ColumnChange> {
        let mut changes = Vec::new();

        if !same_type(&before.data_type, &after.data_type) {
            changes.push(ColumnChange::Type);
        }
        if before.nullable != after.nullable {
            changes.push(ColumnChange::Nullability);
        }
        if !self.options.ignore_default_values && before.default_value != after.default_value {
            changes.push(ColumnChange::Default);
        }
        if before.is_unique != after.is_unique {
            changes.push(ColumnChange::Unique);
        }
        if before.is_primary_key != after.is_primary_key {
            changes.push(ColumnChange::PrimaryKey);
        }
        if before.is_foreign_key != after.is_foreign_key || before.references != after.references {
            changes.push(ColumnChange::References);
        }
        if before.check != after.check {
            changes.push(ColumnChange::Check);
        }
        if !self.options.ignore_comments && before.comment != after.comment {
            changes.push(ColumnChange::Comment);
        }

        changes
    }
}

fn into_changes<T>(pairs: Vec<(T, T)>, name: impl Fn(&T) -> String) -> Vec<Change<T>> {
    pairs
        .into_iter()
        .map(|(before, after)| Change {
            name: name(&before),
            before,
            after,
        })
        .collect()
}

/// Type names compare case-insensitively, ignoring inner whitespace
fn same_type(a: &str, b: &str) -> bool {
    let normalize = |s: &str| -> String {
        s.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    };
    normalize(a) == normalize(b)
}
