//! Migration SQL generator
//!
//! Turns a [`SchemaDiff`] into PostgreSQL DDL. Down SQL is never derived
//! from the up statements; it is generated from the inverted diff by the
//! same code path.

use crate::migration::models::{GeneratedMigration, Migration, RollbackValidation};
use crate::schema::{
    Column, ColumnChange, ColumnDiff, Constraint, DiffOptions, EnumType, Function, Index,
    RlsPolicy, Schema, SchemaDiff, SchemaDiffer, Table, TableDiff, Trigger,
};
use crate::sql::lexer;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

pub const DEFAULT_MIGRATION_NAME: &str = "auto_migration";

/// Hex characters kept from the SHA-256 digest
pub const CHECKSUM_LENGTH: usize = 16;

static NON_REVERSIBLE: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)\bTRUNCATE\b", "TRUNCATE"),
        (r"(?i)\bDROP\s+DATABASE\b", "DROP DATABASE"),
        (r"(?i)\bDROP\s+SCHEMA\b", "DROP SCHEMA"),
    ]
    .into_iter()
    .map(|(pattern, keyword)| (Regex::new(pattern).expect("non-reversible pattern"), keyword))
    .collect()
});

static DATA_LOSS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bDROP\s+(?:TABLE|COLUMN)\b").expect("data loss pattern")
});

/// Accumulates statements, plus warnings when generating the forward script
#[derive(Default)]
struct Script {
    statements: Vec<String>,
    warnings: Vec<String>,
}

impl Script {
    fn push(&mut self, statement: String) {
        self.statements.push(statement);
    }

    fn warn(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    fn into_sql(self) -> String {
        self.statements.join("\n")
    }
}

/// Migration generator
#[derive(Debug, Clone, Default)]
pub struct MigrationGenerator {
    differ: SchemaDiffer,
}

impl MigrationGenerator {
    pub fn new(options: DiffOptions) -> Self {
        Self {
            differ: SchemaDiffer::new(options),
        }
    }

    /// Diff `current` against `target` and synthesise the migration
    pub fn generate(&self, current: &Schema, target: &Schema, name: Option<&str>) -> GeneratedMigration {
        self.generate_at(current, target, name, Utc::now())
    }

    /// [`generate`](Self::generate) with an explicit timestamp
    pub fn generate_at(
        &self,
        current: &Schema,
        target: &Schema,
        name: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> GeneratedMigration {
        let diff = self.differ.diff(current, target);
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_MIGRATION_NAME)
            .to_string();

        let Script { statements, mut warnings } = build_script(&diff);
        let up = statements.join("\n");
        let down = Self::generate_down_sql(&diff);

        if diff.is_empty() {
            warnings.push("No schema changes detected".to_string());
        }

        let migration = Migration {
            id: migration_id(&timestamp, &name),
            checksum: checksum(&up),
            name,
            timestamp,
            up,
            down,
        };

        info!(
            "🛠️ Generated migration {} ({} change(s), checksum {})",
            migration.id,
            diff.change_count(),
            migration.checksum
        );

        GeneratedMigration {
            is_destructive: diff.is_destructive(),
            affected_tables: diff.affected_tables(),
            migration,
            diff,
            warnings,
        }
    }

    /// Forward DDL for a diff
    pub fn generate_up_sql(diff: &SchemaDiff) -> String {
        build_script(diff).into_sql()
    }

    /// Inverse DDL: the forward generator run over the inverted diff
    pub fn generate_down_sql(diff: &SchemaDiff) -> String {
        build_script(&diff.inverted()).into_sql()
    }

    /// Check that a migration can be rolled back soundly
    pub fn validate_rollback(migration: &Migration) -> RollbackValidation {
        let mut report = RollbackValidation::default();

        if migration.down.trim().is_empty() {
            report.errors.push("Rollback script is empty".to_string());
        } else if !migration.has_rollback() {
            report
                .errors
                .push("Rollback script is a placeholder with no statements".to_string());
        }

        let up_code = lexer::code_view(&migration.up);
        for (pattern, keyword) in NON_REVERSIBLE.iter() {
            if pattern.is_match(&up_code) {
                report.errors.push(format!(
                    "Up script contains {}, which cannot be rolled back",
                    keyword
                ));
            }
        }

        if DATA_LOSS.is_match(&up_code) {
            report
                .warnings
                .push("Up script drops data; rollback restores structure only".to_string());
        }

        report.is_valid = report.errors.is_empty();
        debug!(
            "Rollback validation for {}: {} error(s)",
            migration.id,
            report.errors.len()
        );
        report
    }
}

/// Truncated SHA-256 of the SQL text
pub fn checksum(sql: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(sql.as_bytes()));
    digest[..CHECKSUM_LENGTH].to_string()
}

pub fn migration_id(timestamp: &DateTime<Utc>, name: &str) -> String {
    format!("{}_{}", timestamp.timestamp_millis(), slugify(name))
}

/// Lowercase, non-alphanumeric runs folded to `_`
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        DEFAULT_MIGRATION_NAME.to_string()
    } else {
        slug.to_string()
    }
}

fn build_script(diff: &SchemaDiff) -> Script {
    let mut script = Script::default();

    // 0. types first so tables can use them
    for enum_type in &diff.added_enums {
        script.push(create_enum(enum_type));
    }
    for change in &diff.modified_enums {
        alter_enum(&mut script, &change.before, &change.after);
    }

    // 1. new tables
    for table in &diff.added_tables {
        create_table(&mut script, table);
    }

    // 2. tables present on both sides
    for table_diff in &diff.modified_tables {
        alter_table(&mut script, table_diff);
    }

    // 3. dropped tables, after everything that might still reference them
    for table in &diff.removed_tables {
        script.warn(format!(
            "Dropping table {} deletes all of its data",
            table.qualified_name()
        ));
        script.push(format!("DROP TABLE IF EXISTS {} CASCADE;", table.qualified_name()));
    }

    let dropped = |table: &str| diff.removed_tables.iter().any(|t| t.name == table);

    // 4. policies
    for policy in diff
        .removed_policies
        .iter()
        .chain(diff.modified_policies.iter().map(|c| &c.before))
        .filter(|p| !dropped(&p.table))
    {
        script.push(format!("DROP POLICY IF EXISTS {} ON {};", policy.name, policy.table));
    }
    for policy in diff
        .added_policies
        .iter()
        .chain(diff.modified_policies.iter().map(|c| &c.after))
    {
        script.push(create_policy(policy));
    }

    // 5. functions; a changed signature needs an explicit drop
    for function in &diff.removed_functions {
        script.push(drop_function(function));
    }
    for change in &diff.modified_functions {
        if change.before.arguments != change.after.arguments
            || change.before.returns != change.after.returns
        {
            script.push(drop_function(&change.before));
        }
    }
    for function in diff
        .added_functions
        .iter()
        .chain(diff.modified_functions.iter().map(|c| &c.after))
    {
        script.push(create_function(function));
    }

    // 6. triggers
    for trigger in diff
        .removed_triggers
        .iter()
        .chain(diff.modified_triggers.iter().map(|c| &c.before))
        .filter(|t| !dropped(&t.table))
    {
        script.push(format!("DROP TRIGGER IF EXISTS {} ON {};", trigger.name, trigger.table));
    }
    for trigger in diff
        .added_triggers
        .iter()
        .chain(diff.modified_triggers.iter().map(|c| &c.after))
    {
        script.push(create_trigger(trigger));
    }

    // 7. types no longer used
    for enum_type in &diff.removed_enums {
        script.push(format!("DROP TYPE IF EXISTS {};", enum_type.name));
    }

    script
}

fn create_enum(enum_type: &EnumType) -> String {
    let values: Vec<String> = enum_type.values.iter().map(|v| quote_literal(v)).collect();
    format!("CREATE TYPE {} AS ENUM ({});", enum_type.name, values.join(", "))
}

fn alter_enum(script: &mut Script, before: &EnumType, after: &EnumType) {
    for value in after.values.iter().filter(|v| !before.values.contains(v)) {
        script.push(format!(
            "ALTER TYPE {} ADD VALUE IF NOT EXISTS {};",
            after.name,
            quote_literal(value)
        ));
    }
    for value in before.values.iter().filter(|v| !after.values.contains(v)) {
        script.warn(format!(
            "Enum value {} of {} cannot be removed in place; recreate the type manually",
            quote_literal(value),
            before.name
        ));
    }
}

fn create_table(script: &mut Script, table: &Table) {
    let name = table.qualified_name();
    let pk_columns = table.primary_key_columns();
    let composite_pk = pk_columns.len() > 1;

    let mut body: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("    {}", column_definition(&table.name, c, !composite_pk)))
        .collect();
    if composite_pk {
        body.push(format!("    PRIMARY KEY ({})", pk_columns.join(", ")));
    }
    body.extend(
        table
            .constraints
            .iter()
            .map(|c| format!("    CONSTRAINT {} {}", c.name, c.definition)),
    );

    script.push(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
        name,
        body.join(",\n")
    ));
    script.push(format!("ALTER TABLE {} ENABLE ROW LEVEL SECURITY;", name));

    for index in &table.indexes {
        script.push(create_index(&name, index));
    }
    if let Some(comment) = &table.comment {
        script.push(format!("COMMENT ON TABLE {} IS {};", name, quote_literal(comment)));
    }
    for column in &table.columns {
        if let Some(comment) = &column.comment {
            script.push(format!(
                "COMMENT ON COLUMN {}.{} IS {};",
                name,
                column.name,
                quote_literal(comment)
            ));
        }
    }
}

/// `name type [PRIMARY KEY] [NOT NULL] [DEFAULT ..] [UNIQUE] [REFERENCES ..] [CHECK ..]`
fn column_definition(table: &str, column: &Column, inline_pk: bool) -> String {
    let mut def = format!("{} {}", column.name, column.data_type);

    if column.is_primary_key && inline_pk {
        def.push_str(" PRIMARY KEY");
    } else if !column.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default_value {
        def.push_str(&format!(" DEFAULT {}", default));
    }
    if column.is_unique && !column.is_primary_key {
        def.push_str(" UNIQUE");
    }
    if let Some(reference) = &column.references {
        def.push_str(&format!(" {}", references_clause(reference)));
    }
    if let Some(check) = &column.check {
        def.push_str(&format!(
            " CONSTRAINT {} CHECK ({})",
            constraint_name(table, &column.name, "check"),
            check
        ));
    }

    def
}

fn references_clause(reference: &crate::schema::ForeignKeyRef) -> String {
    let mut clause = format!("REFERENCES {}({})", reference.table, reference.column);
    if let Some(action) = reference.on_delete {
        clause.push_str(&format!(" ON DELETE {}", action.as_sql()));
    }
    if let Some(action) = reference.on_update {
        clause.push_str(&format!(" ON UPDATE {}", action.as_sql()));
    }
    clause
}

/// Postgres' default name for an inline column constraint
fn constraint_name(table: &str, column: &str, suffix: &str) -> String {
    format!("{}_{}_{}", table, column, suffix)
}

fn create_index(table: &str, index: &Index) -> String {
    let mut sql = format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {}",
        if index.unique { "UNIQUE " } else { "" },
        index.name,
        table
    );
    if let Some(method) = &index.method {
        sql.push_str(&format!(" USING {}", method));
    }
    sql.push_str(&format!(" ({})", index.columns.join(", ")));
    if let Some(predicate) = &index.predicate {
        sql.push_str(&format!(" WHERE {}", predicate));
    }
    sql.push(';');
    sql
}

fn drop_index(schema: &str, index: &Index) -> String {
    format!(
        "DROP INDEX IF EXISTS {};",
        crate::schema::model::qualify(schema, &index.name)
    )
}

fn alter_table(script: &mut Script, diff: &TableDiff) {
    let table = diff.qualified_name();

    for column in &diff.added_columns {
        if !column.nullable && column.default_value.is_none() {
            script.warn(format!(
                "Adding NOT NULL column {}.{} without a default fails on a populated table",
                table, column.name
            ));
        }
        script.push(format!(
            "ALTER TABLE {} ADD COLUMN {};",
            table,
            column_definition(&diff.table_name, column, true)
        ));
        if let Some(comment) = &column.comment {
            script.push(format!(
                "COMMENT ON COLUMN {}.{} IS {};",
                table,
                column.name,
                quote_literal(comment)
            ));
        }
    }

    for change in &diff.modified_columns {
        alter_column(script, diff, &table, change);
    }

    for column in &diff.removed_columns {
        script.warn(format!(
            "Dropping column {}.{} deletes its data",
            table, column.name
        ));
        script.push(format!("ALTER TABLE {} DROP COLUMN IF EXISTS {};", table, column.name));
    }

    for constraint in &diff.removed_constraints {
        script.push(format!(
            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
            table, constraint.name
        ));
    }
    for constraint in &diff.added_constraints {
        script.push(add_constraint(&table, constraint));
    }

    for index in &diff.removed_indexes {
        script.push(drop_index(&diff.schema, index));
    }
    for index in &diff.added_indexes {
        script.push(create_index(&table, index));
    }
}

fn add_constraint(table: &str, constraint: &Constraint) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} {};",
        table, constraint.name, constraint.definition
    )
}

/// One statement per changed aspect
fn alter_column(script: &mut Script, diff: &TableDiff, table: &str, change: &ColumnDiff) {
    let column = &change.column_name;
    let (before, after) = (&change.before, &change.after);

    for aspect in &change.changes {
        match aspect {
            ColumnChange::Type => {
                script.warn(format!(
                    "Changing type of {}.{} from {} to {} may fail or lose precision",
                    table, column, before.data_type, after.data_type
                ));
                script.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{};",
                    table, column, after.data_type, column, after.data_type
                ));
            }
            ColumnChange::Nullability => {
                if after.nullable {
                    script.push(format!("ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL;", table, column));
                } else {
                    script.warn(format!(
                        "Setting NOT NULL on {}.{} fails if existing rows hold NULL",
                        table, column
                    ));
                    script.push(format!("ALTER TABLE {} ALTER COLUMN {} SET NOT NULL;", table, column));
                }
            }
            ColumnChange::Default => match &after.default_value {
                Some(default) => script.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {};",
                    table, column, default
                )),
                None => script.push(format!("ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT;", table, column)),
            },
            ColumnChange::Unique => {
                let name = constraint_name(&diff.table_name, column, "key");
                if after.is_unique {
                    script.push(format!("ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({});", table, name, column));
                } else {
                    script.push(format!("ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};", table, name));
                }
            }
            ColumnChange::PrimaryKey => {
                script.warn(format!(
                    "Primary key membership of {}.{} changed; apply the key change manually",
                    table, column
                ));
            }
            ColumnChange::References => {
                let name = constraint_name(&diff.table_name, column, "fkey");
                if before.references.is_some() {
                    script.push(format!("ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};", table, name));
                }
                if let Some(reference) = &after.references {
                    script.push(format!(
                        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) {};",
                        table,
                        name,
                        column,
                        references_clause(reference)
                    ));
                }
            }
            ColumnChange::Check => {
                let name = constraint_name(&diff.table_name, column, "check");
                if before.check.is_some() {
                    script.push(format!("ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};", table, name));
                }
                if let Some(check) = &after.check {
                    script.push(format!(
                        "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({});",
                        table, name, check
                    ));
                }
            }
            ColumnChange::Comment => {
                let comment = after
                    .comment
                    .as_deref()
                    .map(quote_literal)
                    .unwrap_or_else(|| "NULL".to_string());
                script.push(format!("COMMENT ON COLUMN {}.{} IS {};", table, column, comment));
            }
        }
    }
}

fn create_policy(policy: &RlsPolicy) -> String {
    let mut sql = format!(
        "CREATE POLICY {} ON {} AS {} FOR {}",
        policy.name,
        policy.table,
        if policy.permissive { "PERMISSIVE" } else { "RESTRICTIVE" },
        policy.command.as_sql()
    );
    if !policy.roles.is_empty() {
        sql.push_str(&format!(" TO {}", policy.roles.join(", ")));
    }
    if let Some(using) = &policy.using {
        sql.push_str(&format!(" USING ({})", using));
    }
    if let Some(with_check) = &policy.with_check {
        sql.push_str(&format!(" WITH CHECK ({})", with_check));
    }
    sql.push(';');
    sql
}

fn drop_function(function: &Function) -> String {
    format!("DROP FUNCTION IF EXISTS {};", function.signature())
}

fn create_function(function: &Function) -> String {
    format!(
        "CREATE OR REPLACE FUNCTION {}\nRETURNS {}\nLANGUAGE {}{}\nAS $$\n{}\n$$;",
        function.signature(),
        function.returns,
        function.language,
        if function.security_definer { "\nSECURITY DEFINER" } else { "" },
        function.body.trim()
    )
}

fn create_trigger(trigger: &Trigger) -> String {
    let events: Vec<&str> = trigger.events.iter().map(|e| e.as_sql()).collect();
    format!(
        "CREATE TRIGGER {} {} {} ON {} FOR EACH {} EXECUTE FUNCTION {}();",
        trigger.name,
        trigger.timing.as_sql(),
        events.join(" OR "),
        trigger.table,
        if trigger.for_each_row { "ROW" } else { "STATEMENT" },
        trigger.function
    )
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PolicyCommand, TriggerEvent, TriggerTiming};
    use crate::sql::SqlValidator;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn users() -> Table {
        Table::new("users")
            .with_column(Column::new("id", "uuid").primary_key())
            .with_column(Column::new("email", "text").unique().not_null())
    }

    fn generator() -> MigrationGenerator {
        MigrationGenerator::default()
    }

    #[test]
    fn test_new_table_migration() {
        let target = Schema::new().with_table(users());
        let generated = generator().generate(&Schema::new(), &target, Some("create users"));
        let migration = &generated.migration;

        assert!(migration.up.contains("CREATE TABLE IF NOT EXISTS users"));
        assert!(migration.up.contains("ALTER TABLE users ENABLE ROW LEVEL SECURITY;"));
        assert!(migration.up.contains("id uuid PRIMARY KEY"));
        assert!(migration.up.contains("email text NOT NULL UNIQUE"));
        assert!(migration.down.contains("DROP TABLE IF EXISTS users"));
        assert!(!generated.is_destructive);
        assert_eq!(generated.affected_tables, vec!["users"]);
        assert!(migration.id.ends_with("_create_users"));
        assert_eq!(migration.name, "create users");
    }

    #[test]
    fn test_generated_sql_passes_validation() {
        let target = Schema::new().with_table(users().with_index(Index::new("idx_users_email", ["email"])));
        let generated = generator().generate(&Schema::new(), &target, None);

        let validator = SqlValidator::default();
        assert!(validator.validate(&generated.migration.up).is_valid);
        assert!(validator.validate(&generated.migration.down).is_valid);
    }

    #[test]
    fn test_dropped_table_is_destructive() {
        let current = Schema::new().with_table(Table::new("old_data").with_column(Column::new("id", "int")));
        let generated = generator().generate(&current, &Schema::new(), None);

        assert!(generated.is_destructive);
        assert!(!generated.warnings.is_empty());
        assert!(generated
            .migration
            .up
            .contains("DROP TABLE IF EXISTS old_data CASCADE"));
        assert!(generated
            .migration
            .down
            .contains("CREATE TABLE IF NOT EXISTS old_data"));
    }

    #[test]
    fn test_checksum_is_deterministic_and_sensitive() {
        let current = Schema::new().with_table(users());
        let target = Schema::new().with_table(users().with_column(Column::new("name", "text")));

        let first = generator().generate(&current, &target, None);
        let second = generator().generate(&current, &target, None);
        assert_eq!(first.migration.checksum, second.migration.checksum);
        assert_eq!(first.migration.checksum.len(), CHECKSUM_LENGTH);

        let other_target = Schema::new().with_table(users().with_column(Column::new("nickname", "text")));
        let third = generator().generate(&current, &other_target, None);
        assert_ne!(first.migration.checksum, third.migration.checksum);
    }

    #[test]
    fn test_modified_table_statement_order() {
        let current = Schema::new().with_table(
            users()
                .with_column(Column::new("legacy", "text"))
                .with_column(Column::new("age", "int"))
                .with_index(Index::new("idx_users_legacy", ["legacy"])),
        );
        let target = Schema::new().with_table(
            users()
                .with_column(Column::new("age", "bigint").not_null().default_value("0"))
                .with_column(Column::new("name", "text"))
                .with_index(Index::new("idx_users_name", ["name"])),
        );

        let up = generator().generate(&current, &target, None).migration.up;
        let position = |needle: &str| up.find(needle).unwrap_or_else(|| panic!("missing {needle}"));

        let add = position("ADD COLUMN name text");
        let alter_type = position("ALTER COLUMN age TYPE bigint USING age::bigint");
        let set_not_null = position("ALTER COLUMN age SET NOT NULL");
        let set_default = position("ALTER COLUMN age SET DEFAULT 0");
        let drop = position("DROP COLUMN IF EXISTS legacy");
        let drop_index = position("DROP INDEX IF EXISTS idx_users_legacy");
        let create_index = position("CREATE INDEX IF NOT EXISTS idx_users_name ON users (name)");

        assert!(add < alter_type);
        assert!(alter_type < set_not_null);
        assert!(set_not_null < set_default);
        assert!(set_default < drop);
        assert!(drop < drop_index);
        assert!(drop_index < create_index);
    }

    #[test]
    fn test_down_reverts_column_changes() {
        let current = Schema::new().with_table(users().with_column(Column::new("age", "int")));
        let target = Schema::new().with_table(
            users()
                .with_column(Column::new("age", "bigint").not_null())
                .with_column(Column::new("name", "text")),
        );

        let down = generator().generate(&current, &target, None).migration.down;
        assert!(down.contains("ALTER TABLE users ALTER COLUMN age TYPE int USING age::int;"));
        assert!(down.contains("ALTER TABLE users ALTER COLUMN age DROP NOT NULL;"));
        assert!(down.contains("ALTER TABLE users DROP COLUMN IF EXISTS name;"));
    }

    #[test]
    fn test_table_ops_precede_drops_and_policies() {
        let current = Schema::new().with_table(Table::new("old_data").with_column(Column::new("id", "int")));
        let target = Schema::new()
            .with_table(users())
            .with_policy(RlsPolicy::new("own_row", "users").for_command(PolicyCommand::Select).using("id = auth.uid()"));

        let up = generator().generate(&current, &target, None).migration.up;
        let create = up.find("CREATE TABLE IF NOT EXISTS users").unwrap();
        let drop = up.find("DROP TABLE IF EXISTS old_data CASCADE").unwrap();
        let policy = up
            .find("CREATE POLICY own_row ON users AS PERMISSIVE FOR SELECT USING (id = auth.uid());")
            .unwrap();
        assert!(create < drop);
        assert!(drop < policy);
    }

    #[test]
    fn test_functions_triggers_and_enums() {
        let function = Function::new("touch", "trigger", "BEGIN NEW.updated_at = now(); RETURN NEW; END;");
        let trigger = Trigger::new(
            "users_touch",
            "users",
            TriggerTiming::Before,
            vec![TriggerEvent::Insert, TriggerEvent::Update],
            "touch",
        );
        let current = Schema::new().with_table(users()).with_enum(EnumType::new("status", ["active"]));
        let target = Schema::new()
            .with_table(users())
            .with_function(function)
            .with_trigger(trigger)
            .with_enum(EnumType::new("status", ["active", "it's"]));

        let generated = generator().generate(&current, &target, None);
        let up = &generated.migration.up;
        assert!(up.contains("ALTER TYPE status ADD VALUE IF NOT EXISTS 'it''s';"));
        assert!(up.contains("CREATE OR REPLACE FUNCTION touch()\nRETURNS trigger\nLANGUAGE plpgsql\nAS $$"));
        assert!(up.contains(
            "CREATE TRIGGER users_touch BEFORE INSERT OR UPDATE ON users FOR EACH ROW EXECUTE FUNCTION touch();"
        ));
        assert!(up.find("CREATE OR REPLACE FUNCTION").unwrap() < up.find("CREATE TRIGGER").unwrap());

        let down = &generated.migration.down;
        assert!(down.contains("DROP FUNCTION IF EXISTS touch();"));
        assert!(down.contains("DROP TRIGGER IF EXISTS users_touch ON users;"));
        assert!(generated.warnings.is_empty());
    }

    #[test]
    fn test_empty_diff_yields_empty_scripts() {
        let schema = Schema::new().with_table(users());
        let generated = generator().generate(&schema, &schema, None);
        assert!(generated.migration.up.is_empty());
        assert!(generated.migration.down.is_empty());
        assert_eq!(generated.warnings, vec!["No schema changes detected"]);
        assert!(generated.migration.id.ends_with("_auto_migration"));
    }

    #[test]
    fn test_migration_id_and_slug() {
        let timestamp = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(migration_id(&timestamp, "Add Users!"), "1700000000123_add_users");
        assert_eq!(slugify("  --  "), "auto_migration");
        assert_eq!(slugify("v2.1 orders/items"), "v2_1_orders_items");
    }

    #[test]
    fn test_validate_rollback() {
        let timestamp = Utc.timestamp_millis_opt(0).unwrap();
        let migration = |up: &str, down: &str| Migration {
            id: migration_id(&timestamp, "m"),
            name: "m".to_string(),
            timestamp,
            up: up.to_string(),
            down: down.to_string(),
            checksum: checksum(up),
        };

        let report = MigrationGenerator::validate_rollback(&migration(
            "ALTER TABLE t ADD COLUMN a int;",
            "ALTER TABLE t DROP COLUMN IF EXISTS a;",
        ));
        assert!(report.is_valid);

        let report = MigrationGenerator::validate_rollback(&migration("ALTER TABLE t ADD COLUMN a int;", "  "));
        assert!(!report.is_valid);

        let report = MigrationGenerator::validate_rollback(&migration(
            "ALTER TABLE t ADD COLUMN a int;",
            "-- nothing to undo",
        ));
        assert!(!report.is_valid);

        let report = MigrationGenerator::validate_rollback(&migration(
            "TRUNCATE t; DROP SCHEMA old;",
            "SELECT 1;",
        ));
        assert_eq!(report.errors.len(), 2);

        let report = MigrationGenerator::validate_rollback(&migration(
            "INSERT INTO notes (body) VALUES ('truncate me');",
            "DELETE FROM notes WHERE body = 'truncate me';",
        ));
        assert!(report.is_valid);
    }

    #[test]
    fn test_down_inverts_up_structurally() {
        let current = Schema::new().with_table(users());
        let target = Schema::new()
            .with_table(users().with_column(Column::new("name", "text")))
            .with_table(Table::new("posts").with_column(Column::new("id", "uuid").primary_key()));

        let generated = generator().generate(&current, &target, None);
        let patched = generated.diff.inverted().apply_to(&target);
        assert!(SchemaDiffer::default().diff(&current, &patched).is_empty());
        assert!(generated.migration.down.contains("DROP TABLE IF EXISTS posts CASCADE;"));
    }
}
