//! Schema snapshots and structural diffing

pub mod diff;
pub mod model;

pub use diff::{
    ColumnChange, ColumnDiff, DiffOptions, EnumDiff, FunctionDiff, PolicyDiff, SchemaDiff,
    SchemaDiffer, TableDiff, TriggerDiff,
};
pub use model::{
    Column, Constraint, ConstraintKind, EnumType, ForeignKeyRef, Function, Index, PolicyCommand,
    ReferentialAction, RlsPolicy, Schema, Table, Trigger, TriggerEvent, TriggerTiming,
};
