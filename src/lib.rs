//! SchemaFlow safe migration pipeline
//!
//! Turns the difference between two schema snapshots into reviewed,
//! safety-checked and reversibly tested SQL:
//!
//! - [`schema`]: snapshot model and structural diff
//! - [`migration`]: up/down synthesis with checksums
//! - [`sql`]: quote-aware lexing and static safety validation
//! - [`simulation`]: TTL-bound sandbox execution and test protocols
//! - [`review`]: risk scoring and the pending-review state machine
//! - [`pipeline`]: all of the above in one call

pub mod audit;
pub mod config;
pub mod error;
pub mod migration;
pub mod pipeline;
pub mod review;
pub mod routes;
pub mod schema;
pub mod simulation;
pub mod sql;
pub mod state;
pub mod ttl;
