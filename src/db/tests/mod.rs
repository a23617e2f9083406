//! Shared database repository test infrastructure
//!
//! Each repository has a test module containing shared test functions that
//! take `&dyn XxxRepo`, run once against the in-memory implementation and
//! once against SQLite with real migrations.
