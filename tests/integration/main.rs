//! Integration tests
//!
//! The Postgres suite needs a reachable database:
//! `DATABASE_URL=postgres://... cargo test -- --ignored`

mod ledger_scenarios;
mod postgres_ledger;
