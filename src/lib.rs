//! # indexkit
//!
//! Command-line host for the `indexkit-core` indexing layer: indexes,
//! servers and datasources come from a TOML file, tracking state and
//! indexed items live in SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ Datasources  │──▶│  Index           │──▶│  Backend     │
//! │ JSON files   │   │  tracker+pipeline│   │ SQLite/memory│
//! └──────────────┘   └────────┬─────────┘   └──────┬───────┘
//!                             │                    │
//!                             ▼                    ▼
//!                      tracker_items          indexed_items
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! indexkit init                    # create database
//! indexkit track main              # queue every item of index "main"
//! indexkit index main              # index pending items in batches
//! indexkit search main "rust" --filter "views>=2"
//! indexkit status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`registry`] | Backend, datasource and processor factories |
//! | [`workspace`] | Builds the configured indexes |
//! | [`tracker_sqlite`] | SQLite tracker store |
//! | [`backend_sqlite`] | SQLite search backend |
//! | [`datasource_json`] | Directory-of-JSON datasource |
//! | [`db`] / [`migrate`] | Database connection and schema |

pub mod backend_sqlite;
pub mod config;
pub mod datasource_json;
pub mod db;
pub mod index_cmd;
pub mod migrate;
pub mod progress;
pub mod registry;
pub mod search;
pub mod status;
pub mod tracker_sqlite;
pub mod workspace;
