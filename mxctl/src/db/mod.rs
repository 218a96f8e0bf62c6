//! Database layer for data persistence and access.
//!
//! This module implements the data access layer using SQLx with SQLite.
//! It follows the Repository pattern to provide clean abstractions over database operations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  (API request handlers, authentication backends)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - queries)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - database records)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   SQLite    │
//! └─────────────┘
//! ```
//!
//! # Transactions
//!
//! Repositories borrow a `&mut SqliteConnection`, so they work equally on a pooled connection
//! or on a transaction. Anything that writes to more than one table (for example provisioning a
//! directory user together with its mailbox) should run inside a transaction:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! let mut users = Users::new(&mut tx);
//! // ... operations ...
//! tx.commit().await?;
//! ```
//!
//! # Migrations
//!
//! Migrations live in the `migrations/` directory and are embedded with [`crate::migrator`].

pub mod errors;
pub mod handlers;
pub mod models;
pub mod pool;
