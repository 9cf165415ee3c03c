//! # Database
//!
//! PostgreSQL pool setup, schema migrations and the error type shared by the
//! post and media record stores. Queries live next to the stores that issue
//! them.

pub mod connection;
pub mod errors;

pub use connection::{DatabaseConnection, MIGRATOR};
pub use errors::{StoreError, StoreResult};
