//! # nodelo-store
//!
//! SQLite persistence for contacts, chats, messages and admin accounts.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model. Callers that need several writes to land together use
//! [`Database::transaction`].

pub mod admins;
pub mod chats;
pub mod contacts;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod page;

mod columns;
mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use page::{Page, Paginated};
