//! Parley storage crate - SQLite connection management, schema migrations,
//! and the product catalog queried by the product-search route.

pub mod catalog;
pub mod db;
pub mod migrations;

pub use catalog::{Product, ProductCatalog};
pub use db::Database;
