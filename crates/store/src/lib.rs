pub mod db;
pub mod query;

pub use db::{Store, StoreStatus};
pub use query::QueryEngine;
