pub mod admission;
pub mod api;
pub mod cache;
pub mod ledger;
pub mod lock;
pub mod memory;
pub mod models;
pub mod schema;
