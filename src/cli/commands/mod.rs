//! CLI command implementations.

mod config;
mod query;
mod serve;
mod sql;
mod tools;

pub use config::run_config;
pub use query::run_query;
pub use serve::run_serve;
pub use sql::run_sql;
pub use tools::run_tools;
