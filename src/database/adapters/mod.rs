//! Backend connector implementations for different database engines

pub mod mysql;
pub mod postgres;

pub use mysql::{MySqlConnection, MySqlConnector};
pub use postgres::{PostgresConnection, PostgresConnector};
