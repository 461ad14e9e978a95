pub mod config;
pub mod csv_bridge;
pub mod db;
pub mod i18n;
pub mod importer;
pub mod materializer;
pub mod php_array;
pub mod pipeline;
pub mod scanner;
pub mod security;
pub mod server;
