pub mod config;
pub mod db;
pub mod notifications;
pub mod reports;
