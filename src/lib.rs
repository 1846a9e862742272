pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod judgment;
pub mod lifecycle;
pub mod platform;
pub mod quality;
pub mod routes;
pub mod screening;
pub mod state;
pub mod sync;
