pub mod catalog;
pub mod config;
pub mod inference;
pub mod routes;
pub mod state;
pub mod storage;
