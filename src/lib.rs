// Library exports for Pod
// This allows integration tests and external code to use Pod modules

pub mod auth;
pub mod backend;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod pods;
pub mod profiles;
pub mod routes;
pub mod state;
