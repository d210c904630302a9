// Library for tests to access modules

pub mod aggregation_worker;
pub mod alerts;
pub mod analytics;
pub mod collector;
pub mod config;
pub mod device_client;
pub mod error;
pub mod hostname_cache;
pub mod integrity;
pub mod journal;
pub mod models;
pub mod optimization;
pub mod query;
pub mod retry;
pub mod routes;
pub mod stats;
pub mod telemetry_repo;
pub mod version;
