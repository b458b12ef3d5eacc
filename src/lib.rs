pub mod configuration;
pub mod domain;
pub mod email_client;
pub mod notifications;
pub mod rate_limit;
pub mod routes;
pub mod startup;
pub mod store;
pub mod telemetry;
pub mod utils;
