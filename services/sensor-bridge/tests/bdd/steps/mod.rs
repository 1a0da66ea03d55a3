//! BDD step definitions for the sensor bridge

pub mod ingestion_steps;
pub mod query_steps;
