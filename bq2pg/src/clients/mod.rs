pub mod bigquery;
pub mod postgres;
