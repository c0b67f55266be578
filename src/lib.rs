//! Ingestion and aggregation core for live operational dashboards.
//!
//! Producers push heterogeneous [`event::Event`]s through an
//! [`ingest::IngestHandle`]; the [`dashboard::Dashboard`] run loop batches
//! them, validates derived samples, and maintains bounded time series,
//! dynamic axis scales, bucketed aggregates and a service-interaction graph
//! readable through [`dashboard::DashboardView`].

pub mod bucket;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod event;
pub mod export;
pub mod filter;
pub mod graph;
pub mod history;
pub mod ingest;
pub mod scale;
pub mod series;
pub mod stats;
