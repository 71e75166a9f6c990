pub mod derived;
pub mod metrics;

pub use metrics::ExporterMetrics;
