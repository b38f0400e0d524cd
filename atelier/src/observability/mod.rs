//! Observability: log initialisation, lifecycle event sinks, per-job
//! metrics and aggregate statistics.

mod logging;
mod metrics;
mod reporter;
mod sink;

pub use logging::{init_tracing, LogFormat};
pub use metrics::{JobMetrics, ResourceUsage, SpanTimer, UsageSnapshot};
pub use reporter::{Reporter, TypeStats, DEFAULT_METRICS_RETENTION};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
