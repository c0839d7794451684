pub mod anomaly;
pub mod span;
pub mod trace;

pub use anomaly::{AnomalyKind, AnomalyResult, AnomalySet};
pub use span::{Span, SpanEvent, SpanStatus};
pub use trace::{FileType, Trace, TraceFile};
