pub mod parser;
pub mod pipeline;
pub mod session;
pub mod stitch;
pub mod watch;

pub use parser::{ParserRegistry, SpanParser, select_parser};
pub use pipeline::{AppliedEvent, Pipeline, PipelineConfig};
pub use session::{LoadReport, Session};
pub use stitch::{TraceStitcher, stitch_spans};
pub use watch::{Debouncer, FileEvent, FileEventKind};
