//! Asynchronous batching, summarization, redaction, and delivery of
//! analytic events describing flag evaluations.

mod diagnostics;
mod model;
mod processor;
mod redact;
mod summarizer;
mod user_keys;

pub use diagnostics::{DiagnosticsConfig, DiagnosticsHandle};
pub use model::{CustomEvent, Event, FeatureEvent, IdentifyEvent};
pub use processor::{EventProcessor, EventProcessorConfig};
pub use redact::{redact, RedactedUser};
pub use summarizer::EventSummarizer;
pub use user_keys::UserKeyCache;
