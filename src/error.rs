use std::fmt::Display;

use tracing::warn;
use tracing_error::{ExtractSpanTrace, SpanTrace};

/// An error paired with the span trace captured where it was produced.
#[derive(Debug)]
pub struct SpannedErr<T> {
    pub err: T,
    pub span_trace: SpanTrace,
}

impl<T> SpannedErr<T> {
    pub fn new(err: T) -> Self {
        SpannedErr {
            err,
            span_trace: SpanTrace::capture(),
        }
    }
}

pub trait SpannedExt<T, E> {
    fn with_span_trace(self) -> Result<T, SpannedErr<E>>;
}

impl<T, E> SpannedExt<T, E> for Result<T, E> {
    fn with_span_trace(self) -> Result<T, SpannedErr<E>> {
        self.map_err(SpannedErr::new)
    }
}

impl<E> ExtractSpanTrace for SpannedErr<E> {
    fn span_trace(&self) -> Option<&SpanTrace> {
        Some(&self.span_trace)
    }
}

impl<T: Display> Display for SpannedErr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.err, f)
    }
}

impl<U: std::error::Error> std::error::Error for SpannedErr<U> {}

/// Logs a non-fatal error as a warning, followed by its span trace if any.
///
/// Used on paths where a failure must be reported without replacing the
/// result the caller is about to return (teardown, log delivery).
pub(crate) fn warn_with_span_trace<E>(context: &str, e: &E)
where
    E: Display + ExtractSpanTrace,
{
    warn!("{context}: {e}");
    if let Some(span_trace) = e.span_trace() {
        eprintln!("\n{}\n", color_spantrace::colorize(span_trace));
    }
}
