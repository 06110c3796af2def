//! Tracing integration for structured logging and spans.

use tracing::level_filters::LevelFilter;
use tracing::{Level, Span, span};

/// Create a span for one invocation.
///
/// # Example
///
/// ```rust,ignore
/// use matbind::observability::span_invocation;
///
/// let _guard = span_invocation("Mat threshold(Mat, int)").entered();
/// // Marshal, invoke, publish...
/// ```
#[inline]
pub fn span_invocation(signature: &str) -> Span {
    span!(Level::INFO, "invocation", signature = %signature)
}

/// Create a span for a catalog rebuild or merge.
#[inline]
pub fn span_catalog(action: &str, archive: &str) -> Span {
    span!(Level::INFO, "catalog", action = %action, archive = %archive)
}

/// Create a span for enumerating one archive.
#[inline]
pub fn span_enumeration(archive: &str, mode: &str) -> Span {
    span!(Level::DEBUG, "enumerate", archive = %archive, mode = %mode)
}

/// Level filter for the `verbose` config flag.
///
/// Verbose hosts see per-invocation state transitions; quiet hosts only see
/// warnings and errors.
pub fn verbose_filter(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    }
}

/// Log an invocation state change.
#[inline]
pub fn trace_state_change(signature: &str, from: &str, to: &str) {
    tracing::debug!(
        signature = %signature,
        from = %from,
        to = %to,
        "invocation state changed"
    );
}

/// Log an invocation failure.
#[inline]
pub fn trace_invocation_error(signature: &str, error: &dyn std::error::Error) {
    tracing::warn!(
        signature = %signature,
        error = %error,
        "invocation failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_filter() {
        assert_eq!(verbose_filter(true), LevelFilter::DEBUG);
        assert_eq!(verbose_filter(false), LevelFilter::WARN);
    }

    #[test]
    fn test_span_creation() {
        let _span = span_invocation("void blur(Mat)");
        let _span = span_catalog("rebuild", "a.so");
        let _span = span_enumeration("a.so", "operations");
    }
}
