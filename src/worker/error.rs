//! Failure outcome of background work.

use std::any::Any;
use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Error captured from a unit of background work: the original failure plus
/// a diagnostic trace (source chain and backtrace).
#[derive(Clone)]
pub struct WorkError {
    value: Arc<dyn Error + Send + Sync + 'static>,
    trace: String,
}

impl WorkError {
    /// Wraps an error returned by the work function.
    pub fn new<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        let trace = build_trace(&error, &Backtrace::force_capture());
        Self {
            value: Arc::new(error),
            trace,
        }
    }

    /// Wraps a panic payload caught while running the work function.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::new(Panicked(panic_message(payload.as_ref())))
    }

    /// Human-readable description of the failure.
    pub fn message(&self) -> String {
        self.value.to_string()
    }

    /// Full diagnostic trace.
    pub fn trace(&self) -> &str {
        &self.trace
    }

    /// The original error.
    pub fn value(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.value.as_ref()
    }

    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.value.downcast_ref::<E>()
    }

    /// Whether the work function panicked rather than returning an error.
    pub fn is_panic(&self) -> bool {
        self.value.is::<Panicked>()
    }
}

impl fmt::Display for WorkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl fmt::Debug for WorkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkError")
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

/// A panic converted into an error.
#[derive(Debug)]
struct Panicked(String);

impl fmt::Display for Panicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "background work panicked: {}", self.0)
    }
}

impl Error for Panicked {}

fn build_trace(error: &(dyn Error + 'static), backtrace: &Backtrace) -> String {
    let mut trace = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        trace.push_str("\n  caused by: ");
        trace.push_str(&cause.to_string());
        source = cause.source();
    }
    trace.push_str("\n\nstack backtrace:\n");
    trace.push_str(&backtrace.to_string());
    trace
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Outer(Inner);

    #[derive(Debug)]
    struct Inner;

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "outer failed")
        }
    }

    impl fmt::Display for Inner {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "inner cause")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    impl Error for Inner {}

    #[test]
    fn keeps_value_and_source_chain() {
        let err = WorkError::new(Outer(Inner));
        assert_eq!(err.message(), "outer failed");
        assert!(err.trace().starts_with("outer failed\n  caused by: inner cause"));
        assert!(err.trace().contains("stack backtrace:"));
        assert!(err.downcast_ref::<Outer>().is_some());
        assert!(!err.is_panic());
    }

    #[test]
    fn converts_panic_payloads() {
        let err = WorkError::from_panic(Box::new("index out of bounds"));
        assert!(err.is_panic());
        assert_eq!(err.message(), "background work panicked: index out of bounds");

        let err = WorkError::from_panic(Box::new(String::from("owned message")));
        assert!(err.message().ends_with("owned message"));

        let err = WorkError::from_panic(Box::new(42u8));
        assert!(err.message().ends_with("non-string panic payload"));
    }

    #[test]
    fn panic_message_reads_hook_payloads() {
        let payload = std::panic::catch_unwind(|| panic!("lane {} stopped", 3)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "lane 3 stopped");
        assert_eq!(panic_message(&"static text"), "static text");
        assert_eq!(panic_message(&7i32), "non-string panic payload");
    }
}
