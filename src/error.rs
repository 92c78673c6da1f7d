//! Error types for the preview engine.

use thiserror::Error;

/// Errors that can occur anywhere in the preview pipeline.
#[derive(Error, Debug)]
pub enum PreviewError {
    /// The caller asked for a content kind the engine does not know.
    #[error("unsupported content kind: {0:?}")]
    UnsupportedContentKind(String),

    /// The guest did not report an outcome before the watchdog fired.
    #[error("preview timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The guest tried to grow its memory past the configured limit.
    #[error("memory limit exceeded: {0}")]
    MemoryLimitExceeded(String),

    /// Failed to initialize the Wasm runtime.
    #[error("failed to initialize runtime: {0}")]
    RuntimeInit(#[source] anyhow::Error),

    /// Failed to load or instantiate the script interpreter module.
    #[error("failed to load script interpreter: {0}")]
    ModuleLoad(#[source] anyhow::Error),

    /// The guest reported (or crashed with) a script exception.
    #[error("{name}: {message}")]
    GuestException {
        /// The exception constructor name (e.g. "TypeError").
        name: String,
        /// The exception message.
        message: String,
        /// The stack trace printed after the exception line, if any.
        stack: Option<String>,
    },

    /// The guest wrote something on the outcome channel that is not a protocol message.
    #[error("malformed guest message: {0}")]
    MalformedMessage(String),

    /// The sandbox instance was disposed while a message was in flight.
    #[error("sandbox instance {0} is disposed")]
    Disposed(String),

    /// I/O error while loading the interpreter.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The interpreter wasm file was not found.
    #[error("script interpreter wasm not found at: {0}")]
    InterpreterNotFound(String),

    /// Evaluation ran out of fuel (instruction limit).
    #[error("evaluation ran out of fuel after {consumed:?} instructions")]
    OutOfFuel {
        /// Number of instructions consumed before running out.
        consumed: Option<u64>,
    },
}

impl PreviewError {
    /// Create a guest exception from interpreter stderr output.
    pub fn from_guest_stderr(stderr: &str) -> Option<Self> {
        parse_guest_exception(stderr)
    }

    /// Check if this error represents a timeout.
    ///
    /// Running out of fuel counts as a timeout: both mean the guest did not
    /// finish within its budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PreviewError::Timeout(_) | PreviewError::OutOfFuel { .. })
    }

    /// Check if this error represents a memory limit exceeded.
    pub fn is_memory_limit(&self) -> bool {
        matches!(self, PreviewError::MemoryLimitExceeded(_))
    }

    /// Check if this error represents a guest script exception.
    pub fn is_guest_exception(&self) -> bool {
        matches!(self, PreviewError::GuestException { .. })
    }

    /// Check if this error is the caller's fault rather than the guest's.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            PreviewError::UnsupportedContentKind(_) | PreviewError::Config(_)
        )
    }
}

/// Result type alias for preview operations.
pub type Result<T> = std::result::Result<T, PreviewError>;

/// Parse an uncaught script exception from interpreter stderr.
///
/// QuickJS prints the exception as `Name: message` followed by indented
/// `at ...` frames. The last exception line wins when several are printed.
pub fn parse_guest_exception(stderr: &str) -> Option<PreviewError> {
    if stderr.trim().is_empty() {
        return None;
    }

    let lines: Vec<&str> = stderr.lines().collect();

    let mut exception_line = None;
    for (i, line) in lines.iter().enumerate() {
        let candidate = line.trim_start_matches("Uncaught ").trim_end();
        if !line.starts_with(' ') && looks_like_exception(candidate) {
            exception_line = Some((i, candidate));
        }
    }

    let (line_idx, exception_str) = exception_line?;
    let (name, message) = match exception_str.find(':') {
        Some(colon_pos) => (
            exception_str[..colon_pos].trim().to_string(),
            exception_str[colon_pos + 1..].trim().to_string(),
        ),
        None => (exception_str.trim().to_string(), String::new()),
    };

    let frames: Vec<&str> = lines[line_idx + 1..]
        .iter()
        .take_while(|l| l.starts_with(' ') || l.starts_with('\t'))
        .map(|l| l.trim())
        .collect();
    let stack = if frames.is_empty() {
        None
    } else {
        Some(frames.join("\n"))
    };

    Some(PreviewError::GuestException {
        name,
        message,
        stack,
    })
}

/// Check if a line looks like a script exception header.
fn looks_like_exception(line: &str) -> bool {
    const NAMES: [&str; 8] = [
        "Error",
        "TypeError",
        "ReferenceError",
        "SyntaxError",
        "RangeError",
        "InternalError",
        "EvalError",
        "URIError",
    ];

    let head = line.split(':').next().unwrap_or("").trim();
    if head.is_empty() || !head.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
        return false;
    }
    if head.contains(char::is_whitespace) {
        return false;
    }

    NAMES.contains(&head) || head.ends_with("Error") || head.ends_with("Exception")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_exception() {
        let stderr = "TypeError: not a function";
        match parse_guest_exception(stderr) {
            Some(PreviewError::GuestException {
                name,
                message,
                stack,
            }) => {
                assert_eq!(name, "TypeError");
                assert_eq!(message, "not a function");
                assert!(stack.is_none());
            }
            other => panic!("expected GuestException, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_exception_with_stack() {
        let stderr = "ReferenceError: 'useThing' is not defined\n    at Card (<eval>:3)\n    at <eval>:9\n";
        match parse_guest_exception(stderr) {
            Some(PreviewError::GuestException {
                name,
                message,
                stack,
            }) => {
                assert_eq!(name, "ReferenceError");
                assert_eq!(message, "'useThing' is not defined");
                let stack = stack.expect("stack frames");
                assert!(stack.starts_with("at Card"));
                assert_eq!(stack.lines().count(), 2);
            }
            other => panic!("expected GuestException, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_uncaught_prefix() {
        let stderr = "Uncaught InternalError: stack overflow";
        let err = parse_guest_exception(stderr).unwrap();
        assert_eq!(err.to_string(), "InternalError: stack overflow");
    }

    #[test]
    fn test_non_exception_output_is_ignored() {
        assert!(parse_guest_exception("").is_none());
        assert!(parse_guest_exception("   ").is_none());
        assert!(parse_guest_exception("rendering card\nall good").is_none());
    }

    #[test]
    fn test_error_helpers() {
        let timeout = PreviewError::Timeout(std::time::Duration::from_secs(2));
        assert!(timeout.is_timeout());
        assert!(!timeout.is_memory_limit());
        assert!(!timeout.is_caller_error());

        let fuel = PreviewError::OutOfFuel { consumed: None };
        assert!(fuel.is_timeout());

        let memory = PreviewError::MemoryLimitExceeded("grow".to_string());
        assert!(memory.is_memory_limit());

        let kind = PreviewError::UnsupportedContentKind("vue".to_string());
        assert!(kind.is_caller_error());
        assert_eq!(kind.to_string(), "unsupported content kind: \"vue\"");
    }
}
