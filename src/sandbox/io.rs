//! Guest stdin/stdout/stderr as in-memory WASI pipes.

use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};

/// The three standard streams of one evaluation.
///
/// stdin is pre-filled with the inject message; stdout and stderr are
/// capped, and a guest writing past the cap gets a write error.
#[derive(Debug, Clone)]
pub struct GuestIo {
    stdin: MemoryInputPipe,
    stdout: MemoryOutputPipe,
    stderr: MemoryOutputPipe,
}

impl GuestIo {
    pub fn new(input: impl Into<Vec<u8>>, max_output_bytes: usize) -> Self {
        Self {
            stdin: MemoryInputPipe::new(input.into()),
            stdout: MemoryOutputPipe::new(max_output_bytes),
            stderr: MemoryOutputPipe::new(max_output_bytes),
        }
    }

    pub fn stdin(&self) -> MemoryInputPipe {
        self.stdin.clone()
    }

    pub fn stdout(&self) -> MemoryOutputPipe {
        self.stdout.clone()
    }

    pub fn stderr(&self) -> MemoryOutputPipe {
        self.stderr.clone()
    }

    /// Captured stdout, lossily decoded.
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout.contents()).into_owned()
    }

    /// Captured stderr, lossily decoded.
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr.contents()).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_start_empty() {
        let io = GuestIo::new("{\"type\":\"inject\"}\n", 1024);
        assert!(io.stdout_str().is_empty());
        assert!(io.stderr_str().is_empty());
    }

    #[test]
    fn clones_share_buffers() {
        let io = GuestIo::new(Vec::new(), 1024);
        let stdout = io.stdout();
        assert_eq!(stdout.contents().len(), 0);
        assert_eq!(io.stdout().contents(), stdout.contents());
    }
}
