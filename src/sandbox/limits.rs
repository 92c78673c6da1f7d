//! Resource limiting for guest stores.

use wasmtime::{ResourceLimiter, Store};
use wasmtime_wasi::preview1::WasiP1Ctx;

const MAX_TABLE_ELEMENTS: usize = 10_000;

/// Caps linear memory and table growth for one evaluation.
#[derive(Debug)]
pub struct SandboxLimiter {
    max_memory: u64,
    peak_memory: u64,
    limit_exceeded: bool,
}

impl SandboxLimiter {
    pub fn new(max_memory: u64) -> Self {
        Self {
            max_memory,
            peak_memory: 0,
            limit_exceeded: false,
        }
    }

    /// Whether the guest was refused memory or table growth.
    pub fn limit_exceeded(&self) -> bool {
        self.limit_exceeded
    }

    /// Highest memory size granted to the guest.
    pub fn peak_memory(&self) -> u64 {
        self.peak_memory
    }

    pub fn max_memory(&self) -> u64 {
        self.max_memory
    }
}

impl ResourceLimiter for SandboxLimiter {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        let desired = desired as u64;
        if desired > self.max_memory {
            self.limit_exceeded = true;
            return Ok(false);
        }
        self.peak_memory = self.peak_memory.max(desired);
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        if desired > MAX_TABLE_ELEMENTS {
            self.limit_exceeded = true;
            return Ok(false);
        }
        Ok(true)
    }
}

/// Per-store state: the limiter and the guest's WASI context.
pub struct GuestState {
    pub limiter: SandboxLimiter,
    pub wasi: WasiP1Ctx,
}

impl GuestState {
    pub fn new(max_memory: u64, wasi: WasiP1Ctx) -> Self {
        Self {
            limiter: SandboxLimiter::new(max_memory),
            wasi,
        }
    }
}

/// Wires the [`SandboxLimiter`] into a store.
pub trait StoreLimiterExt {
    fn configure_limiter(&mut self);
}

impl StoreLimiterExt for Store<GuestState> {
    fn configure_limiter(&mut self) {
        self.limiter(|state| &mut state.limiter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_within_limit_is_granted() {
        let mut limiter = SandboxLimiter::new(1024 * 1024);
        assert!(limiter.memory_growing(0, 512 * 1024, None).unwrap());
        assert!(!limiter.limit_exceeded());
        assert_eq!(limiter.peak_memory(), 512 * 1024);
    }

    #[test]
    fn growth_past_limit_is_refused_and_remembered() {
        let mut limiter = SandboxLimiter::new(1024 * 1024);
        assert!(!limiter.memory_growing(0, 2 * 1024 * 1024, None).unwrap());
        assert!(limiter.limit_exceeded());
        assert_eq!(limiter.peak_memory(), 0);
    }

    #[test]
    fn oversized_tables_are_refused() {
        let mut limiter = SandboxLimiter::new(1024);
        assert!(limiter.table_growing(0, 100, None).unwrap());
        assert!(!limiter.table_growing(100, MAX_TABLE_ELEMENTS + 1, None).unwrap());
        assert!(limiter.limit_exceeded());
    }
}
