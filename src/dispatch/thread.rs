use std::sync::atomic::{AtomicU64, Ordering};

/// Next token handed out to a thread. Zero is reserved for "no thread".
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Process-unique token of the current thread.
    ///
    /// Stored in an atomic by the context that this thread drives, so the
    /// context can tell whether `invoke` is being called from its own loop.
    static THREAD_TOKEN: u64 = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
}

/// Returns the token of the calling thread. Never zero.
pub(crate) fn current_token() -> u64 {
    THREAD_TOKEN.with(|token| *token)
}
