use crate::Result;
use crate::session::Session;

pub const DEFAULT_TIMEOUT_MS: u64 = 4_000;
pub const DEFAULT_INTERVAL_MS: u64 = 50;

/// Retry window shared by the query engine, the assertion engine, and
/// network waits. The attempt budget is `timeout / interval`, evaluated
/// against logical session ticks, so runs never depend on wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub timeout_ms: u64,
    pub interval_ms: u64,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

impl PollOptions {
    pub fn new(timeout_ms: u64, interval_ms: u64) -> Self {
        Self {
            timeout_ms,
            interval_ms,
        }
    }

    pub(crate) fn attempts(&self) -> u64 {
        (self.timeout_ms / self.interval_ms.max(1)).max(1)
    }
}

pub(crate) enum Poll<T> {
    Ready(T),
    /// Not there yet; carries the last observed state for diagnostics.
    Pending(String),
}

/// Re-evaluates `probe` until it is ready or the attempt budget runs out.
/// Between attempts the session ticks: pending network completions are
/// delivered and an unfrozen clock steps. Hard probe errors propagate
/// immediately; exhaustion yields the last observed state.
pub(crate) fn poll_until<T>(
    session: &mut Session,
    opts: PollOptions,
    mut probe: impl FnMut(&mut Session) -> Result<Poll<T>>,
) -> Result<std::result::Result<T, String>> {
    let mut last_observed = String::from("<never evaluated>");
    for attempt in 0..opts.attempts() {
        if attempt > 0 {
            session.tick()?;
        }
        match probe(session)? {
            Poll::Ready(value) => return Ok(Ok(value)),
            Poll::Pending(observed) => last_observed = observed,
        }
    }
    Ok(Err(last_observed))
}
