use crate::cleanup::CancellationToken;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

/// Result of a bounded poll. Non-ready outcomes carry the last pending value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T, P> {
    Ready(T),
    TimedOut(Option<P>),
    Cancelled(Option<P>),
}

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Call `probe` every `interval` until it breaks, `timeout` elapses, or
/// `token` is cancelled. Sleeps are sliced so cancellation is noticed quickly.
/// One last probe runs at the deadline.
pub fn poll_until<T, P>(
    interval: Duration,
    timeout: Duration,
    token: &CancellationToken,
    mut probe: impl FnMut() -> ControlFlow<T, P>,
) -> PollOutcome<T, P> {
    let deadline = Instant::now() + timeout;
    let mut last = None;
    loop {
        if token.is_cancelled() {
            return PollOutcome::Cancelled(last);
        }
        match probe() {
            ControlFlow::Break(done) => return PollOutcome::Ready(done),
            ControlFlow::Continue(pending) => last = Some(pending),
        }

        let now = Instant::now();
        if now >= deadline {
            return PollOutcome::TimedOut(last);
        }
        let wake = (now + interval).min(deadline);
        loop {
            let left = wake.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            if token.is_cancelled() {
                return PollOutcome::Cancelled(last);
            }
            std::thread::sleep(SLEEP_SLICE.min(left));
        }
    }
}
