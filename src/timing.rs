//! Wall-clock measurement of async operations.

use std::future::Future;
use std::time::Instant;

/// Run `op` to completion and return how long it took, in seconds, together with its output.
///
/// The clock starts when the future is first polled, so time spent before the call
/// is not counted. Errors inside the output are passed through untouched.
pub async fn timed<F, Fut, T>(op: F) -> (f64, T)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let start = Instant::now();
    let output = op().await;
    (start.elapsed().as_secs_f64(), output)
}
