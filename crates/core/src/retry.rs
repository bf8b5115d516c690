//! Bounded exponential backoff around a single backend call.

use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use colloquy_model::ErrorKind;
use tokio::time::sleep;

use crate::Error;
use crate::config::RetryOptions;

// With a multiplier of 2, any randomization factor up to 1/3 keeps the
// lowest next delay above the highest current one.
const MAX_JITTER: f64 = 1.0 / 3.0;

/// Runs `call` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is used up.
///
/// `state` is handed to every attempt. When the attempts are used up by
/// rate limiting, `on_persistent_rate_limit` may update the state (e.g.
/// switch to a cheaper model) and return `true` to allow one final
/// attempt.
///
/// Delays between attempts never decrease. Dropping the returned future
/// cancels the call or the pending delay.
pub async fn with_retry<S, T, F, Fut, H>(
    options: &RetryOptions,
    state: &mut S,
    mut call: F,
    mut on_persistent_rate_limit: H,
) -> Result<T, Error>
where
    F: FnMut(&S) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
    H: FnMut(&mut S, &Error) -> bool,
{
    let max_attempts = options.max_attempts.max(1);
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(options.base_delay())
        .with_max_interval(options.max_delay())
        .with_multiplier(2.0)
        .with_randomization_factor(options.jitter.clamp(0.0, MAX_JITTER))
        .with_max_elapsed_time(None)
        .build();
    let mut last_delay = Duration::ZERO;

    let mut attempt = 1;
    loop {
        let err = match call(state).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_retryable() {
            debug!("not retrying: {err}");
            return Err(err);
        }
        if attempt >= max_attempts {
            if err.kind() == Some(ErrorKind::RateLimitExceeded)
                && on_persistent_rate_limit(state, &err)
            {
                info!("making a final attempt after {attempt} failures");
                return call(state).await;
            }
            return Err(err);
        }

        // Randomized delays near the cap may come out lower than the
        // previous one.
        let delay = backoff
            .next_backoff()
            .unwrap_or_else(|| options.max_delay())
            .max(last_delay);
        last_delay = delay;
        warn!(attempt, max_attempts, "retrying in {delay:?}: {err}");
        sleep(delay).await;
        attempt += 1;
    }
}

/// A hook for [`with_retry`] that never falls back.
#[inline]
pub fn no_fallback<S>(_state: &mut S, _err: &Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use std::future::ready;

    use tokio::time::Instant;

    use super::*;

    fn options(max_attempts: u32) -> RetryOptions {
        RetryOptions {
            max_attempts,
            ..Default::default()
        }
    }

    fn rate_limited() -> Error {
        Error::model(ErrorKind::RateLimitExceeded, "quota exceeded")
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_decreasing_delays() {
        for k in 0..5 {
            let mut calls = vec![];
            let result = with_retry(
                &options(5),
                &mut (),
                |_| {
                    calls.push(Instant::now());
                    if calls.len() <= k {
                        ready(Err(rate_limited()))
                    } else {
                        ready(Ok(42))
                    }
                },
                no_fallback,
            )
            .await;

            assert_eq!(result.unwrap(), 42);
            assert_eq!(calls.len(), k + 1);
            let delays: Vec<_> =
                calls.windows(2).map(|w| w[1] - w[0]).collect();
            assert_eq!(delays.len(), k);
            for pair in delays.windows(2) {
                assert!(pair[0] <= pair[1], "delays decreased: {delays:?}");
            }
            if let Some(first) = delays.first() {
                assert!(*first >= Duration::from_millis(666));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error() {
        let mut calls = 0;
        let err = with_retry(
            &options(5),
            &mut (),
            |_| {
                calls += 1;
                ready(Err::<(), _>(Error::model(
                    ErrorKind::Authentication,
                    "bad key",
                )))
            },
            no_fallback,
        )
        .await
        .unwrap_err();
        assert_eq!(calls, 1);
        assert_eq!(err.kind(), Some(ErrorKind::Authentication));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_after_persistent_rate_limit() {
        let mut model = "gemini-2.5-pro".to_owned();
        let mut calls = vec![];
        let result = with_retry(
            &options(3),
            &mut model,
            |model| {
                calls.push(model.clone());
                if model == "gemini-2.5-flash" {
                    ready(Ok("done"))
                } else {
                    ready(Err(rate_limited()))
                }
            },
            |model, _| {
                *model = "gemini-2.5-flash".to_owned();
                true
            },
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, vec![
            "gemini-2.5-pro",
            "gemini-2.5-pro",
            "gemini-2.5-pro",
            "gemini-2.5-flash"
        ]);
        assert_eq!(model, "gemini-2.5-flash");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_exhaustion_skips_fallback() {
        let mut hook_called = false;
        let mut calls = 0;
        let err = with_retry(
            &options(2),
            &mut (),
            |_| {
                calls += 1;
                ready(Err::<(), _>(Error::model(ErrorKind::Transport, "reset")))
            },
            |_, _| {
                hook_called = true;
                true
            },
        )
        .await
        .unwrap_err();
        assert_eq!(calls, 2);
        assert!(!hook_called);
        assert_eq!(err.kind(), Some(ErrorKind::Transport));
    }
}
