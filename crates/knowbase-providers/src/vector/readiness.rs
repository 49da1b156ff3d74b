//! Collection load-readiness polling.

use knowbase_core::error::{KnowbaseError, Result};
use std::future::Future;
use std::time::Duration;

/// Remote load state of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    Failed(String),
}

impl LoadState {
    /// Parse the service's load state string (`LoadStateLoaded`, `Loaded`, ...).
    pub fn from_remote(raw: &str) -> Self {
        let state = raw.trim().trim_start_matches("LoadState");
        match state.to_ascii_lowercase().as_str() {
            "loaded" => Self::Loaded,
            "loading" => Self::Loading,
            "notload" | "notloaded" | "unloaded" | "notexist" | "" => Self::Unloaded,
            _ => Self::Failed(raw.to_string()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

/// Probe until the collection reports `Loaded`.
///
/// Returns the number of probes used. `Failed` aborts immediately; running out
/// of attempts yields `KnowbaseError::Timeout`.
pub async fn poll_until_loaded<F, Fut>(policy: PollPolicy, what: &str, mut probe: F) -> Result<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<LoadState>>,
{
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match probe().await? {
            LoadState::Loaded => {
                tracing::debug!("✅ {what} loaded after {attempt} poll(s)");
                return Ok(attempt);
            }
            LoadState::Failed(reason) => {
                return Err(KnowbaseError::Backend(format!("{what} failed to load: {reason}")));
            }
            state => {
                tracing::debug!("⏳ {what} is {state:?} ({attempt}/{max_attempts})");
                if attempt < max_attempts {
                    tokio::time::sleep(policy.interval).await;
                }
            }
        }
    }
    Err(KnowbaseError::Timeout {
        attempts: max_attempts,
        context: format!("waiting for {what} to load"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> PollPolicy {
        PollPolicy { interval: Duration::from_millis(1), max_attempts }
    }

    #[test]
    fn test_parse_remote_states() {
        assert_eq!(LoadState::from_remote("LoadStateLoaded"), LoadState::Loaded);
        assert_eq!(LoadState::from_remote("Loading"), LoadState::Loading);
        assert_eq!(LoadState::from_remote("LoadStateNotLoad"), LoadState::Unloaded);
        assert!(matches!(LoadState::from_remote("Exploded"), LoadState::Failed(_)));
    }

    #[tokio::test]
    async fn test_loading_five_times_then_loaded() {
        let calls = AtomicU32::new(0);
        let used = poll_until_loaded(fast(30), "collection kb", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(if n <= 5 { LoadState::Loading } else { LoadState::Loaded }) }
        })
        .await
        .unwrap();
        assert_eq!(used, 6);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_never_loaded_times_out() {
        let calls = AtomicU32::new(0);
        let err = poll_until_loaded(fast(4), "collection kb", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(LoadState::Loading) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, KnowbaseError::Timeout { attempts: 4, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failed_state_aborts() {
        let err = poll_until_loaded(fast(10), "collection kb", || async {
            Ok(LoadState::Failed("LoadStateBroken".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, KnowbaseError::Backend(_)));
    }
}
