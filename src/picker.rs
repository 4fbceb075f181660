//! Bridges asynchronous picker updates to per-call address selection.

use crate::address::Address;
use crate::balancer::{self, Outcome, SharedPicker};

use std::sync::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

#[derive(Error, Debug)]
pub enum Error {
    #[error(
        "Pick canceled{}",
        .last_pick_error
            .as_ref()
            .map(|err| format!(", latest balancer error: {err}"))
            .unwrap_or_default()
    )]
    Canceled {
        last_pick_error: Option<balancer::Error>,
    },

    #[error("Picker closed")]
    Closed,

    #[error(transparent)]
    Pick(#[from] balancer::Error),
}

struct Inner {
    picker: Option<SharedPicker>,

    // Bumped on every update, so callers can tell whether the picker they
    // already tried has been replaced.
    generation: u64,

    // Fired and replaced on every update. Callers which have no (new) picker
    // to use wait on this.
    gate: CancellationToken,

    closed: bool,
}

/// Holds the current picker for a connection.
///
/// Callers block in [PickerWrapper::pick] until a picker is installed with
/// [PickerWrapper::update_picker].
pub struct PickerWrapper {
    inner: Mutex<Inner>,
}

// What a caller should do on one pass through the pick loop.
enum Next {
    Pick(SharedPicker),
    Wait(CancellationToken),
}

impl Default for PickerWrapper {
    fn default() -> Self {
        Self::new()
    }
}

impl PickerWrapper {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                picker: None,
                generation: 0,
                gate: CancellationToken::new(),
                closed: false,
            }),
        }
    }

    /// Installs a new picker, waking every caller waiting for one.
    pub fn update_picker(&self, picker: SharedPicker) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            event!(Level::DEBUG, "Ignoring picker update after close");
            return;
        }
        inner.picker = Some(picker);
        inner.generation = inner.generation.wrapping_add(1);
        let gate = std::mem::replace(&mut inner.gate, CancellationToken::new());
        gate.cancel();
        event!(
            Level::DEBUG,
            generation = inner.generation,
            "Installed new picker"
        );
    }

    /// Unblocks all waiting callers, and fails all future picks.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        inner.picker = None;
        inner.gate.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    fn next(&self, tried: &mut Option<u64>) -> Result<Next, Error> {
        let inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(Error::Closed);
        }
        match &inner.picker {
            Some(picker) if *tried != Some(inner.generation) => {
                *tried = Some(inner.generation);
                Ok(Next::Pick(picker.clone()))
            }
            _ => Ok(Next::Wait(inner.gate.clone())),
        }
    }

    /// Picks an address for one call.
    ///
    /// Waits for a picker to be installed if none exists yet. If the picker
    /// fails, `fail_fast` callers get the error immediately; other callers
    /// wait for a newer picker and try again. Either way, cancelling `cancel`
    /// ends the wait.
    #[instrument(level = "trace", skip(self, cancel), err, name = "PickerWrapper::pick")]
    pub async fn pick(
        &self,
        cancel: &CancellationToken,
        fail_fast: bool,
    ) -> Result<Address, Error> {
        let mut last_pick_error = None;
        let mut tried = None;
        loop {
            let picker = match self.next(&mut tried)? {
                Next::Pick(picker) => picker,
                Next::Wait(gate) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(Error::Canceled { last_pick_error });
                        }
                        _ = gate.cancelled() => continue,
                    }
                }
            };

            match picker.pick() {
                Ok(result) => {
                    if let Some(feedback) = &result.feedback {
                        feedback.done(Outcome::Success);
                    }
                    return Ok(result.address);
                }
                Err(err) if fail_fast => return Err(err.into()),
                Err(err) => {
                    event!(Level::WARN, ?err, "Pick failed, waiting for a newer picker");
                    last_pick_error = Some(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::address::State;
    use crate::balancers::round_robin;
    use crate::test_utils::{CountingFeedback, FeedbackPicker};

    use std::sync::Arc;
    use std::time::Duration;

    fn picker_for(addrs: &[&str]) -> SharedPicker {
        round_robin::builder()
            .build()
            .update_state(State::new(addrs.iter().copied().map(Address::from)))
            .unwrap()
    }

    #[tokio::test]
    async fn pick_waits_for_first_picker() {
        let wrapper = Arc::new(PickerWrapper::new());
        let cancel = CancellationToken::new();

        let handle = tokio::task::spawn({
            let wrapper = wrapper.clone();
            let cancel = cancel.clone();
            async move { wrapper.pick(&cancel, false).await }
        });

        // The pick cannot complete without a picker.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        wrapper.update_picker(picker_for(&["10.0.0.1:80"]));
        let address = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("Pick should complete once a picker exists")
            .unwrap()
            .expect("Pick should succeed");
        assert_eq!(address.addr, "10.0.0.1:80");
    }

    #[tokio::test]
    async fn cancel_before_any_picker() {
        let wrapper = PickerWrapper::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = wrapper.pick(&cancel, false).await.unwrap_err();
        assert!(
            matches!(
                err,
                Error::Canceled {
                    last_pick_error: None
                }
            ),
            "{err:?}"
        );
        assert_eq!(err.to_string(), "Pick canceled");
    }

    #[tokio::test]
    async fn fail_fast_returns_picker_error() {
        let wrapper = PickerWrapper::new();
        wrapper.update_picker(picker_for(&[]));

        let err = wrapper
            .pick(&CancellationToken::new(), true)
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::Pick(balancer::Error::NoAddressAvailable)),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn non_fail_fast_waits_for_usable_picker() {
        let wrapper = Arc::new(PickerWrapper::new());
        wrapper.update_picker(picker_for(&[]));
        let cancel = CancellationToken::new();

        let handle = tokio::task::spawn({
            let wrapper = wrapper.clone();
            let cancel = cancel.clone();
            async move { wrapper.pick(&cancel, false).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        // Another empty picker doesn't help.
        wrapper.update_picker(picker_for(&[]));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        wrapper.update_picker(picker_for(&["10.0.0.2:80"]));
        let address = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("Pick should complete once addresses exist")
            .unwrap()
            .expect("Pick should succeed");
        assert_eq!(address.addr, "10.0.0.2:80");
    }

    #[tokio::test]
    async fn cancel_reports_last_pick_error() {
        let wrapper = PickerWrapper::new();
        wrapper.update_picker(picker_for(&[]));
        let cancel = CancellationToken::new();

        let canceller = tokio::task::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            }
        });

        let err = wrapper.pick(&cancel, false).await.unwrap_err();
        assert!(
            matches!(
                err,
                Error::Canceled {
                    last_pick_error: Some(balancer::Error::NoAddressAvailable)
                }
            ),
            "{err:?}"
        );
        assert_eq!(
            err.to_string(),
            "Pick canceled, latest balancer error: No address is available"
        );
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn every_waiter_wakes_on_update() {
        let wrapper = Arc::new(PickerWrapper::new());
        let cancel = CancellationToken::new();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let wrapper = wrapper.clone();
                let cancel = cancel.clone();
                tokio::task::spawn(async move { wrapper.pick(&cancel, false).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        wrapper.update_picker(picker_for(&["a:1", "b:1"]));

        let mut counts = std::collections::HashMap::new();
        for handle in handles {
            let address = tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("Every waiter should wake")
                .unwrap()
                .unwrap();
            *counts.entry(address.addr).or_insert(0) += 1;
        }
        assert_eq!(counts["a:1"], 8);
        assert_eq!(counts["b:1"], 8);
    }

    #[tokio::test]
    async fn waiters_see_the_latest_picker() {
        let wrapper = Arc::new(PickerWrapper::new());
        let cancel = CancellationToken::new();
        let handle = tokio::task::spawn({
            let wrapper = wrapper.clone();
            let cancel = cancel.clone();
            async move { wrapper.pick(&cancel, false).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Both updates land before the waiter gets to run again.
        wrapper.update_picker(picker_for(&["old:1"]));
        wrapper.update_picker(picker_for(&["new:1"]));

        let address = handle.await.unwrap().unwrap();
        assert_eq!(address.addr, "new:1");
    }

    #[tokio::test]
    async fn close_unblocks_waiters() {
        let wrapper = Arc::new(PickerWrapper::new());
        let cancel = CancellationToken::new();
        let handle = tokio::task::spawn({
            let wrapper = wrapper.clone();
            let cancel = cancel.clone();
            async move { wrapper.pick(&cancel, false).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        wrapper.close();
        let err = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("Close should unblock the waiter")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, Error::Closed), "{err:?}");

        // Later updates are ignored, and later picks fail.
        wrapper.update_picker(picker_for(&["a:1"]));
        assert!(wrapper.is_closed());
        assert!(matches!(
            wrapper.pick(&cancel, false).await,
            Err(Error::Closed)
        ));
    }

    #[tokio::test]
    async fn feedback_is_notified_of_success() {
        let wrapper = PickerWrapper::new();
        let feedback = Arc::new(CountingFeedback::default());
        wrapper.update_picker(Arc::new(FeedbackPicker::new(
            Address::new("a:1"),
            feedback.clone(),
        )));

        for _ in 0..3 {
            let address = wrapper
                .pick(&CancellationToken::new(), true)
                .await
                .unwrap();
            assert_eq!(address.addr, "a:1");
        }
        assert_eq!(feedback.successes(), 3);
        assert_eq!(feedback.failures(), 0);
    }
}
