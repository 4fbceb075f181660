//! Helpers for joining background tasks which have been told to stop

use tokio::task::{JoinError, JoinHandle};

pub(crate) fn propagate_panics(result: Result<(), JoinError>) {
    match result {
        // Success or cancellation: Quietly return
        Ok(()) => (),
        Err(err) if err.is_cancelled() => (),
        // Propagate panics
        Err(err) if err.is_panic() => {
            std::panic::panic_any(err.into_panic());
        }
        Err(err) => {
            panic!("Unexpected join error (other than panic or cancellation): {err}");
        }
    }
}

/// Waits for every task in `handles`, leaving it empty.
///
/// Joining an already-drained set is a no-op, so this can be called more
/// than once.
pub(crate) async fn join_all(handles: &mut Vec<JoinHandle<()>>) {
    for handle in handles.drain(..) {
        propagate_panics(handle.await);
    }
}
