use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::error::RagError;

/// Runs `f` on a worker thread and stops waiting after `timeout`. The worker
/// is not cancelled; its late result is dropped.
pub(crate) fn call_with_timeout<T, F>(service: &str, timeout: Duration, f: F) -> Result<T, RagError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RagError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("rag-{}", service.replace(' ', "-")))
        .spawn(move || {
            let _ = tx.send(f());
        })?;
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(RagError::UpstreamTimeout {
            service: service.to_string(),
            message: format!("no response within {:?}", timeout),
        }),
        Err(RecvTimeoutError::Disconnected) => {
            Err(RagError::unavailable(service, "worker exited without a result"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_calls_surface_as_timeouts() {
        let err = call_with_timeout("slow thing", Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(300));
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, RagError::UpstreamTimeout { .. }));
    }

    #[test]
    fn fast_calls_pass_results_through() {
        let v = call_with_timeout("fast", Duration::from_secs(5), || Ok(7)).unwrap();
        assert_eq!(v, 7);
        let err = call_with_timeout::<(), _>("fast", Duration::from_secs(5), || {
            Err(RagError::IndexUnavailable)
        })
        .unwrap_err();
        assert!(matches!(err, RagError::IndexUnavailable));
    }
}
