//! Browser-side routing of executor replies to the host.
//!
//! Routing is decode-and-dispatch only. Matching a task id to whoever is
//! waiting for it is the host's job (see [`super::pending::PendingEvals`]).

use std::sync::Arc;
use tracing::{debug, trace};

use super::browser::Browser;
use super::codec::EvalResult;
use super::message::{EvalResponse, ProcessMessage, EVAL_JAVASCRIPT_RETURN};

/// Callbacks the embedding host supplies to receive results.
pub trait HostCallbacks {
    /// Called once per evaluation response, in arrival order.
    fn on_javascript(&self, browser: &Arc<Browser>, task_id: u64, result: EvalResult);
}

impl<T: HostCallbacks + ?Sized> HostCallbacks for Arc<T> {
    fn on_javascript(&self, browser: &Arc<Browser>, task_id: u64, result: EvalResult) {
        (**self).on_javascript(browser, task_id, result)
    }
}

/// Dispatch one message received from `browser`'s executor.
///
/// Returns whether a callback was invoked. Malformed or unknown messages are
/// logged and dropped.
pub fn route(callbacks: &dyn HostCallbacks, browser: &Arc<Browser>, message: &ProcessMessage) -> bool {
    match message.name() {
        EVAL_JAVASCRIPT_RETURN => match EvalResponse::from_message(message) {
            Ok(EvalResponse { task_id, result }) => {
                match &result {
                    EvalResult::Success(value) => {
                        trace!(browser = browser.identifier(), task_id, value = %value.to_json(), "dispatching eval response")
                    }
                    EvalResult::Failure(detail) => {
                        trace!(browser = browser.identifier(), task_id, ?detail, "dispatching failed eval response")
                    }
                }
                callbacks.on_javascript(browser, task_id, result);
                true
            }
            Err(err) => {
                debug!(browser = browser.identifier(), %err, "dropping malformed eval response");
                false
            }
        },
        other => {
            debug!(browser = browser.identifier(), name = other, "ignoring unknown process message");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::TaggedValue;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(i32, u64, EvalResult)>>,
    }

    impl HostCallbacks for Recorder {
        fn on_javascript(&self, browser: &Arc<Browser>, task_id: u64, result: EvalResult) {
            self.calls
                .lock()
                .unwrap()
                .push((browser.identifier(), task_id, result));
        }
    }

    #[test]
    fn test_route_dispatches_decoded_response() {
        let browser = Arc::new(Browser::detached(3));
        let recorder = Recorder::default();
        let result = EvalResult::Success(TaggedValue::String("ab".into()));
        let message = EvalResponse::reply(&7u64.to_ne_bytes(), &result);

        assert!(route(&recorder, &browser, &message));
        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[(3, 7, result)]);
    }

    #[test]
    fn test_route_drops_malformed_and_unknown() {
        let browser = Arc::new(Browser::detached(1));
        let recorder = Recorder::default();

        let truncated = ProcessMessage::new(EVAL_JAVASCRIPT_RETURN)
            .with_binary(1u64.to_ne_bytes())
            .with_binary(vec![1u8]);
        assert!(!route(&recorder, &browser, &truncated));

        let missing = ProcessMessage::new(EVAL_JAVASCRIPT_RETURN).with_binary(1u64.to_ne_bytes());
        assert!(!route(&recorder, &browser, &missing));

        assert!(!route(&recorder, &browser, &ProcessMessage::new("TitleChanged")));
        assert!(recorder.calls.lock().unwrap().is_empty());
    }
}
