//! Host-side correlation of task ids with awaiting futures.
//!
//! `PendingEvals` allocates task ids and implements [`HostCallbacks`], so an
//! [`App`](super::browser::App) built with it completes each future as replies
//! are routed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{trace, warn};

use super::browser::Browser;
use super::codec::EvalResult;
use super::config::BridgeConfig;
use super::error::EvalError;
use super::router::HostCallbacks;
use super::value::TaggedValue;

pub struct PendingEvals {
    next_task_id: AtomicU64,
    waiting: Mutex<HashMap<u64, oneshot::Sender<EvalResult>>>,
    timeout: Option<Duration>,
}

impl PendingEvals {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            next_task_id: AtomicU64::new(1),
            waiting: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.eval_timeout)
    }

    /// Reserve a fresh task id and the receiver its result will arrive on.
    pub fn create_task(&self) -> (u64, oneshot::Receiver<EvalResult>) {
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock().insert(task_id, tx);
        (task_id, rx)
    }

    /// Forget `task_id`. A reply arriving later is discarded.
    pub fn cancel(&self, task_id: u64) -> bool {
        self.lock().remove(&task_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Hand `result` to whoever awaits `task_id`. Returns false if nobody does.
    pub fn complete(&self, task_id: u64, result: EvalResult) -> bool {
        let Some(tx) = self.lock().remove(&task_id) else {
            warn!(task_id, "response for unknown task id");
            return false;
        };
        // the receiver may have been dropped after a timeout raced us
        tx.send(result).is_ok()
    }

    /// Submit `script` to `browser` and wait for its value.
    ///
    /// The reply only arrives while the host keeps calling
    /// [`App::step`](super::browser::App::step).
    pub async fn eval(&self, browser: &Browser, script: &str) -> Result<TaggedValue, EvalError> {
        let (task_id, rx) = self.create_task();
        if let Err(err) = browser.submit_eval(task_id, script, "") {
            self.cancel(task_id);
            return Err(err.into());
        }
        trace!(task_id, browser = browser.identifier(), "awaiting eval");

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.cancel(task_id);
                    return Err(EvalError::Timeout(limit));
                }
            },
            None => rx.await,
        };

        match result {
            Ok(EvalResult::Success(value)) => Ok(value),
            Ok(EvalResult::Failure(detail)) => Err(EvalError::Failed(detail)),
            Err(_) => Err(EvalError::Dropped),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<EvalResult>>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HostCallbacks for PendingEvals {
    fn on_javascript(&self, _browser: &Arc<Browser>, task_id: u64, result: EvalResult) {
        self.complete(task_id, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::browser::App;
    use crate::runtime::error::BridgeError;

    async fn pump(app: &App) {
        loop {
            app.step();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn app_with(timeout: Option<Duration>) -> (App, Arc<PendingEvals>) {
        let pending = Arc::new(PendingEvals::new(timeout));
        let app = App::new(BridgeConfig::default(), Arc::clone(&pending));
        (app, pending)
    }

    #[tokio::test]
    async fn test_eval_resolves_while_pumped() {
        let (app, pending) = app_with(Some(Duration::from_secs(10)));
        let browser = app.create_browser().unwrap();

        let value = tokio::select! {
            value = pending.eval(&browser, "6 * 7") => value,
            _ = pump(&app) => unreachable!(),
        };
        assert_eq!(value.unwrap(), TaggedValue::Int(42));

        let failed = tokio::select! {
            value = pending.eval(&browser, "throw new Error('boom')") => value,
            _ = pump(&app) => unreachable!(),
        };
        match failed {
            Err(EvalError::Failed(Some(detail))) => assert!(detail.contains("boom"), "{}", detail),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(pending.is_empty());
        app.shutdown();
    }

    #[tokio::test]
    async fn test_eval_times_out_without_pump() {
        let (app, pending) = app_with(Some(Duration::from_millis(50)));
        let browser = app.create_browser().unwrap();

        let result = pending.eval(&browser, "1").await;
        assert!(matches!(result, Err(EvalError::Timeout(_))));
        assert!(pending.is_empty());

        // the late reply finds nobody waiting
        let mut late = 0;
        for _ in 0..1000 {
            late += browser.drain().len();
            if late > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(late, 1);
        assert!(!pending.complete(1, EvalResult::Success(TaggedValue::Int(1))));
        app.shutdown();
    }

    #[tokio::test]
    async fn test_many_concurrent_evals() {
        let (app, pending) = app_with(Some(Duration::from_secs(10)));
        let browser = app.create_browser().unwrap();

        let evals = (0..16).map(|i| {
            let pending = Arc::clone(&pending);
            let browser = Arc::clone(&browser);
            async move { pending.eval(&browser, &format!("{} * 2", i)).await }
        });
        let results = tokio::select! {
            results = futures::future::join_all(evals) => results,
            _ = pump(&app) => unreachable!(),
        };

        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), TaggedValue::Int(i as i32 * 2));
        }
        assert!(pending.is_empty());
        app.shutdown();
    }

    #[tokio::test]
    async fn test_eval_on_closed_browser() {
        let (app, pending) = app_with(None);
        let browser = app.create_browser().unwrap();
        app.close_browser(browser.identifier());

        let result = pending.eval(&browser, "1").await;
        assert!(matches!(
            result,
            Err(EvalError::Submit(BridgeError::BrowserClosed(_)))
        ));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_complete_and_cancel() {
        let pending = PendingEvals::new(None);
        let (first, mut rx) = pending.create_task();
        let (second, _rx) = pending.create_task();
        assert_ne!(first, second);
        assert_eq!(pending.len(), 2);

        assert!(pending.complete(first, EvalResult::Failure(None)));
        assert_eq!(rx.try_recv().unwrap(), EvalResult::Failure(None));
        assert!(!pending.complete(first, EvalResult::Failure(None)));

        assert!(pending.cancel(second));
        assert!(!pending.cancel(second));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_dropped_receiver_is_not_completed() {
        let pending = PendingEvals::new(None);
        let (task_id, rx) = pending.create_task();
        drop(rx);
        assert!(!pending.complete(task_id, EvalResult::Failure(None)));
    }
}
