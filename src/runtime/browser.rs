//! Privileged-side context: the [`App`] that owns browsers, and the
//! [`Browser`] that submits evaluation requests to its isolated executor.
//!
//! Nothing here blocks on an executor. Requests are queued on the channel and
//! replies are picked up by [`App::step`], which the host calls from its own
//! loop.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

use super::channel::{self, Endpoint};
use super::config::BridgeConfig;
use super::error::BridgeError;
use super::executor::{spawn_executor_thread, ExecutorHandle};
use super::handle::RefHandle;
use super::message::{EvalRequest, ExecuteRequest, ProcessMessage};
use super::router::{self, HostCallbacks};

pub type BrowserRef = RefHandle<Browser>;
pub type AppRef = RefHandle<App>;

/// One browser and the isolated executor serving it.
pub struct Browser {
    identifier: i32,
    default_source_url: String,
    endpoint: Mutex<Option<Endpoint>>,
    executor: Mutex<Option<ExecutorHandle>>,
}

impl Browser {
    pub(crate) fn spawn(identifier: i32, config: &BridgeConfig) -> Result<Self, BridgeError> {
        let (endpoint, renderer) = channel::pair();
        let mut executor_config = config.executor.clone();
        executor_config.thread_name = format!("{}-{}", executor_config.thread_name, identifier);
        let executor = spawn_executor_thread(executor_config, renderer)?;

        Ok(Self {
            identifier,
            default_source_url: config.default_source_url.clone(),
            endpoint: Mutex::new(Some(endpoint)),
            executor: Mutex::new(Some(executor)),
        })
    }

    /// A browser with no executor behind it, for exercising the router alone.
    #[cfg(test)]
    pub(crate) fn detached(identifier: i32) -> Self {
        Self {
            identifier,
            default_source_url: BridgeConfig::default().default_source_url,
            endpoint: Mutex::new(None),
            executor: Mutex::new(None),
        }
    }

    pub fn identifier(&self) -> i32 {
        self.identifier
    }

    /// Ask the executor to evaluate `script` and answer under `task_id`.
    ///
    /// Returns as soon as the request is queued. An empty `source_url` is
    /// replaced by the configured default.
    pub fn submit_eval(&self, task_id: u64, script: &str, source_url: &str) -> Result<(), BridgeError> {
        let source_url = if source_url.is_empty() {
            self.default_source_url.as_str()
        } else {
            source_url
        };
        self.submit(EvalRequest::new(task_id, script, source_url))
    }

    /// Queue a fully built request, e.g. one with a start line override.
    pub fn submit(&self, request: EvalRequest) -> Result<(), BridgeError> {
        trace!(browser = self.identifier, task_id = request.task_id, "submit eval");
        self.send(request.into_message())
    }

    /// Run `script` for its side effects. No response is ever sent.
    pub fn execute_javascript(&self, script: &str, source_url: &str, start_line: i32) -> Result<(), BridgeError> {
        let script_url = if source_url.is_empty() {
            self.default_source_url.clone()
        } else {
            source_url.to_owned()
        };
        self.send(
            ExecuteRequest {
                script: script.to_owned(),
                script_url,
                start_line,
            }
            .into_message(),
        )
    }

    fn send(&self, message: ProcessMessage) -> Result<(), BridgeError> {
        let endpoint = self.endpoint.lock().unwrap_or_else(PoisonError::into_inner);
        match endpoint.as_ref() {
            Some(endpoint) => endpoint.send(message),
            None => Err(BridgeError::BrowserClosed(self.identifier)),
        }
    }

    /// Take every message the executor has delivered so far.
    pub fn drain(&self) -> Vec<ProcessMessage> {
        let mut endpoint = self.endpoint.lock().unwrap_or_else(PoisonError::into_inner);
        let mut messages = Vec::new();
        if let Some(endpoint) = endpoint.as_mut() {
            while let Some(message) = endpoint.try_recv() {
                messages.push(message);
            }
        }
        messages
    }

    pub fn is_closed(&self) -> bool {
        self.endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Hang up on the executor and wait for its thread to finish.
    ///
    /// Undelivered replies are discarded. Closing twice is a no-op.
    pub fn close(&self) {
        let endpoint = self.endpoint.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(endpoint);

        let executor = self.executor.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(executor) = executor {
            executor.shutdown();
            debug!(browser = self.identifier, "browser closed");
        }
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        self.close();
    }
}

/// Explicit application context shared by every message handler.
pub struct App {
    config: BridgeConfig,
    callbacks: Box<dyn HostCallbacks + Send + Sync>,
    browsers: Mutex<BTreeMap<i32, Arc<Browser>>>,
    next_browser_id: AtomicI32,
}

impl App {
    pub fn new(config: BridgeConfig, callbacks: impl HostCallbacks + Send + Sync + 'static) -> Self {
        Self {
            config,
            callbacks: Box::new(callbacks),
            browsers: Mutex::new(BTreeMap::new()),
            next_browser_id: AtomicI32::new(1),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Start a browser with its own isolated executor.
    pub fn create_browser(&self) -> Result<Arc<Browser>, BridgeError> {
        let identifier = self.next_browser_id.fetch_add(1, Ordering::Relaxed);
        let browser = Arc::new(Browser::spawn(identifier, &self.config)?);
        self.lock_browsers().insert(identifier, Arc::clone(&browser));
        debug!(browser = identifier, "browser created");
        Ok(browser)
    }

    pub fn browser(&self, identifier: i32) -> Option<Arc<Browser>> {
        self.lock_browsers().get(&identifier).cloned()
    }

    pub fn browsers(&self) -> Vec<Arc<Browser>> {
        self.lock_browsers().values().cloned().collect()
    }

    /// Close a browser and forget it. Returns whether it was known.
    pub fn close_browser(&self, identifier: i32) -> bool {
        let removed = self.lock_browsers().remove(&identifier);
        match removed {
            Some(browser) => {
                browser.close();
                true
            }
            None => false,
        }
    }

    /// Route every reply delivered so far to the host callbacks.
    ///
    /// Returns the number of callbacks invoked. Browsers closed directly are
    /// forgotten here.
    pub fn step(&self) -> usize {
        self.lock_browsers().retain(|_, browser| !browser.is_closed());
        let mut handled = 0;
        for browser in self.browsers() {
            for message in browser.drain() {
                if router::route(self.callbacks.as_ref(), &browser, &message) {
                    handled += 1;
                }
            }
        }
        handled
    }

    /// Close every browser.
    pub fn shutdown(&self) {
        let browsers = std::mem::take(&mut *self.lock_browsers());
        for browser in browsers.into_values() {
            browser.close();
        }
    }

    fn lock_browsers(&self) -> std::sync::MutexGuard<'_, BTreeMap<i32, Arc<Browser>>> {
        self.browsers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}
