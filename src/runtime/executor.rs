//! Isolated script executor backed by `deno_core::JsRuntime`.
//!
//! Each executor owns one V8 isolate on a dedicated OS thread with a
//! single-threaded Tokio runtime. It answers `EvalJavascript` requests arriving
//! on its [`Endpoint`] one at a time and exits once the browser side hangs up.
//! The executor keeps no per-request state: the task id blob is echoed back
//! untouched.

use deno_core::{v8, JsRuntime, RuntimeOptions};
use std::sync::mpsc::Receiver as StdReceiver;
use std::sync::mpsc::Sender as StdSender;
use std::thread::JoinHandle;
use tracing::{debug, trace, warn};

use super::channel::Endpoint;
use super::codec::EvalResult;
use super::config::ExecutorConfig;
use super::error::BridgeError;
use super::message::{
    EvalRequest, EvalResponse, ExecuteRequest, ProcessMessage, EVAL_JAVASCRIPT,
    EXECUTE_JAVASCRIPT,
};
use super::value::{ScriptValue, TaggedValue};

type InitSignalChannel = (
    StdSender<Result<v8::IsolateHandle, String>>,
    StdReceiver<Result<v8::IsolateHandle, String>>,
);

/// Owner-side view of a running executor thread.
pub struct ExecutorHandle {
    thread: JoinHandle<()>,
    isolate: v8::IsolateHandle,
}

impl ExecutorHandle {
    /// Abort any script still running and wait for the thread to exit.
    ///
    /// The browser endpoint must be dropped first, otherwise the executor keeps
    /// waiting for requests.
    pub fn shutdown(self) {
        self.isolate.terminate_execution();
        if self.thread.join().is_err() {
            warn!("executor thread panicked");
        }
    }
}

/// Start an executor thread serving `endpoint`.
///
/// Returns once the isolate is ready, or with the initialization error.
pub fn spawn_executor_thread(
    config: ExecutorConfig,
    endpoint: Endpoint,
) -> Result<ExecutorHandle, BridgeError> {
    config.validate()?;
    let (init_tx, init_rx): InitSignalChannel = std::sync::mpsc::channel();

    let thread = std::thread::Builder::new()
        .name(config.thread_name.clone())
        .spawn(move || {
            let tokio_rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(err) => {
                    let _ = init_tx.send(Err(format!("failed to build tokio runtime: {}", err)));
                    return;
                }
            };

            let mut executor = match ScriptExecutor::new(config) {
                Ok(mut executor) => {
                    let isolate = executor.js_runtime.v8_isolate().thread_safe_handle();
                    let _ = init_tx.send(Ok(isolate));
                    executor
                }
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };

            tokio_rt.block_on(executor.run(endpoint));
        })?;

    match init_rx.recv() {
        Ok(Ok(isolate)) => Ok(ExecutorHandle { thread, isolate }),
        Ok(Err(err)) => {
            let _ = thread.join();
            Err(BridgeError::RuntimeInit(err))
        }
        Err(_) => Err(BridgeError::RuntimeInit(
            "executor thread exited during initialization".to_string(),
        )),
    }
}

struct ScriptExecutor {
    js_runtime: JsRuntime,
}

impl ScriptExecutor {
    fn new(config: ExecutorConfig) -> Result<Self, String> {
        let ExecutorConfig {
            max_heap_size,
            initial_heap_size,
            bootstrap_script,
            ..
        } = config;

        let create_params = match (max_heap_size, initial_heap_size) {
            (Some(max), initial) => {
                let initial_bytes = initial.unwrap_or(0);
                Some(v8::CreateParams::default().heap_limits(initial_bytes, max))
            }
            (None, _) => None,
        };

        let mut js_runtime = JsRuntime::new(RuntimeOptions {
            create_params,
            ..Default::default()
        });

        if let Some(script) = bootstrap_script {
            js_runtime
                .execute_script("<bootstrap>", script)
                .map_err(|err| err.to_string())?;
        }

        Ok(Self { js_runtime })
    }

    async fn run(&mut self, mut endpoint: Endpoint) {
        while let Some(message) = endpoint.recv().await {
            if let Err(err) = self.on_process_message(&endpoint, &message) {
                match err {
                    BridgeError::Protocol(err) => {
                        debug!(name = %message.name(), %err, "dropping malformed process message")
                    }
                    err => debug!(%err, "failed to answer process message"),
                }
            }
        }
        debug!("browser endpoint closed, executor exiting");
    }

    fn on_process_message(
        &mut self,
        endpoint: &Endpoint,
        message: &ProcessMessage,
    ) -> Result<(), BridgeError> {
        match message.name() {
            EVAL_JAVASCRIPT => {
                let request = EvalRequest::from_message(message)?;
                let task_blob = message.binary(0)?;
                trace!(task_id = request.task_id, url = %request.script_url, "evaluating script");

                let result =
                    self.evaluate(&request.script, &request.script_url, request.start_line);
                if let EvalResult::Failure(detail) = &result {
                    debug!(task_id = request.task_id, ?detail, "script evaluation failed");
                }
                endpoint.send(EvalResponse::reply(task_blob, &result))
            }
            EXECUTE_JAVASCRIPT => {
                let request = ExecuteRequest::from_message(message)?;
                if let EvalResult::Failure(detail) =
                    self.evaluate(&request.script, &request.script_url, request.start_line)
                {
                    warn!(url = %request.script_url, ?detail, "executed script threw");
                }
                Ok(())
            }
            other => {
                debug!(name = other, "ignoring unknown process message");
                Ok(())
            }
        }
    }

    /// Compile and run `script` in the isolate's main context.
    ///
    /// `script_url` and `start_line` only show up in stack traces.
    fn evaluate(&mut self, script: &str, script_url: &str, start_line: i32) -> EvalResult {
        let scope = &mut self.js_runtime.handle_scope();
        let scope = &mut v8::TryCatch::new(scope);

        let (Some(source), Some(name)) = (
            v8::String::new(scope, script),
            v8::String::new(scope, script_url),
        ) else {
            return EvalResult::Failure(Some("failed to allocate script source".to_string()));
        };

        let origin = v8::ScriptOrigin::new(
            scope,
            name.into(),
            start_line,
            0,
            false,
            0,
            None,
            false,
            false,
            false,
            None,
        );

        let completion = v8::Script::compile(scope, source, Some(&origin))
            .and_then(|compiled| compiled.run(scope));

        // the runtime uses an explicit microtask policy, so reaction jobs
        // queued by the script only run here
        match completion {
            Some(value) => {
                scope.perform_microtask_checkpoint();
                EvalResult::Success(TaggedValue::classify(&mut V8Value { scope, value }))
            }
            None => {
                let detail = exception_text(scope);
                scope.perform_microtask_checkpoint();
                EvalResult::Failure(detail)
            }
        }
    }
}

fn exception_text(scope: &mut v8::TryCatch<v8::HandleScope>) -> Option<String> {
    let exception = scope.exception()?;
    let text = exception.to_string(scope)?;
    Some(text.to_rust_string_lossy(scope))
}

/// A V8 value paired with the scope needed to read its payload.
struct V8Value<'a, 's> {
    scope: &'a mut v8::HandleScope<'s>,
    value: v8::Local<'s, v8::Value>,
}

impl ScriptValue for V8Value<'_, '_> {
    fn is_array(&self) -> bool {
        self.value.is_array()
    }

    fn is_array_buffer(&self) -> bool {
        self.value.is_array_buffer()
    }

    fn is_bool(&self) -> bool {
        self.value.is_boolean()
    }

    fn is_date(&self) -> bool {
        self.value.is_date()
    }

    fn is_double(&self) -> bool {
        self.value.is_number() && !self.value.is_int32() && !self.value.is_uint32()
    }

    fn is_function(&self) -> bool {
        self.value.is_function()
    }

    fn is_int(&self) -> bool {
        self.value.is_int32()
    }

    fn is_null(&self) -> bool {
        self.value.is_null()
    }

    fn is_object(&self) -> bool {
        self.value.is_object()
    }

    fn is_string(&self) -> bool {
        self.value.is_string()
    }

    fn is_uint(&self) -> bool {
        self.value.is_uint32() && !self.value.is_int32()
    }

    fn is_undefined(&self) -> bool {
        self.value.is_undefined()
    }

    fn bool_value(&mut self) -> bool {
        self.value.boolean_value(self.scope)
    }

    fn double_value(&mut self) -> f64 {
        self.value.number_value(self.scope).unwrap_or(f64::NAN)
    }

    fn int_value(&mut self) -> i32 {
        self.value.int32_value(self.scope).unwrap_or_default()
    }

    fn uint_value(&mut self) -> u32 {
        self.value.uint32_value(self.scope).unwrap_or_default()
    }

    fn string_value(&mut self) -> String {
        self.value
            .to_string(self.scope)
            .map(|s| s.to_rust_string_lossy(self.scope))
            .unwrap_or_default()
    }
}
