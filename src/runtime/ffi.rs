//! C ABI for the embedding host.
//!
//! Every object handed out is a [`RefHandle`] holding one reference, which the
//! host returns through the matching `*_release` function. Functions returning
//! `c_int` use 0 for success and -1 for failure; failures are logged.

use std::borrow::Cow;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::browser::{App, AppRef, Browser, BrowserRef};
use super::codec::EvalResult;
use super::config::BridgeConfig;
use super::error::BridgeError;
use super::handle::RefHandle;
use super::router::HostCallbacks;
use super::value::{TaggedValue, ValueTag};

const OK: c_int = 0;
const ERR: c_int = -1;

/// Borrowed UTF-8 bytes. Valid only for the duration of the call that
/// receives it.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct FfiString {
    pub ptr: *const c_char,
    pub len: usize,
}

impl FfiString {
    fn borrow(text: &str) -> Self {
        Self {
            ptr: text.as_ptr().cast(),
            len: text.len(),
        }
    }

    fn null() -> Self {
        Self {
            ptr: ptr::null(),
            len: 0,
        }
    }

    /// # Safety
    ///
    /// `ptr` must be null or point at `len` readable bytes.
    pub unsafe fn to_string_lossy(&self) -> Option<Cow<'_, str>> {
        if self.ptr.is_null() {
            return None;
        }
        let bytes = std::slice::from_raw_parts(self.ptr.cast::<u8>(), self.len);
        Some(String::from_utf8_lossy(bytes))
    }
}

/// A tagged value laid out for C. Only the field matching `tag` is meaningful.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct FfiValue {
    pub tag: ValueTag,
    pub bool_: bool,
    pub double_: f64,
    pub int_: i32,
    pub uint: u32,
    pub string: FfiString,
}

impl FfiValue {
    fn borrow(value: &TaggedValue) -> Self {
        let mut out = Self {
            tag: value.tag(),
            bool_: false,
            double_: 0.0,
            int_: 0,
            uint: 0,
            string: FfiString::null(),
        };
        match value {
            TaggedValue::Bool(b) => out.bool_ = *b,
            TaggedValue::Double(d) => out.double_ = *d,
            TaggedValue::Int(i) => out.int_ = *i,
            TaggedValue::UInt(u) => out.uint = *u,
            TaggedValue::String(s) => out.string = FfiString::borrow(s),
            _ => {}
        }
        out
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct FfiEvalResponse {
    pub success: bool,
    /// Set when `success` is true.
    pub result: FfiValue,
    /// Exception text when `success` is false; null if none was captured.
    pub error: FfiString,
}

impl FfiEvalResponse {
    fn borrow(result: &EvalResult) -> Self {
        match result {
            EvalResult::Success(value) => Self {
                success: true,
                result: FfiValue::borrow(value),
                error: FfiString::null(),
            },
            EvalResult::Failure(detail) => Self {
                success: false,
                result: FfiValue::borrow(&TaggedValue::Unknown),
                error: detail.as_deref().map_or_else(FfiString::null, FfiString::borrow),
            },
        }
    }
}

/// Receives one evaluation response. The browser handle must be released.
pub type OnJavascriptCallback = extern "C" fn(browser: BrowserRef, task_id: u64, response: FfiEvalResponse);

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct Callbacks {
    pub on_javascript: Option<OnJavascriptCallback>,
}

struct FfiHost {
    callbacks: Callbacks,
}

impl HostCallbacks for FfiHost {
    fn on_javascript(&self, browser: &Arc<Browser>, task_id: u64, result: EvalResult) {
        match self.callbacks.on_javascript {
            Some(callback) => callback(RefHandle::wrap(browser), task_id, FfiEvalResponse::borrow(&result)),
            None => debug!(task_id, "no on_javascript callback registered"),
        }
    }
}

unsafe fn c_str<'a>(ptr: *const c_char) -> Option<Cow<'a, str>> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy())
    }
}

fn to_code(result: Result<(), BridgeError>) -> c_int {
    match result {
        Ok(()) => OK,
        Err(err) => {
            warn!(%err, "bridge call failed");
            ERR
        }
    }
}

/// Create the application context. `config_json` may be null.
///
/// Returns a null handle if the configuration is invalid.
///
/// # Safety
///
/// `config_json` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn evalbridge_app_create(callbacks: Callbacks, config_json: *const c_char) -> AppRef {
    let config = match c_str(config_json) {
        Some(json) => match BridgeConfig::from_json(&json) {
            Ok(config) => config,
            Err(err) => {
                error!(%err, "rejecting bridge configuration");
                return RefHandle::null();
            }
        },
        None => BridgeConfig::default(),
    };
    let app = Arc::new(App::new(config, FfiHost { callbacks }));
    RefHandle::wrap(&app)
}

/// # Safety
///
/// `app` must be null or a live app handle pointer.
#[no_mangle]
pub unsafe extern "C" fn evalbridge_app_add_ref(app: *const App) -> AppRef {
    RefHandle::from_raw(app)
}

/// # Safety
///
/// `app` must not be used after its last release.
#[no_mangle]
pub unsafe extern "C" fn evalbridge_app_release(app: AppRef) -> c_int {
    if app.is_null() {
        return ERR;
    }
    app.release();
    OK
}

/// Route pending responses. Returns the number of callbacks made, or -1.
///
/// The app stays alive until the step returns, even if a callback releases
/// the host's last handle to it.
///
/// # Safety
///
/// `app` must be null or a live app handle pointer.
#[no_mangle]
pub unsafe extern "C" fn evalbridge_step(app: *const App) -> c_int {
    let app = RefHandle::from_raw(app);
    let handled = match app.get() {
        Some(app) => c_int::try_from(app.step()).unwrap_or(c_int::MAX),
        None => ERR,
    };
    app.release();
    handled
}

/// # Safety
///
/// `app` must be null or a live app handle pointer.
#[no_mangle]
pub unsafe extern "C" fn evalbridge_shutdown(app: *const App) -> c_int {
    match app.as_ref() {
        Some(app) => {
            app.shutdown();
            OK
        }
        None => ERR,
    }
}

/// # Safety
///
/// `app` must be null or a live app handle pointer.
#[no_mangle]
pub unsafe extern "C" fn evalbridge_create_browser(app: *const App) -> BrowserRef {
    let Some(app) = app.as_ref() else {
        return RefHandle::null();
    };
    match app.create_browser() {
        Ok(browser) => RefHandle::wrap(&browser),
        Err(err) => {
            error!(%err, "failed to create browser");
            RefHandle::null()
        }
    }
}

/// # Safety
///
/// `browser` must be null or a live browser handle pointer.
#[no_mangle]
pub unsafe extern "C" fn evalbridge_browser_add_ref(browser: *const Browser) -> BrowserRef {
    RefHandle::from_raw(browser)
}

/// # Safety
///
/// `browser` must not be used after its last release.
#[no_mangle]
pub unsafe extern "C" fn evalbridge_browser_release(browser: BrowserRef) -> c_int {
    if browser.is_null() {
        return ERR;
    }
    browser.release();
    OK
}

/// # Safety
///
/// `browser` must be null or a live browser handle pointer.
#[no_mangle]
pub unsafe extern "C" fn evalbridge_browser_get_identifier(browser: *const Browser) -> c_int {
    browser.as_ref().map_or(ERR, Browser::identifier)
}

/// Queue `script` for evaluation; the result arrives through `on_javascript`
/// under `task_id`. `source_url` may be null.
///
/// # Safety
///
/// `browser` must be null or a live browser handle pointer; `script` and
/// `source_url` must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn evalbridge_browser_eval_javascript(
    browser: *const Browser,
    task_id: u64,
    script: *const c_char,
    source_url: *const c_char,
) -> c_int {
    let (Some(browser), Some(script)) = (browser.as_ref(), c_str(script)) else {
        return ERR;
    };
    let source_url = c_str(source_url).unwrap_or_default();
    to_code(browser.submit_eval(task_id, &script, &source_url))
}

/// # Safety
///
/// Same as [`evalbridge_browser_eval_javascript`].
#[no_mangle]
pub unsafe extern "C" fn evalbridge_browser_execute_javascript(
    browser: *const Browser,
    script: *const c_char,
    source_url: *const c_char,
    start_line: c_int,
) -> c_int {
    let (Some(browser), Some(script)) = (browser.as_ref(), c_str(script)) else {
        return ERR;
    };
    let source_url = c_str(source_url).unwrap_or_default();
    to_code(browser.execute_javascript(&script, &source_url, start_line))
}

/// Stop the browser's executor. Its handles stay valid until released.
///
/// # Safety
///
/// `browser` must be null or a live browser handle pointer.
#[no_mangle]
pub unsafe extern "C" fn evalbridge_browser_close(browser: *const Browser) -> c_int {
    match browser.as_ref() {
        Some(browser) => {
            browser.close();
            OK
        }
        None => ERR,
    }
}

#[no_mangle]
pub extern "C" fn evalbridge_init_logging(debug: bool) {
    crate::logging::init(debug);
}

/// # Safety
///
/// `message` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn evalbridge_log_debug(message: *const c_char) {
    if let Some(message) = c_str(message) {
        debug!(target: "evalbridge::host", "{}", message);
    }
}

/// # Safety
///
/// `message` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn evalbridge_log_warn(message: *const c_char) {
    if let Some(message) = c_str(message) {
        warn!(target: "evalbridge::host", "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    struct Recorded {
        identifier: c_int,
        task_id: u64,
        success: bool,
        tag: ValueTag,
        int_: i32,
        text: Option<String>,
        error: Option<String>,
    }

    static RECORDED: Mutex<Vec<Recorded>> = Mutex::new(Vec::new());

    extern "C" fn record(browser: BrowserRef, task_id: u64, response: FfiEvalResponse) {
        unsafe {
            RECORDED.lock().unwrap().push(Recorded {
                identifier: evalbridge_browser_get_identifier(browser.as_ptr()),
                task_id,
                success: response.success,
                tag: response.result.tag,
                int_: response.result.int_,
                text: response.result.string.to_string_lossy().map(Cow::into_owned),
                error: response.error.to_string_lossy().map(Cow::into_owned),
            });
            assert_eq!(evalbridge_browser_release(browser), OK);
        }
    }

    fn take_recorded(task_id: u64) -> Option<Recorded> {
        let mut recorded = RECORDED.lock().unwrap();
        let index = recorded.iter().position(|r| r.task_id == task_id)?;
        Some(recorded.remove(index))
    }

    unsafe fn step_until(app: *const App, task_ids: &[u64]) {
        for _ in 0..5000 {
            evalbridge_step(app);
            let recorded = RECORDED.lock().unwrap();
            if task_ids
                .iter()
                .all(|id| recorded.iter().any(|r| r.task_id == *id))
            {
                return;
            }
            drop(recorded);
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("responses never arrived");
    }

    #[test]
    fn test_eval_through_c_abi() {
        let callbacks = Callbacks {
            on_javascript: Some(record),
        };
        unsafe {
            let app = evalbridge_app_create(callbacks, ptr::null());
            assert!(!app.is_null());
            let browser = evalbridge_create_browser(app.as_ptr());
            assert!(!browser.is_null());
            let identifier = evalbridge_browser_get_identifier(browser.as_ptr());

            let int_script = CString::new("1+1").unwrap();
            let string_script = CString::new("'a'+'b'").unwrap();
            let throw_script = CString::new("throw new Error('x')").unwrap();
            let setup_script = CString::new("globalThis.fromHost = 5;").unwrap();
            let read_script = CString::new("fromHost").unwrap();
            let url = CString::new("test://ffi").unwrap();
            assert_eq!(
                evalbridge_browser_execute_javascript(browser.as_ptr(), setup_script.as_ptr(), ptr::null(), 0),
                OK
            );
            assert_eq!(
                evalbridge_browser_execute_javascript(browser.as_ptr(), ptr::null(), url.as_ptr(), 0),
                ERR
            );
            for (task_id, script) in [(9042, &int_script), (9007, &string_script), (9001, &throw_script), (9005, &read_script)] {
                assert_eq!(
                    evalbridge_browser_eval_javascript(browser.as_ptr(), task_id, script.as_ptr(), url.as_ptr()),
                    OK
                );
            }
            step_until(app.as_ptr(), &[9042, 9007, 9001, 9005]);

            let int = take_recorded(9042).unwrap();
            assert_eq!(int.identifier, identifier);
            assert!(int.success);
            assert_eq!(int.tag, ValueTag::Int);
            assert_eq!(int.int_, 2);

            let string = take_recorded(9007).unwrap();
            assert_eq!(string.tag, ValueTag::String);
            assert_eq!(string.text.as_deref(), Some("ab"));

            let from_host = take_recorded(9005).unwrap();
            assert!(from_host.success);
            assert_eq!(from_host.tag, ValueTag::Int);
            assert_eq!(from_host.int_, 5);

            let thrown = take_recorded(9001).unwrap();
            assert!(!thrown.success);
            assert!(thrown.error.unwrap().contains('x'));

            assert_eq!(evalbridge_browser_close(browser.as_ptr()), OK);
            assert_eq!(
                evalbridge_browser_eval_javascript(browser.as_ptr(), 1, int_script.as_ptr(), ptr::null()),
                ERR
            );
            assert_eq!(evalbridge_browser_release(browser), OK);
            assert_eq!(evalbridge_shutdown(app.as_ptr()), OK);
            assert_eq!(evalbridge_app_release(app), OK);
        }
    }

    struct HostApp(AppRef);

    // handed over to the callback thread only through the mutex
    unsafe impl Send for HostApp {}

    static APP_TO_RELEASE: Mutex<Option<HostApp>> = Mutex::new(None);
    static RELEASED_IN_CALLBACK: AtomicBool = AtomicBool::new(false);

    extern "C" fn release_app_on_reply(browser: BrowserRef, _task_id: u64, _response: FfiEvalResponse) {
        unsafe {
            if let Some(HostApp(app)) = APP_TO_RELEASE.lock().unwrap().take() {
                assert_eq!(evalbridge_app_release(app), OK);
            }
            assert_eq!(evalbridge_browser_release(browser), OK);
        }
        RELEASED_IN_CALLBACK.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_step_survives_last_app_release_in_callback() {
        let callbacks = Callbacks {
            on_javascript: Some(release_app_on_reply),
        };
        unsafe {
            let app = evalbridge_app_create(callbacks, ptr::null());
            let app_ptr = app.as_ptr();
            let browser = evalbridge_create_browser(app_ptr);
            let script = CString::new("1").unwrap();
            assert_eq!(
                evalbridge_browser_eval_javascript(browser.as_ptr(), 1, script.as_ptr(), ptr::null()),
                OK
            );
            // the host gives up its only app handle inside the callback
            *APP_TO_RELEASE.lock().unwrap() = Some(HostApp(app));

            let mut handled = 0;
            for _ in 0..5000 {
                handled = evalbridge_step(app_ptr);
                if RELEASED_IN_CALLBACK.load(Ordering::SeqCst) {
                    break;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            assert_eq!(handled, 1);

            // dropping the app closed the browser
            let owned = browser.to_arc().unwrap();
            assert!(owned.is_closed());
            drop(owned);
            assert_eq!(evalbridge_browser_release(browser), OK);
        }
    }

    #[test]
    fn test_handles_count_references() {
        unsafe {
            let app = evalbridge_app_create(Callbacks::default(), ptr::null());
            let extra = evalbridge_app_add_ref(app.as_ptr());
            let owned = app.to_arc().unwrap();
            assert_eq!(Arc::strong_count(&owned), 3);

            assert_eq!(evalbridge_app_release(extra), OK);
            assert_eq!(evalbridge_app_release(app), OK);
            assert_eq!(Arc::strong_count(&owned), 1);
        }
    }

    #[test]
    fn test_null_arguments_are_rejected() {
        unsafe {
            assert_eq!(evalbridge_step(ptr::null()), ERR);
            assert_eq!(evalbridge_shutdown(ptr::null()), ERR);
            assert!(evalbridge_create_browser(ptr::null()).is_null());
            assert_eq!(evalbridge_browser_get_identifier(ptr::null()), ERR);
            assert_eq!(evalbridge_browser_close(ptr::null()), ERR);
            assert_eq!(
                evalbridge_browser_eval_javascript(ptr::null(), 1, ptr::null(), ptr::null()),
                ERR
            );
            assert_eq!(evalbridge_app_release(RefHandle::null()), ERR);
            assert_eq!(evalbridge_browser_release(RefHandle::null()), ERR);
            evalbridge_log_debug(ptr::null());
        }
    }

    #[test]
    fn test_app_create_rejects_bad_config() {
        let bad = CString::new(r#"{"executor": {"initial_heap_size": 1}}"#).unwrap();
        let good = CString::new(r#"{"eval_timeout": 100}"#).unwrap();
        unsafe {
            assert!(evalbridge_app_create(Callbacks::default(), bad.as_ptr()).is_null());
            let app = evalbridge_app_create(Callbacks::default(), good.as_ptr());
            assert_eq!(
                app.get().unwrap().config().eval_timeout,
                Some(Duration::from_millis(100))
            );
            evalbridge_app_release(app);
        }
    }

    #[test]
    fn test_response_borrows_payload() {
        let result = EvalResult::Success(TaggedValue::String("héllo".to_string()));
        let response = FfiEvalResponse::borrow(&result);
        assert!(response.success);
        assert_eq!(response.result.tag, ValueTag::String);
        assert_eq!(
            unsafe { response.result.string.to_string_lossy() }.as_deref(),
            Some("héllo")
        );

        let response = FfiEvalResponse::borrow(&EvalResult::Failure(None));
        assert!(!response.success);
        assert!(unsafe { response.error.to_string_lossy() }.is_none());
    }
}
