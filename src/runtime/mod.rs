//! Cross-process JavaScript evaluation.
//!
//! The privileged side ([`App`], [`Browser`]) sends `EvalJavascript` requests
//! over an ordered channel to an isolated executor. Each executor owns a single
//! V8 isolate on a dedicated OS thread, evaluates the script and answers with
//! an `EvalJavascriptReturn` carrying the same task id and the encoded result.
//! [`App::step`] hands those replies to the host's [`HostCallbacks`].

pub mod browser;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod ffi;
pub mod handle;
pub mod message;
pub mod pending;
pub mod router;
pub mod value;

// Re-export key types for convenience
pub use browser::{App, AppRef, Browser, BrowserRef};
pub use codec::EvalResult;
pub use config::{BridgeConfig, ExecutorConfig};
pub use error::{BridgeError, EvalError, ProtocolError};
pub use handle::RefHandle;
pub use pending::PendingEvals;
pub use router::HostCallbacks;
pub use value::{TaggedValue, ValueTag};
