//! evalbridge
//!
//! Evaluate JavaScript in an isolated executor and receive typed results back
//! through host callbacks. The crate builds as a C library (see
//! [`runtime::ffi`]) and as a regular Rust library.

pub mod logging;
pub mod runtime;

pub use runtime::{
    App, Browser, BridgeConfig, BridgeError, EvalError, EvalResult, ExecutorConfig,
    HostCallbacks, PendingEvals, TaggedValue,
};
