//! Host capabilities exposed to guest code.
//!
//! The bridge is a single guest object with three functions: `log`,
//! `sleep`, and `sha256hex`. The async ones look synchronous to the guest:
//! they hand back a guest promise whose resolve/reject functions are parked
//! in the lifetime registry, while a host task performs the real work and
//! reports back through the settlement channel. The session applies each
//! settlement on the VM thread and then pumps the pending-job queue; the
//! guest performs no I/O of its own, so a promise settled from the host is
//! invisible until the queue runs.
//!
//! When the cancellation signal fires while an operation is pending, the
//! guest promise is abandoned (never settled); its parked handles are
//! dropped at session teardown.

use std::sync::Arc;
use std::time::Duration;

use rquickjs::convert::Coerced;
use rquickjs::function::{Func, Rest};
use rquickjs::{Ctx, Exception, FromJs, Function, Object, Persistent, Promise, Value};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::cancel::CancelSignal;
use crate::lifetime::LifetimeRegistry;
use crate::logger::Logger;

/// Name the bridge object is bound to in the guest global scope.
pub(crate) const HOST_GLOBAL: &str = "sandbox";

/// Body of the synthetic host-capability module.
pub(crate) const HOST_MODULE_SOURCE: &str = "export default sandbox;";

/// Resolve/reject pair for one pending bridge promise, detached from the
/// guest call frame that created it.
pub(crate) struct PromiseHooks {
    pub resolve: Persistent<Function<'static>>,
    pub reject: Persistent<Function<'static>>,
}

/// Host-side value a settlement resolves with.
#[derive(Debug)]
pub(crate) enum SettleValue {
    Undefined,
    Text(String),
}

/// Completion message from a bridge task to the session loop.
#[derive(Debug)]
pub(crate) struct Settlement {
    pub id: u64,
    pub outcome: Result<SettleValue, String>,
}

/// Shared collaborators the bridge functions close over.
#[derive(Clone)]
pub(crate) struct HostState {
    pub logger: Arc<dyn Logger>,
    pub cancel: CancelSignal,
    pub lifetimes: LifetimeRegistry<PromiseHooks>,
    pub settle_tx: mpsc::UnboundedSender<Settlement>,
}

enum HostOp {
    Sleep(f64),
    Sha256(String),
}

/// Build the bridge object and bind it into the guest global scope.
pub(crate) fn install<'js>(ctx: &Ctx<'js>, state: &HostState) -> rquickjs::Result<()> {
    let bridge = Object::new(ctx.clone())?;

    let logger = state.logger.clone();
    bridge.set(
        "log",
        Func::from(move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<()> {
            let parts = args
                .0
                .iter()
                .map(|v| dump_value(&ctx, v))
                .collect::<Vec<_>>();
            logger.log("qjs", &parts.join(" "));
            Ok(())
        }),
    )?;

    let sleep_state = state.clone();
    bridge.set(
        "sleep",
        Func::from(move |ctx: Ctx<'js>, ms: Value<'js>| -> rquickjs::Result<Value<'js>> {
            let Some(ms) = ms.as_number() else {
                return Err(Exception::throw_type(
                    &ctx,
                    "Must provide sleep with a number of milliseconds",
                ));
            };
            host_promise(&ctx, &sleep_state, HostOp::Sleep(ms))
        }),
    )?;

    let hash_state = state.clone();
    bridge.set(
        "sha256hex",
        Func::from(move |ctx: Ctx<'js>, s: Value<'js>| -> rquickjs::Result<Value<'js>> {
            let Some(s) = s.as_string() else {
                return Err(Exception::throw_type(&ctx, "Cannot hash a non-string"));
            };
            let text = s.to_string()?;
            host_promise(&ctx, &hash_state, HostOp::Sha256(text))
        }),
    )?;

    ctx.globals().set(HOST_GLOBAL, bridge)
}

/// Create a guest promise for a host-side operation: park its hooks in the
/// lifetime registry, spawn the host task, and return the promise handle to
/// the guest caller.
fn host_promise<'js>(
    ctx: &Ctx<'js>,
    state: &HostState,
    op: HostOp,
) -> rquickjs::Result<Value<'js>> {
    let (promise, resolve, reject) = Promise::new(ctx)?;
    let hooks = PromiseHooks {
        resolve: Persistent::save(ctx, resolve),
        reject: Persistent::save(ctx, reject),
    };
    let Some(id) = state.lifetimes.register(hooks) else {
        return Err(Exception::throw_message(ctx, "session is shutting down"));
    };

    let tx = state.settle_tx.clone();
    let cancel = state.cancel.clone();
    tokio::spawn(async move {
        let outcome = match op {
            HostOp::Sleep(ms) => {
                let wait = Duration::from_millis(ms.max(0.0) as u64);
                tokio::select! {
                    // Abandon the guest promise; teardown disposes the hooks.
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(wait) => Ok(SettleValue::Undefined),
                }
            }
            HostOp::Sha256(text) => {
                let digest = tokio::task::spawn_blocking(move || {
                    let mut hasher = Sha256::new();
                    hasher.update(text.as_bytes());
                    hex::encode(hasher.finalize())
                })
                .await;
                if cancel.is_cancelled() {
                    return;
                }
                match digest {
                    Ok(hexdigest) => Ok(SettleValue::Text(hexdigest)),
                    Err(err) => Err(format!("Failed hashing: {err}")),
                }
            }
        };
        // Receiver is gone once the session loop ends; nothing to settle.
        let _ = tx.send(Settlement { id, outcome });
    });

    Ok(promise.into_value())
}

/// Render a guest value as a host string: primitives by string conversion,
/// everything else through JSON with two-space indentation.
pub(crate) fn dump_value<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> String {
    if value.is_undefined() {
        return "undefined".to_string();
    }
    if value.is_null() {
        return "null".to_string();
    }
    if let Some(s) = value.as_string() {
        return s.to_string().unwrap_or_else(|_| "[string]".to_string());
    }
    if let Some(b) = value.as_bool() {
        return b.to_string();
    }
    if let Some(i) = value.as_int() {
        return i.to_string();
    }
    if let Some(f) = value.as_float() {
        return f.to_string();
    }
    if value.as_big_int().is_some() {
        // JSON cannot carry bigints; render the decimal digits directly.
        return Coerced::<String>::from_js(ctx, value.clone())
            .map(|text| text.0)
            .unwrap_or_else(|_| "[bigint]".to_string());
    }
    if value.is_symbol() {
        return "[symbol]".to_string();
    }
    match ctx.json_stringify_replacer_space(value.clone(), rquickjs::Undefined, "  ") {
        Ok(Some(text)) => text
            .to_string()
            .unwrap_or_else(|_| "[unprintable]".to_string()),
        Ok(None) => "undefined".to_string(),
        Err(_) => "[unprintable]".to_string(),
    }
}
