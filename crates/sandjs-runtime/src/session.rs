//! One run of guest code: session lifecycle, result unpacking, and the
//! top-level orchestration state machine.
//!
//! A [`Session`] aggregates the engine runtime, its context, the budget,
//! and the lifetime registry for one invocation. It is never reused: [`run`]
//! opens a fresh session, evaluates the main module, invokes its default
//! export, awaits the unpacked result, and tears everything down in reverse
//! acquisition order (parked handles, then context, then runtime).
//!
//! Only engine instantiation can fail hard. Guest exceptions, resolver
//! misses, resource-limit aborts, and cancellation are all absorbed into a
//! completed [`ExecutionResult`] with no value, observable through the run
//! log.

use std::sync::Arc;
use std::time::Duration;

use rquickjs::function::This;
use rquickjs::promise::PromiseState;
use rquickjs::{
    AsyncContext, AsyncRuntime, Ctx, Exception, Function, Module, Object, Persistent, Value,
};
use tokio::sync::mpsc;

use crate::bridge::{self, HostState, PromiseHooks, SettleValue, Settlement};
use crate::budget::{Budget, Limits};
use crate::cancel::CancelSignal;
use crate::error::InfraError;
use crate::lifetime::LifetimeRegistry;
use crate::logger::Logger;
use crate::resolver::{SourceLoader, SourceResolver};
use crate::source::SourceDir;

/// Outcome of a completed run. `value` is `None` for any script that did
/// not produce a JSON-representable value, including scripts that failed;
/// the distinction lives in the run log.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ExecutionResult {
    /// The unpacked return value of the default export, if any.
    pub value: Option<serde_json::Value>,
    /// Wall-clock time from session start to completion.
    pub duration: Duration,
    /// Interrupt checkpoints observed (approximate CPU measure).
    pub cycles: u64,
}

/// Per-run collaborators supplied by the caller.
#[derive(Clone)]
pub struct RunOptions {
    /// Sink for guest output and session diagnostics.
    pub logger: Arc<dyn Logger>,
    /// Shared cancellation signal for the whole run.
    pub cancel: CancelSignal,
    /// Resource ceilings.
    pub limits: Limits,
}

/// Execute `dir`'s main module in a fresh sandboxed session.
///
/// Returns `Err` only for host-infrastructure failures (engine
/// instantiation, pre-run cancellation); every guest-side failure yields
/// `Ok` with `value: None`.
pub async fn run(dir: &SourceDir, opts: RunOptions) -> Result<ExecutionResult, InfraError> {
    let mut session = Session::open(dir, &opts).await?;
    let value = session.execute(dir).await;
    let result = ExecutionResult {
        value,
        duration: session.budget.elapsed(),
        cycles: session.budget.cycles(),
    };
    session.dispose();
    Ok(result)
}

/// Outcome of inspecting an in-flight value inside the context.
enum Step {
    /// Settled to a usable non-promise value.
    Value(Persistent<Value<'static>>),
    /// Promise settled; re-inspect the unpacked result.
    Again(Persistent<Value<'static>>),
    /// Promise still pending; wait for a settlement event.
    Pending(Persistent<Value<'static>>),
    /// Failure or cancellation; already logged where warranted.
    Done,
}

/// Event that wakes the settle-await loop.
enum Wake {
    Settlement(Option<Settlement>),
    Cancelled,
    Deadline,
}

/// One run's aggregate of runtime, context, budget, and lifetime state.
///
/// Exclusively owned by a single [`run`] invocation.
pub struct Session {
    // Field order is teardown order: context drops before runtime. Parked
    // handles are released in dispose()/drop before either.
    context: AsyncContext,
    runtime: AsyncRuntime,
    lifetimes: LifetimeRegistry<PromiseHooks>,
    budget: Arc<Budget>,
    logger: Arc<dyn Logger>,
    cancel: CancelSignal,
    settle_rx: mpsc::UnboundedReceiver<Settlement>,
}

impl Session {
    /// Instantiate the engine and install the budget controller, module
    /// loader, and host bridge state. The only hard-failure point of a run.
    pub async fn open(dir: &SourceDir, opts: &RunOptions) -> Result<Self, InfraError> {
        if opts.cancel.is_cancelled() {
            return Err(InfraError::Cancelled);
        }

        let runtime = AsyncRuntime::new()?;
        runtime.set_memory_limit(opts.limits.memory_bytes).await;
        runtime.set_max_stack_size(opts.limits.stack_bytes).await;

        let budget = Arc::new(Budget::new(&opts.limits, opts.cancel.clone()));
        {
            let budget = Arc::clone(&budget);
            runtime
                .set_interrupt_handler(Some(Box::new(move || budget.on_interrupt())))
                .await;
        }

        let (settle_tx, settle_rx) = mpsc::unbounded_channel();
        let lifetimes = LifetimeRegistry::new();
        let host = HostState {
            logger: opts.logger.clone(),
            cancel: opts.cancel.clone(),
            lifetimes: lifetimes.clone(),
            settle_tx,
        };
        runtime
            .set_loader(SourceResolver::new(dir), SourceLoader::new(dir.clone(), host))
            .await;

        let context = AsyncContext::full(&runtime).await?;

        Ok(Self {
            context,
            runtime,
            lifetimes,
            budget,
            logger: opts.logger.clone(),
            cancel: opts.cancel.clone(),
            settle_rx,
        })
    }

    /// Drive the state machine to completion. Infallible by design: any
    /// failure or cancellation collapses to `None`.
    pub async fn execute(&mut self, dir: &SourceDir) -> Option<serde_json::Value> {
        let exports = self.eval_main(dir).await?;
        let main = self.read_default_export(exports).await?;
        let returned = self.call_main(main).await?;
        let settled = self.await_settled(returned).await?;
        self.finish(settled).await
    }

    /// Release every parked guest handle, then the context, then the
    /// runtime. Dropping the session does the same.
    pub fn dispose(self) {}

    /// Evaluate the main source as a module and wait for its evaluation
    /// promise, yielding the module namespace.
    async fn eval_main(&mut self, dir: &SourceDir) -> Option<Persistent<Object<'static>>> {
        let logger = self.logger.clone();
        let main_name = dir.main_name.clone();
        let main_source = dir.main_source.clone();
        let (exports, eval_promise) = self
            .context
            .with(move |ctx| {
                let evaluated = Module::declare(ctx.clone(), main_name, main_source)
                    .and_then(|declared| declared.eval());
                match evaluated {
                    Ok((module, promise)) => match module.namespace() {
                        Ok(ns) => Some((
                            Persistent::save(&ctx, ns),
                            Persistent::save(&ctx, promise.into_value()),
                        )),
                        Err(err) => {
                            log_guest_failure(&ctx, &logger, err);
                            None
                        }
                    },
                    Err(err) => {
                        log_guest_failure(&ctx, &logger, err);
                        None
                    }
                }
            })
            .await?;

        // The evaluation promise must settle before exports are usable.
        let _ = self.await_settled(eval_promise).await?;
        if self.cancel.is_cancelled() {
            return None;
        }
        Some(exports)
    }

    /// Read the callable `default` export from the module namespace,
    /// logging the exports for diagnostics.
    async fn read_default_export(
        &self,
        exports: Persistent<Object<'static>>,
    ) -> Option<Persistent<Function<'static>>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let logger = self.logger.clone();
        self.context
            .with(move |ctx| {
                let exports = exports.restore(&ctx).ok()?;
                logger.log(
                    "sys",
                    &format!(
                        "Main module exports: {}",
                        bridge::dump_value(&ctx, &exports.clone().into_value())
                    ),
                );
                let default = match exports.get::<_, Value>("default") {
                    Ok(value) => value,
                    Err(err) => {
                        log_guest_failure(&ctx, &logger, err);
                        return None;
                    }
                };
                let main = default.into_function()?;
                Some(Persistent::save(&ctx, main))
            })
            .await
    }

    /// Invoke the default export with the guest global as `this`.
    async fn call_main(
        &self,
        main: Persistent<Function<'static>>,
    ) -> Option<Persistent<Value<'static>>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let logger = self.logger.clone();
        let cancel = self.cancel.clone();
        self.context
            .with(move |ctx| {
                let main = main.restore(&ctx).ok()?;
                let returned = main.call::<_, Value>((This(ctx.globals()),));
                let value = unpack(&ctx, &logger, &cancel, returned)?;
                Some(Persistent::save(&ctx, value))
            })
            .await
    }

    /// Await a possibly-async value: pump the job queue, inspect promise
    /// state, and wait for host settlements until the value is settled and
    /// unpacked, the deadline passes, or the run is cancelled.
    async fn await_settled(
        &mut self,
        value: Persistent<Value<'static>>,
    ) -> Option<Persistent<Value<'static>>> {
        let deadline = tokio::time::Instant::now()
            + self.budget.deadline().saturating_sub(self.budget.elapsed());
        let mut current = value;
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            self.drain_jobs().await;

            let taken = current;
            let logger = self.logger.clone();
            let cancel = self.cancel.clone();
            let step = self
                .context
                .with(move |ctx| inspect(&ctx, &logger, &cancel, taken))
                .await;

            match step {
                Step::Done => return None,
                Step::Value(settled) => return Some(settled),
                Step::Again(next) => current = next,
                Step::Pending(next) => {
                    current = next;
                    let wake = {
                        let cancel = self.cancel.clone();
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => Wake::Cancelled,
                            _ = tokio::time::sleep_until(deadline) => Wake::Deadline,
                            settlement = self.settle_rx.recv() => Wake::Settlement(settlement),
                        }
                    };
                    match wake {
                        Wake::Cancelled => return None,
                        Wake::Deadline => {
                            self.logger
                                .log("sys", "Deadline exceeded awaiting pending promise");
                            return None;
                        }
                        Wake::Settlement(Some(settlement)) => {
                            self.apply_settlement(settlement).await;
                        }
                        // The loader keeps a sender for the session's whole
                        // life, so a closed channel means teardown already
                        // began.
                        Wake::Settlement(None) => return None,
                    }
                }
            }
        }
    }

    /// Settle a parked bridge promise on the VM thread, then pump the job
    /// queue so the guest observes the settlement.
    async fn apply_settlement(&self, settlement: Settlement) {
        let Some(hooks) = self.lifetimes.take(settlement.id) else {
            return;
        };
        self.context
            .with(move |ctx| {
                if let Err(err) = settle(&ctx, hooks, settlement.outcome) {
                    if matches!(err, rquickjs::Error::Exception) {
                        let _ = ctx.catch();
                    }
                    log::error!("failed settling guest promise: {err}");
                }
            })
            .await;
        self.drain_jobs().await;
    }

    /// Execute queued guest jobs until the queue is empty. Job exceptions
    /// are logged and do not stop the pump.
    async fn drain_jobs(&self) {
        loop {
            match self.runtime.execute_pending_job().await {
                Ok(true) => {}
                Ok(false) => return,
                Err(err) => self.logger.log("sys", &format!("JS job error: {err}")),
            }
        }
    }

    /// Dump the settled value to a host-representable JSON value.
    async fn finish(&self, value: Persistent<Value<'static>>) -> Option<serde_json::Value> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.context
            .with(move |ctx| {
                let value = value.restore(&ctx).ok()?;
                to_json(&ctx, &value)
            })
            .await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Parked handles reference the guest heap and must be released
        // while the runtime is still alive.
        drop(self.lifetimes.dispose());
    }
}

/// Inspect a restored value: plain values pass through, settled promises
/// are unpacked for re-inspection, pending promises are parked again.
fn inspect<'js>(
    ctx: &Ctx<'js>,
    logger: &Arc<dyn Logger>,
    cancel: &CancelSignal,
    value: Persistent<Value<'static>>,
) -> Step {
    let Ok(value) = value.restore(ctx) else {
        return Step::Done;
    };
    if cancel.is_cancelled() {
        return Step::Done;
    }
    let Some(promise) = value.as_promise() else {
        return Step::Value(Persistent::save(ctx, value));
    };
    match promise.state() {
        PromiseState::Pending => Step::Pending(Persistent::save(ctx, value)),
        _ => {
            let result = promise
                .result::<Value>()
                .unwrap_or(Err(rquickjs::Error::Unknown));
            match unpack(ctx, logger, cancel, result) {
                Some(settled) => Step::Again(Persistent::save(ctx, settled)),
                None => Step::Done,
            }
        }
    }
}

/// The result unpacking protocol: failures are dumped, logged, and become
/// "no value"; successes are checked against cancellation before use.
fn unpack<'js>(
    ctx: &Ctx<'js>,
    logger: &Arc<dyn Logger>,
    cancel: &CancelSignal,
    result: rquickjs::Result<Value<'js>>,
) -> Option<Value<'js>> {
    match result {
        Err(err) => {
            log_guest_failure(ctx, logger, err);
            None
        }
        Ok(value) => {
            if cancel.is_cancelled() {
                return None;
            }
            Some(value)
        }
    }
}

/// Dump a guest-level failure to the run log. Pending exceptions are
/// consumed so they cannot leak into the next guest call.
fn log_guest_failure(ctx: &Ctx<'_>, logger: &Arc<dyn Logger>, err: rquickjs::Error) {
    if matches!(err, rquickjs::Error::Exception) {
        let exception = ctx.catch();
        let text = exception
            .as_exception()
            .map(|exc| {
                let message = exc.message().unwrap_or_default();
                match exc.stack() {
                    Some(stack) if !stack.is_empty() => format!("{message}\n{stack}"),
                    _ => message,
                }
            })
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| bridge::dump_value(ctx, &exception));
        logger.log("sys", &format!("JS error: {text}"));
    } else {
        logger.log("sys", &format!("JS error: {err}"));
    }
}

/// Call the parked resolve/reject hooks for a settlement outcome.
fn settle(
    ctx: &Ctx<'_>,
    hooks: PromiseHooks,
    outcome: Result<SettleValue, String>,
) -> rquickjs::Result<()> {
    let resolve = hooks.resolve.restore(ctx)?;
    let reject = hooks.reject.restore(ctx)?;
    match outcome {
        Ok(SettleValue::Undefined) => resolve.call::<_, ()>((rquickjs::Undefined,)),
        Ok(SettleValue::Text(text)) => resolve.call::<_, ()>((text,)),
        Err(message) => {
            let error = Exception::from_message(ctx.clone(), &message)?;
            reject.call::<_, ()>((error,))
        }
    }
}

/// JSON-serialize a guest value on the host. `undefined` (and anything JSON
/// cannot represent at the top level) maps to `None`.
fn to_json<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Option<serde_json::Value> {
    if value.is_undefined() {
        return None;
    }
    let text = ctx.json_stringify(value.clone()).ok()??.to_string().ok()?;
    serde_json::from_str(&text).ok()
}
