use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock};

use anyhow::anyhow;
use futures::FutureExt;
use futures::executor::ThreadPool;
use futures::future::BoxFuture;
use repose_state::panic::panic_message;

use crate::action::{Action, ActionDispatchStatus, ActionRef, ActionType};
use crate::bus::{ActionBus, ActionEvent};
use crate::cancel::CancelToken;
use crate::error::{DispatchFault, DispatchOutcome, HandlerFault};
use crate::handler::{InvokeCx, Invocation};
use crate::registry::{HandlerDescriptor, HandlerRegistry};

#[derive(Clone, Debug)]
pub struct DispatcherOptions {
    /// Threads used to finish dispatches whose handlers suspend.
    pub workers: usize,
    pub thread_name_prefix: String,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            thread_name_prefix: "repose-dispatch-".into(),
        }
    }
}

struct DispatcherInner {
    registry: Arc<HandlerRegistry>,
    bus: ActionBus,
    options: DispatcherOptions,
    pool: OnceLock<Option<ThreadPool>>,
}

/// Routes actions to their handlers and reports each dispatch's lifecycle
/// on the [`ActionBus`].
#[derive(Clone)]
pub struct ActionDispatcher {
    inner: Arc<DispatcherInner>,
}

impl ActionDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, bus: ActionBus) -> Self {
        Self::with_options(registry, bus, DispatcherOptions::default())
    }

    pub fn with_options(registry: Arc<HandlerRegistry>, bus: ActionBus, options: DispatcherOptions) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry,
                bus,
                options,
                pool: OnceLock::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    pub fn bus(&self) -> &ActionBus {
        &self.inner.bus
    }

    /// Fire-and-forget dispatch.
    ///
    /// Synchronous handlers run on the calling thread. If a handler suspends,
    /// it and everything after it finish on a worker thread and the outcome
    /// is only visible through the bus.
    pub fn dispatch<A: Action>(&self, action: A) {
        self.dispatch_with(action, CancelToken::none())
    }

    pub fn dispatch_with<A: Action>(&self, action: A, token: CancelToken) {
        let mut run = Run::begin(self.clone(), Arc::new(action), ActionType::of::<A>(), token);
        match run.step() {
            None => {
                run.finish();
            }
            Some(pending) => {
                log::debug!("{} suspended, continuing on a worker", run.ty);
                self.spawn(run.drive(Some(pending)).map(|_| ()).boxed());
            }
        }
    }

    /// Dispatches and resolves once the outcome has been published.
    pub async fn dispatch_async<A: Action>(&self, action: A, token: CancelToken) -> DispatchOutcome {
        let mut run = Run::begin(self.clone(), Arc::new(action), ActionType::of::<A>(), token);
        let pending = run.step();
        run.drive(pending).await
    }

    fn spawn(&self, fut: BoxFuture<'static, ()>) {
        let pool = self.inner.pool.get_or_init(|| {
            let opts = &self.inner.options;
            ThreadPool::builder()
                .pool_size(opts.workers.max(1))
                .name_prefix(opts.thread_name_prefix.clone())
                .create()
                .inspect_err(|e| log::error!("dispatch worker pool unavailable: {e}"))
                .ok()
        });
        match pool {
            Some(pool) => pool.spawn_ok(fut),
            None => {
                std::thread::spawn(move || pollster::block_on(fut));
            }
        }
    }
}

impl fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("registry", &self.inner.registry)
            .field("bus", &self.inner.bus)
            .finish()
    }
}

type Suspended = (usize, BoxFuture<'static, anyhow::Result<()>>);

/// State of one dispatch while its handlers run.
struct Run {
    dispatcher: ActionDispatcher,
    action: ActionRef,
    ty: ActionType,
    token: CancelToken,
    handlers: Arc<[HandlerDescriptor]>,
    next: usize,
    faults: Vec<HandlerFault>,
    finished: bool,
}

impl Run {
    fn begin(dispatcher: ActionDispatcher, action: ActionRef, ty: ActionType, token: CancelToken) -> Self {
        let handlers = dispatcher.inner.registry.resolve(ty.id());
        log::debug!("dispatching {ty} to {} handler(s)", handlers.len());
        let run = Self {
            dispatcher,
            action,
            ty,
            token,
            handlers,
            next: 0,
            faults: Vec::new(),
            finished: false,
        };
        run.publish(ActionDispatchStatus::Pending, None);
        run
    }

    /// Runs handlers on the current thread until one suspends, all are done,
    /// or the token is canceled.
    fn step(&mut self) -> Option<Suspended> {
        while self.next < self.handlers.len() {
            if self.token.is_canceled() {
                return None;
            }
            let index = self.next;
            self.next += 1;
            let cx = InvokeCx {
                token: self.token.clone(),
                dispatcher: self.dispatcher.clone(),
            };
            let handler = &self.handlers[index];
            let invocation = catch_unwind(AssertUnwindSafe(|| handler.invoke(&self.action, &cx)))
                .unwrap_or_else(|payload| Invocation::Ready(Err(panicked(payload))));
            match invocation {
                Invocation::Ready(result) => self.record(index, result),
                Invocation::Pending(fut) => return Some((index, fut)),
            }
        }
        None
    }

    async fn drive(mut self, mut pending: Option<Suspended>) -> DispatchOutcome {
        while let Some((index, fut)) = pending.take() {
            let result = AssertUnwindSafe(fut)
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(panicked(payload)));
            self.record(index, result);
            pending = self.step();
        }
        self.finish()
    }

    fn record(&mut self, index: usize, result: anyhow::Result<()>) {
        if let Err(error) = result {
            let handler = self.handlers[index].name();
            log::warn!("{handler} failed handling {}: {error:#}", self.ty);
            self.faults.push(HandlerFault { handler, error });
        }
    }

    fn finish(&mut self) -> DispatchOutcome {
        self.finished = true;
        let faults = std::mem::take(&mut self.faults);
        let outcome = if self.token.is_canceled() {
            if !faults.is_empty() {
                log::debug!("{} canceled; dropping {} fault(s)", self.ty, faults.len());
            }
            DispatchOutcome::Canceled
        } else {
            match DispatchFault::new(self.ty, faults) {
                Some(fault) => DispatchOutcome::Faulted(Arc::new(fault)),
                None => DispatchOutcome::Succeeded,
            }
        };
        let fault = outcome.fault();
        for status in [outcome.status(), ActionDispatchStatus::RanToCompletion] {
            self.publish(status, fault);
        }
        log::debug!("{} finished: {:?}", self.ty, outcome.status());
        outcome
    }

    fn publish(&self, status: ActionDispatchStatus, fault: Option<&DispatchFault>) {
        self.dispatcher.inner.bus.publish(&ActionEvent {
            action: self.action.as_ref(),
            action_type: self.ty,
            status,
            fault,
        });
    }
}

impl Drop for Run {
    // A dispatch whose future was dropped before finishing still reports
    // an outcome.
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        log::debug!("{} abandoned after {} handler(s)", self.ty, self.next);
        for status in [ActionDispatchStatus::Canceled, ActionDispatchStatus::RanToCompletion] {
            self.publish(status, None);
        }
    }
}

fn panicked(payload: Box<dyn Any + Send>) -> anyhow::Error {
    anyhow!("handler panicked: {}", panic_message(payload.as_ref()))
}
