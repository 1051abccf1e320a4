//! Handler declarations and parameter binding.
//!
//! A handler is a plain closure whose first parameter is the action and whose
//! remaining parameters are bound from the dispatch context:
//!
//! - `Store<S>`: a store registered with the resolver, bound once when the
//!   handler's descriptor is first built.
//! - `Dep<D>`: any other registered dependency, resolved on every call.
//! - `CancelToken`: the token of the current dispatch.
//! - `ActionDispatcher`: for dispatching follow-up actions.
//!
//! Synchronous handlers borrow the action (`Fn(&A, ..)`); asynchronous ones
//! receive it shared (`Fn(Arc<A>, ..) -> impl Future`). Both may return `()`
//! or any `Result` whose error converts into `anyhow::Error`.

use std::any::TypeId;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use anyhow::anyhow;
use futures::future::BoxFuture;
use repose_state::Store;

use crate::action::{Action, ActionRef, ActionType};
use crate::cancel::CancelToken;
use crate::dispatch::ActionDispatcher;
use crate::resolve::{Resolver, resolve_as};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Store,
    Dependency,
    Cancel,
    Dispatcher,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamBinding {
    pub kind: ParamKind,
    pub type_name: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerMode {
    Sync,
    Async,
}

/// Per-call context handed to invokers.
pub struct InvokeCx {
    pub(crate) token: CancelToken,
    pub(crate) dispatcher: ActionDispatcher,
}

impl InvokeCx {
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

/// Result of starting a handler.
pub enum Invocation {
    Ready(anyhow::Result<()>),
    Pending(BoxFuture<'static, anyhow::Result<()>>),
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(r) => f.debug_tuple("Ready").field(r).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

pub type Invoker = Arc<dyn Fn(&ActionRef, &InvokeCx) -> Invocation + Send + Sync>;
pub type Extract<P> = Arc<dyn Fn(&InvokeCx) -> anyhow::Result<P> + Send + Sync>;

/// A value a handler can ask for after the action itself.
pub trait HandlerParam: Sized + Send + 'static {
    fn binding() -> ParamBinding;

    /// Whether `resolver` can supply this parameter at all.
    fn available(resolver: &dyn Resolver) -> bool;

    /// Builds the per-call extractor. Runs once per handler descriptor.
    fn prepare(resolver: &Arc<dyn Resolver>) -> Extract<Self>;
}

impl<S> HandlerParam for Store<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn binding() -> ParamBinding {
        ParamBinding {
            kind: ParamKind::Store,
            type_name: std::any::type_name::<S>(),
        }
    }

    fn available(resolver: &dyn Resolver) -> bool {
        resolver.contains(TypeId::of::<Store<S>>())
    }

    fn prepare(resolver: &Arc<dyn Resolver>) -> Extract<Self> {
        match resolve_as::<Store<S>>(resolver.as_ref()) {
            Some(store) => {
                let store = Store::clone(&store);
                Arc::new(move |_: &InvokeCx| Ok(store.clone()))
            }
            None => Arc::new(|_: &InvokeCx| {
                Err(anyhow!(
                    "store of {} is no longer available",
                    std::any::type_name::<S>()
                ))
            }),
        }
    }
}

/// A dependency resolved on every call.
pub struct Dep<D: ?Sized>(pub Arc<D>);

impl<D: ?Sized> Deref for Dep<D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.0
    }
}

impl<D: ?Sized> Clone for Dep<D> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<D> HandlerParam for Dep<D>
where
    D: Send + Sync + 'static,
{
    fn binding() -> ParamBinding {
        ParamBinding {
            kind: ParamKind::Dependency,
            type_name: std::any::type_name::<D>(),
        }
    }

    fn available(resolver: &dyn Resolver) -> bool {
        resolver.contains(TypeId::of::<D>())
    }

    fn prepare(resolver: &Arc<dyn Resolver>) -> Extract<Self> {
        let resolver = resolver.clone();
        Arc::new(move |_: &InvokeCx| {
            resolve_as::<D>(resolver.as_ref())
                .map(Dep)
                .ok_or_else(|| anyhow!("dependency {} could not be resolved", std::any::type_name::<D>()))
        })
    }
}

impl HandlerParam for CancelToken {
    fn binding() -> ParamBinding {
        ParamBinding {
            kind: ParamKind::Cancel,
            type_name: "CancelToken",
        }
    }

    fn available(_: &dyn Resolver) -> bool {
        true
    }

    fn prepare(_: &Arc<dyn Resolver>) -> Extract<Self> {
        Arc::new(|cx: &InvokeCx| Ok(cx.token.clone()))
    }
}

impl HandlerParam for ActionDispatcher {
    fn binding() -> ParamBinding {
        ParamBinding {
            kind: ParamKind::Dispatcher,
            type_name: "ActionDispatcher",
        }
    }

    fn available(_: &dyn Resolver) -> bool {
        true
    }

    fn prepare(_: &Arc<dyn Resolver>) -> Extract<Self> {
        Arc::new(|cx: &InvokeCx| Ok(cx.dispatcher.clone()))
    }
}

/// What a handler body may return.
pub trait HandlerResult {
    fn into_result(self) -> anyhow::Result<()>;
}

impl HandlerResult for () {
    fn into_result(self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The success value is discarded, so `store.update(..)` can be returned as is.
impl<T, E> HandlerResult for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn into_result(self) -> anyhow::Result<()> {
        self.map(drop).map_err(Into::into)
    }
}

/// A closure usable as a handler for `A`. `Args` is the tuple of extra
/// parameters and only serves to keep the arity impls apart.
pub trait Handler<A, Args>: Send + Sync + 'static {
    const MODE: HandlerMode;

    fn params() -> Vec<ParamBinding>;

    fn missing(resolver: &dyn Resolver) -> Option<ParamBinding>;

    fn into_invoker(self: Arc<Self>, resolver: &Arc<dyn Resolver>) -> Invoker;
}

/// Marker wrapping an async closure so it does not overlap with the sync impls.
pub struct Async<F>(pub F);

fn mismatch(expected: ActionType) -> Invocation {
    Invocation::Ready(Err(anyhow!("invoker for {expected} received another action type")))
}

macro_rules! impl_handler {
    ($($P:ident),*) => {
        impl<A, F, R, $($P,)*> Handler<A, ($($P,)*)> for F
        where
            A: Action,
            F: Fn(&A, $($P),*) -> R + Send + Sync + 'static,
            R: HandlerResult,
            $($P: HandlerParam,)*
        {
            const MODE: HandlerMode = HandlerMode::Sync;

            fn params() -> Vec<ParamBinding> {
                vec![$($P::binding()),*]
            }

            fn missing(_resolver: &dyn Resolver) -> Option<ParamBinding> {
                $(
                    if !$P::available(_resolver) {
                        return Some($P::binding());
                    }
                )*
                None
            }

            #[allow(non_snake_case)]
            fn into_invoker(self: Arc<Self>, _resolver: &Arc<dyn Resolver>) -> Invoker {
                $(let $P = $P::prepare(_resolver);)*
                Arc::new(move |action: &ActionRef, _cx: &InvokeCx| {
                    let Some(action) = action.downcast_ref::<A>() else {
                        return mismatch(ActionType::of::<A>());
                    };
                    $(
                        let $P = match ($P)(_cx) {
                            Ok(v) => v,
                            Err(e) => return Invocation::Ready(Err(e)),
                        };
                    )*
                    Invocation::Ready((self)(action, $($P),*).into_result())
                })
            }
        }

        impl<A, F, Fut, R, $($P,)*> Handler<A, ($($P,)*)> for Async<F>
        where
            A: Action,
            F: Fn(Arc<A>, $($P),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = R> + Send + 'static,
            R: HandlerResult,
            $($P: HandlerParam,)*
        {
            const MODE: HandlerMode = HandlerMode::Async;

            fn params() -> Vec<ParamBinding> {
                vec![$($P::binding()),*]
            }

            fn missing(_resolver: &dyn Resolver) -> Option<ParamBinding> {
                $(
                    if !$P::available(_resolver) {
                        return Some($P::binding());
                    }
                )*
                None
            }

            #[allow(non_snake_case)]
            fn into_invoker(self: Arc<Self>, _resolver: &Arc<dyn Resolver>) -> Invoker {
                $(let $P = $P::prepare(_resolver);)*
                Arc::new(move |action: &ActionRef, _cx: &InvokeCx| {
                    let Ok(action) = action.clone().downcast::<A>() else {
                        return mismatch(ActionType::of::<A>());
                    };
                    $(
                        let $P = match ($P)(_cx) {
                            Ok(v) => v,
                            Err(e) => return Invocation::Ready(Err(e)),
                        };
                    )*
                    let fut = (self.0)(action, $($P),*);
                    Invocation::Pending(Box::pin(async move { fut.await.into_result() }))
                })
            }
        }
    };
}

impl_handler!();
impl_handler!(P1);
impl_handler!(P1, P2);
impl_handler!(P1, P2, P3);
impl_handler!(P1, P2, P3, P4);
