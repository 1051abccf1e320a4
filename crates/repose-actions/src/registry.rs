use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::action::{Action, ActionRef, ActionType};
use crate::error::RegistryError;
use crate::handler::{Async, Handler, HandlerMode, InvokeCx, Invocation, Invoker, ParamBinding};
use crate::resolve::Resolver;

type MissingFn = fn(&dyn Resolver) -> Option<ParamBinding>;
type BuildFn = Box<dyn Fn(&Arc<dyn Resolver>) -> Invoker + Send + Sync>;

/// A handler as declared, before its parameters are bound.
struct HandlerDecl {
    action: ActionType,
    owner: &'static str,
    method: &'static str,
    mode: HandlerMode,
    params: Vec<ParamBinding>,
    missing: MissingFn,
    build: BuildFn,
}

impl HandlerDecl {
    fn name(&self) -> String {
        format!("{}::{}", self.owner, self.method)
    }
}

/// Candidate handler declarations, in registration order.
#[derive(Default)]
pub struct HandlerTable {
    decls: Vec<HandlerDecl>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a synchronous handler for `A`.
    pub fn on<A, Args>(
        mut self,
        owner: &'static str,
        method: &'static str,
        handler: impl Handler<A, Args>,
    ) -> Self
    where
        A: Action,
    {
        self.push::<A, Args, _>(owner, method, handler);
        self
    }

    /// Declares an asynchronous handler for `A`.
    pub fn on_async<A, Args, F>(self, owner: &'static str, method: &'static str, handler: F) -> Self
    where
        A: Action,
        Async<F>: Handler<A, Args>,
    {
        self.on::<A, Args>(owner, method, Async(handler))
    }

    /// Appends every declaration of `other` after the current ones.
    pub fn include(mut self, other: HandlerTable) -> Self {
        self.decls.extend(other.decls);
        self
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    fn push<A, Args, H>(&mut self, owner: &'static str, method: &'static str, handler: H)
    where
        A: Action,
        H: Handler<A, Args>,
    {
        let handler = Arc::new(handler);
        self.decls.push(HandlerDecl {
            action: ActionType::of::<A>(),
            owner,
            method,
            mode: H::MODE,
            params: H::params(),
            missing: H::missing,
            build: Box::new(move |resolver: &Arc<dyn Resolver>| handler.clone().into_invoker(resolver)),
        });
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.decls.iter().map(|d| d.name()))
            .finish()
    }
}

/// A handler bound to its parameters, ready to invoke.
pub struct HandlerDescriptor {
    action: ActionType,
    owner: &'static str,
    method: &'static str,
    mode: HandlerMode,
    params: Vec<ParamBinding>,
    invoker: Invoker,
}

impl HandlerDescriptor {
    pub fn action_type(&self) -> ActionType {
        self.action
    }

    pub fn owner(&self) -> &'static str {
        self.owner
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn mode(&self) -> HandlerMode {
        self.mode
    }

    pub fn params(&self) -> &[ParamBinding] {
        &self.params
    }

    pub fn name(&self) -> String {
        format!("{}::{}", self.owner, self.method)
    }

    pub(crate) fn invoke(&self, action: &ActionRef, cx: &InvokeCx) -> Invocation {
        (self.invoker)(action, cx)
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("action", &self.action)
            .field("handler", &self.name())
            .field("mode", &self.mode)
            .field("params", &self.params)
            .finish()
    }
}

struct Route {
    decls: Vec<HandlerDecl>,
    built: OnceLock<Arc<[HandlerDescriptor]>>,
}

/// Action type to ordered handler list.
///
/// Every declaration is checked against the resolver up front, so a missing
/// store or dependency fails [`HandlerRegistry::build`] rather than a
/// dispatch. Descriptors themselves are bound lazily, once per action type.
pub struct HandlerRegistry {
    routes: HashMap<TypeId, Route>,
    resolver: Arc<dyn Resolver>,
    empty: Arc<[HandlerDescriptor]>,
}

impl HandlerRegistry {
    pub fn build(table: HandlerTable, resolver: Arc<dyn Resolver>) -> Result<Self, RegistryError> {
        let mut routes: HashMap<TypeId, Route> = HashMap::new();
        for decl in table.decls {
            if let Some(param) = (decl.missing)(resolver.as_ref()) {
                return Err(RegistryError::Unresolved {
                    handler: decl.name(),
                    param: param.type_name,
                    kind: param.kind,
                });
            }
            routes
                .entry(decl.action.id())
                .or_insert_with(|| Route {
                    decls: Vec::new(),
                    built: OnceLock::new(),
                })
                .decls
                .push(decl);
        }
        log::debug!("handler registry built for {} action type(s)", routes.len());
        Ok(Self {
            routes,
            resolver,
            empty: Arc::from(Vec::new()),
        })
    }

    /// Handlers for an action type, in registration order. Unknown types
    /// yield an empty list.
    pub fn resolve(&self, ty: TypeId) -> Arc<[HandlerDescriptor]> {
        let Some(route) = self.routes.get(&ty) else {
            return self.empty.clone();
        };
        route
            .built
            .get_or_init(|| {
                route
                    .decls
                    .iter()
                    .map(|decl| HandlerDescriptor {
                        action: decl.action,
                        owner: decl.owner,
                        method: decl.method,
                        mode: decl.mode,
                        params: decl.params.clone(),
                        invoker: (decl.build)(&self.resolver),
                    })
                    .collect()
            })
            .clone()
    }

    pub fn resolve_for<A: Action>(&self) -> Arc<[HandlerDescriptor]> {
        self.resolve(TypeId::of::<A>())
    }

    pub fn action_types(&self) -> impl Iterator<Item = ActionType> + '_ {
        self.routes.values().filter_map(|r| r.decls.first().map(|d| d.action))
    }

    pub fn handler_count(&self) -> usize {
        self.routes.values().map(|r| r.decls.len()).sum()
    }

    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("action_types", &self.routes.len())
            .field("handlers", &self.handler_count())
            .finish()
    }
}
