use std::sync::Arc;

use repose_actions::{
    Action, ActionBus, ActionDispatcher, CancelToken, DispatchOutcome, DispatcherOptions, HandlerRegistry,
    HandlerTable, RegistryError, Resolver, Services,
};

use crate::owner::Owner;

/// Registry, bus and dispatcher wired together.
#[derive(Clone, Debug)]
pub struct Flux {
    dispatcher: ActionDispatcher,
}

impl Flux {
    pub fn builder() -> FluxBuilder {
        FluxBuilder::default()
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    pub fn bus(&self) -> &ActionBus {
        self.dispatcher.bus()
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        self.dispatcher.registry()
    }

    pub fn dispatch<A: Action>(&self, action: A) {
        self.dispatcher.dispatch(action)
    }

    pub async fn dispatch_async<A: Action>(&self, action: A, token: CancelToken) -> DispatchOutcome {
        self.dispatcher.dispatch_async(action, token).await
    }

    /// A fresh consumer scope.
    pub fn owner(&self) -> Owner {
        Owner::new(self.clone())
    }
}

#[derive(Default)]
pub struct FluxBuilder {
    resolver: Option<Arc<dyn Resolver>>,
    table: HandlerTable,
    options: DispatcherOptions,
    bus: Option<ActionBus>,
}

impl FluxBuilder {
    pub fn services(self, services: Services) -> Self {
        self.resolver(Arc::new(services))
    }

    /// Any resolver, e.g. a closure over an existing container.
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Adds handler declarations; may be called several times.
    pub fn handlers(mut self, table: HandlerTable) -> Self {
        self.table = self.table.include(table);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.options.workers = workers;
        self
    }

    pub fn options(mut self, options: DispatcherOptions) -> Self {
        self.options = options;
        self
    }

    /// Shares an existing bus instead of creating one.
    pub fn bus(mut self, bus: ActionBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> Result<Flux, RegistryError> {
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(Services::new()) as Arc<dyn Resolver>);
        let registry = HandlerRegistry::build(self.table, resolver)?;
        let dispatcher = ActionDispatcher::with_options(
            Arc::new(registry),
            self.bus.unwrap_or_default(),
            self.options,
        );
        Ok(Flux { dispatcher })
    }
}
