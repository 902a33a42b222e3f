/// Component/plugin registry: append-only list of `Component` implementations
/// with lifecycle hooks, expressed as a Rust trait object instead of a
/// function-pointer vtable.
use std::sync::Arc;

use crate::config::DeviceConfig;
use crate::proto::DeviceInfo;
use crate::server::Server;

/// Back-references handed to every component at init time.
pub struct RuntimeContext {
    pub server: Arc<Server>,
    pub device_config: DeviceConfig,
}

/// A message a component may choose to handle, already frame-decoded.
pub struct InboundMessage<'a> {
    pub session_id: u32,
    pub message_type: u32,
    pub payload: &'a [u8],
}

/// One pluggable unit of gateway behavior. Every hook is optional — the
/// default implementation does nothing, so a component only overrides what
/// it actually needs (§4.3).
pub trait Component: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs once at startup. A failure here is isolated to this component
    /// (logged, component dropped from the registry) and does not abort
    /// startup of the rest of the gateway.
    fn init(&self, _ctx: &RuntimeContext) -> Result<(), crate::error::Error> {
        Ok(())
    }

    /// Runs once at shutdown, in registration order, best-effort.
    fn cleanup(&self, _ctx: &RuntimeContext) {}

    /// Adds this component's fields to the shared `DeviceInfoResponse`
    /// (§4.2). Multiple components may contribute; feature-flag fields are
    /// OR'd, string fields are last-writer-wins by registration order.
    fn contribute_device_info(&self, _info: &mut DeviceInfo) {}

    /// Emits this component's `ListEntitiesXxxResponse` message(s) for a
    /// session that just sent `ListEntitiesRequest`.
    fn list_entities(&self, _ctx: &RuntimeContext, _session_id: u32) {}

    /// Emits this component's current state(s) for a session that just sent
    /// `SubscribeStatesRequest`.
    fn subscribe_states(&self, _ctx: &RuntimeContext, _session_id: u32) {}

    /// Attempts to handle an inbound message. Returns `true` if this
    /// component claimed it (no other component will see it), `false` to let
    /// the registry try the next component.
    fn handle_message(&self, _ctx: &RuntimeContext, _msg: &InboundMessage<'_>) -> bool {
        false
    }
}

/// Append-only collection of components, queried in registration order.
pub struct Registry {
    components: Vec<Arc<dyn Component>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { components: Vec::new() }
    }

    pub fn register(&mut self, component: Arc<dyn Component>) {
        self.components.push(component);
    }

    /// Initializes every registered component, dropping (and logging) any
    /// that fail rather than aborting the whole registry (§7: component
    /// errors are contained at the component boundary).
    pub fn init_all(&mut self, ctx: &RuntimeContext) {
        self.components.retain(|c| match c.init(ctx) {
            Ok(()) => true,
            Err(e) => {
                log::error!("component {} failed to initialize: {e}", c.name());
                false
            }
        });
    }

    pub fn cleanup_all(&self, ctx: &RuntimeContext) {
        for c in &self.components {
            c.cleanup(ctx);
        }
    }

    pub fn contribute_device_info(&self, info: &mut DeviceInfo) {
        for c in &self.components {
            c.contribute_device_info(info);
        }
    }

    pub fn list_entities(&self, ctx: &RuntimeContext, session_id: u32) {
        for c in &self.components {
            c.list_entities(ctx, session_id);
        }
    }

    pub fn subscribe_states(&self, ctx: &RuntimeContext, session_id: u32) {
        for c in &self.components {
            c.subscribe_states(ctx, session_id);
        }
    }

    /// Dispatches a message to the first component that claims it.
    /// Returns `true` if some component handled it.
    pub fn handle_message(&self, ctx: &RuntimeContext, msg: &InboundMessage<'_>) -> bool {
        for c in &self.components {
            if c.handle_message(ctx, msg) {
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
