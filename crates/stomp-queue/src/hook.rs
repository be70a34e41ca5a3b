//! Outbound hooks that observe and reshape messages before they are sent.
//!
//! Every enqueue builds an [`OutboundEvent`] whose message starts as the
//! default encoding of the caller's data. Hooks run in registration order
//! and may rewrite the message or veto it entirely.

use crate::message::OutboundMessage;
use serde_json::Value;
use std::sync::Arc;

#[cfg(test)]
#[path = "hook_tests.rs"]
mod tests;

/// Data on its way to the broker
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    /// Data passed to enqueue, as given by the caller
    pub data: Value,
    /// Message that will be sent; `None` once vetoed
    pub message: Option<OutboundMessage>,
}

impl OutboundEvent {
    /// Create event carrying the default encoding of `data`
    pub fn new(data: Value) -> Self {
        let message = Some(OutboundMessage::from_value(&data));
        Self { data, message }
    }

    /// Drop the message so nothing is sent
    pub fn veto(&mut self) {
        self.message = None;
    }

    pub fn is_vetoed(&self) -> bool {
        self.message.is_none()
    }
}

/// Observer invoked once per enqueue before the message is sent
pub trait OutboundHook: Send + Sync {
    fn transform(&self, event: &mut OutboundEvent);
}

impl<F> OutboundHook for F
where
    F: Fn(&mut OutboundEvent) + Send + Sync,
{
    fn transform(&self, event: &mut OutboundEvent) {
        self(event)
    }
}

/// Hook that leaves every event untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl OutboundHook for NoopHook {
    fn transform(&self, _event: &mut OutboundEvent) {}
}

/// Ordered list of hooks run one after another.
///
/// A vetoed event is still shown to later hooks, which may restore a message.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn OutboundHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook, returning `&mut Self` for chaining
    pub fn push(&mut self, hook: Arc<dyn OutboundHook>) -> &mut Self {
        self.hooks.push(hook);
        self
    }

    pub fn with(mut self, hook: impl OutboundHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl OutboundHook for HookChain {
    fn transform(&self, event: &mut OutboundEvent) {
        for hook in &self.hooks {
            hook.transform(event);
        }
    }
}

/// Run `hook` over `data` and return the resulting event
pub fn dispatch(hook: &dyn OutboundHook, data: Value) -> OutboundEvent {
    let mut event = OutboundEvent::new(data);
    hook.transform(&mut event);
    event
}
