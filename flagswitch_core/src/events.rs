//! A small typed publish/subscribe utility.
//!
//! Handlers are registered for one event kind and receive every event of that kind. Registering
//! returns a [`Subscription`] that removes the handler again.
use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    sync::{Arc, Mutex, Weak},
};

use serde::{Deserialize, Serialize};

/// An event that can be dispatched through an [`EventEmitter`].
pub trait Event: Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E: Event> {
    next_id: u64,
    handlers: HashMap<E::Kind, Vec<(u64, Handler<E>)>>,
}

/// Dispatches events to registered handlers. Cloning an emitter yields a handle to the same set of
/// handlers.
pub struct EventEmitter<E: Event> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E: Event> Clone for EventEmitter<E> {
    fn clone(&self) -> Self {
        EventEmitter {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E: Event> Default for EventEmitter<E> {
    fn default() -> Self {
        EventEmitter {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                handlers: HashMap::new(),
            })),
        }
    }
}

impl<E: Event> fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl<E: Event> EventEmitter<E> {
    pub fn new() -> EventEmitter<E> {
        EventEmitter::default()
    }

    /// Register `handler` for events of `kind`.
    pub fn add_handler(&self, kind: E::Kind, handler: Arc<dyn Fn(&E) + Send + Sync>) -> Subscription {
        let id = {
            let mut registry = self.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.handlers.entry(kind).or_default().push((id, handler));
            id
        };

        // The subscription must not keep the emitter alive.
        let registry: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                let mut registry = registry
                    .lock()
                    .expect("thread holding event handlers lock should not panic");
                if let Some(handlers) = registry.handlers.get_mut(&kind) {
                    handlers.retain(|(handler_id, _)| *handler_id != id);
                }
            }
        })
    }

    /// Deliver `event` to every handler registered for its kind.
    ///
    /// Handlers are called outside of the internal lock, so they may add or remove handlers.
    pub fn emit(&self, event: &E) {
        let handlers: Vec<Handler<E>> = {
            let registry = self.lock();
            registry
                .handlers
                .get(&event.kind())
                .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        log::trace!(target: "flagswitch", handlers = handlers.len(); "emitting {:?} event", event.kind());
        for handler in handlers {
            handler(event);
        }
    }

    /// Remove all handlers.
    pub fn clear(&self) {
        self.lock().handlers.clear();
    }

    /// Number of registered handlers across all kinds.
    pub fn handler_count(&self) -> usize {
        self.lock().handlers.values().map(Vec::len).sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry<E>> {
        self.registry
            .lock()
            .expect("thread holding event handlers lock should not panic")
    }
}

/// Handle to a registered handler. Call [`Subscription::remove`] to unregister it.
///
/// Dropping a subscription without calling `remove` keeps the handler registered.
#[must_use = "dropping a subscription keeps the handler registered forever"]
pub struct Subscription {
    remover: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(remover: impl FnOnce() + Send + Sync + 'static) -> Subscription {
        Subscription {
            remover: Some(Box::new(remover)),
        }
    }

    /// A subscription that has nothing to remove.
    pub fn noop() -> Subscription {
        Subscription { remover: None }
    }

    /// Unregister the handler.
    pub fn remove(mut self) {
        if let Some(remover) = self.remover.take() {
            remover();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remover.is_some())
            .finish()
    }
}

/// Kinds of lifecycle events emitted by providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderEventKind {
    /// The provider finished initializing and can serve flag values.
    Ready,
    /// Flag values may have changed. Applications should re-read the flags they display.
    ConfigurationChanged,
    /// The provider failed to initialize or refresh.
    Error,
}

/// A lifecycle event emitted by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEvent {
    pub kind: ProviderEventKind,
    /// Id of the emitting provider.
    pub provider_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProviderEvent {
    pub fn new(kind: ProviderEventKind, provider_id: impl Into<String>) -> ProviderEvent {
        ProviderEvent {
            kind,
            provider_id: provider_id.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> ProviderEvent {
        self.message = Some(message.into());
        self
    }
}

impl Event for ProviderEvent {
    type Kind = ProviderEventKind;

    fn kind(&self) -> ProviderEventKind {
        self.kind
    }
}

/// Handler for provider events.
pub type EventHandler = Arc<dyn Fn(&ProviderEvent) + Send + Sync>;
