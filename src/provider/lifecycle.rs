use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, RwLock},
};

use flagswitch_core::{
    eval::ResolutionDetails,
    events::{EventEmitter, EventHandler, ProviderEvent, ProviderEventKind, Subscription},
    Error, EvaluationContext, ResolutionError, Result,
};

use super::{ProviderMetadata, ProviderStatus};

/// State shared by every provider implementation: status, ambient context and event handlers.
///
/// Implementations drive the state machine through the `begin_*`/`finish_*` pairs.
#[derive(Debug)]
pub struct ProviderState {
    metadata: ProviderMetadata,
    status: RwLock<ProviderStatus>,
    context: RwLock<Arc<EvaluationContext>>,
    emitter: EventEmitter<ProviderEvent>,
}

impl ProviderState {
    pub fn new(metadata: ProviderMetadata) -> ProviderState {
        ProviderState {
            metadata,
            status: RwLock::new(ProviderStatus::Uninitialized),
            context: RwLock::new(Arc::new(EvaluationContext::default())),
            emitter: EventEmitter::new(),
        }
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn status(&self) -> ProviderStatus {
        *self
            .status
            .read()
            .expect("thread holding status lock should not panic")
    }

    fn set_status(&self, status: ProviderStatus) {
        *self
            .status
            .write()
            .expect("thread holding status lock should not panic") = status;
    }

    /// Atomically replace the status if `transition` allows it. Returns the status before the call.
    fn transition(
        &self,
        transition: impl FnOnce(ProviderStatus) -> Option<ProviderStatus>,
    ) -> ProviderStatus {
        let mut status = self
            .status
            .write()
            .expect("thread holding status lock should not panic");
        let previous = *status;
        if let Some(next) = transition(previous) {
            *status = next;
        }
        previous
    }

    /// Enter `Initializing` and record the ambient context.
    pub fn begin_initialize(&self, context: EvaluationContext) -> Result<()> {
        let previous = self.transition(|status| match status {
            ProviderStatus::ShuttingDown | ProviderStatus::Shutdown => None,
            _ => Some(ProviderStatus::Initializing),
        });
        if matches!(
            previous,
            ProviderStatus::ShuttingDown | ProviderStatus::Shutdown
        ) {
            return Err(Error::ProviderShutDown);
        }
        self.set_context(context);
        log::debug!(target: "flagswitch", provider_id = self.id(); "initializing provider");
        Ok(())
    }

    /// Leave `Initializing`: `Ready` on success, back to `Uninitialized` on failure.
    pub fn finish_initialize(&self, result: &Result<()>) {
        let next = if result.is_ok() {
            ProviderStatus::Ready
        } else {
            ProviderStatus::Uninitialized
        };
        let previous = self.transition(|status| {
            (status == ProviderStatus::Initializing).then_some(next)
        });
        if previous != ProviderStatus::Initializing {
            // Shut down while initializing.
            return;
        }

        match result {
            Ok(()) => {
                log::info!(target: "flagswitch", provider_id = self.id(); "provider is ready");
                self.emit(ProviderEventKind::Ready, None);
            }
            Err(err) => {
                log::warn!(target: "flagswitch", provider_id = self.id(); "provider failed to initialize: {err}");
                self.emit(ProviderEventKind::Error, Some(err.to_string()));
            }
        }
    }

    /// Enter `Refreshing`. Fails unless the provider is ready.
    pub fn begin_refresh(&self) -> Result<()> {
        let previous = self.transition(|status| match status {
            ProviderStatus::Ready => Some(ProviderStatus::Refreshing),
            _ => None,
        });
        match previous {
            ProviderStatus::Ready | ProviderStatus::Refreshing => Ok(()),
            ProviderStatus::ShuttingDown | ProviderStatus::Shutdown => Err(Error::ProviderShutDown),
            ProviderStatus::Uninitialized | ProviderStatus::Initializing => {
                Err(Error::ProviderNotReady)
            }
        }
    }

    /// Leave `Refreshing`. Emits `ConfigurationChanged` if the refresh succeeded and `notify` is
    /// set, `Error` if it failed.
    pub fn finish_refresh(&self, result: &Result<()>, notify: bool) {
        let previous = self.transition(|status| {
            (status == ProviderStatus::Refreshing).then_some(ProviderStatus::Ready)
        });
        if !previous.is_ready() {
            return;
        }

        match result {
            Ok(()) if notify => self.emit(ProviderEventKind::ConfigurationChanged, None),
            Ok(()) => {}
            Err(err) => {
                log::warn!(target: "flagswitch", provider_id = self.id(); "refresh failed, keeping previous state: {err}");
                self.emit(ProviderEventKind::Error, Some(err.to_string()));
            }
        }
    }

    /// Enter `ShuttingDown`. Returns `false` if the provider is already shutting down or shut down,
    /// in which case there is nothing left to do.
    pub fn begin_shutdown(&self) -> bool {
        let previous = self.transition(|status| match status {
            ProviderStatus::ShuttingDown | ProviderStatus::Shutdown => None,
            _ => Some(ProviderStatus::ShuttingDown),
        });
        !matches!(
            previous,
            ProviderStatus::ShuttingDown | ProviderStatus::Shutdown
        )
    }

    /// Enter `Shutdown` and drop all event handlers.
    pub fn finish_shutdown(&self) {
        self.set_status(ProviderStatus::Shutdown);
        self.emitter.clear();
        log::debug!(target: "flagswitch", provider_id = self.id(); "provider shut down");
    }

    /// Check that flag reads can be served.
    pub fn ensure_ready(&self) -> std::result::Result<(), ResolutionError> {
        match self.status() {
            ProviderStatus::Ready | ProviderStatus::Refreshing => Ok(()),
            ProviderStatus::ShuttingDown | ProviderStatus::Shutdown => {
                Err(ResolutionError::ProviderShutDown)
            }
            ProviderStatus::Uninitialized | ProviderStatus::Initializing => {
                Err(ResolutionError::ProviderNotReady)
            }
        }
    }

    /// The ambient context.
    pub fn context(&self) -> Arc<EvaluationContext> {
        self.context
            .read()
            .expect("thread holding context lock should not panic")
            .clone()
    }

    pub fn set_context(&self, context: EvaluationContext) {
        *self
            .context
            .write()
            .expect("thread holding context lock should not panic") = Arc::new(context);
    }

    /// Put `previous` back as the ambient context, unless a later writer already replaced
    /// `current`. Returns whether the context was restored.
    pub fn restore_context(
        &self,
        current: &EvaluationContext,
        previous: Arc<EvaluationContext>,
    ) -> bool {
        let mut context = self
            .context
            .write()
            .expect("thread holding context lock should not panic");
        if **context != *current {
            return false;
        }
        *context = previous;
        true
    }

    pub fn emit(&self, kind: ProviderEventKind, message: Option<String>) {
        let mut event = ProviderEvent::new(kind, self.id());
        event.message = message;
        self.emitter.emit(&event);
    }

    pub fn add_handler(&self, kind: ProviderEventKind, handler: EventHandler) -> Subscription {
        self.emitter.add_handler(kind, handler)
    }
}

/// Run a flag read, converting failures and panics into the caller's default with an `ERROR`
/// reason.
pub(crate) fn guard_resolution<T: Clone>(
    provider_id: &str,
    key: &str,
    default: T,
    resolve: impl FnOnce(T) -> std::result::Result<ResolutionDetails<T>, ResolutionError>,
) -> ResolutionDetails<T> {
    match catch_unwind(AssertUnwindSafe(|| resolve(default.clone()))) {
        Ok(Ok(details)) => {
            log::trace!(target: "flagswitch", provider_id, key, reason:% = details.reason; "resolved flag");
            details
        }
        Ok(Err(err)) => {
            log::debug!(target: "flagswitch", provider_id, key; "returning default value: {err}");
            ResolutionDetails::error(default, err)
        }
        Err(_) => {
            log::warn!(target: "flagswitch", provider_id, key; "flag evaluation panicked, returning default value");
            ResolutionDetails::error(default, ResolutionError::Internal)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use flagswitch_core::eval::Reason;

    use super::*;
    use crate::provider::ProviderMode;

    fn state() -> ProviderState {
        ProviderState::new(ProviderMetadata::new(
            "test",
            "Test",
            ProviderMode::Offline,
        ))
    }

    fn count_events(state: &ProviderState, kind: ProviderEventKind) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let handler: EventHandler = {
            let count = count.clone();
            Arc::new(move |_: &ProviderEvent| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        let _ = state.add_handler(kind, handler);
        count
    }

    #[test]
    fn initialize_success() {
        let state = state();
        let ready = count_events(&state, ProviderEventKind::Ready);

        state
            .begin_initialize(EvaluationContext::for_user("pradyun"))
            .unwrap();
        assert_eq!(state.status(), ProviderStatus::Initializing);
        assert_eq!(
            state.ensure_ready(),
            Err(ResolutionError::ProviderNotReady)
        );

        state.finish_initialize(&Ok(()));
        assert_eq!(state.status(), ProviderStatus::Ready);
        assert_eq!(state.context().identity(), "pradyun");
        assert_eq!(ready.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn initialize_failure_leaves_provider_unusable() {
        let state = state();
        let errors = count_events(&state, ProviderEventKind::Error);

        state.begin_initialize(EvaluationContext::new()).unwrap();
        state.finish_initialize(&Err(Error::ProviderNotReady));

        assert_eq!(state.status(), ProviderStatus::Uninitialized);
        assert!(state.ensure_ready().is_err());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn refresh_requires_ready() {
        let state = state();
        assert!(matches!(state.begin_refresh(), Err(Error::ProviderNotReady)));

        state.begin_initialize(EvaluationContext::new()).unwrap();
        state.finish_initialize(&Ok(()));
        let changed = count_events(&state, ProviderEventKind::ConfigurationChanged);

        state.begin_refresh().unwrap();
        assert_eq!(state.status(), ProviderStatus::Refreshing);
        assert!(state.ensure_ready().is_ok());
        state.finish_refresh(&Ok(()), true);
        assert_eq!(state.status(), ProviderStatus::Ready);

        state.begin_refresh().unwrap();
        state.finish_refresh(&Ok(()), false);
        assert_eq!(changed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_is_idempotent_and_terminal() {
        let state = state();
        state.begin_initialize(EvaluationContext::new()).unwrap();
        state.finish_initialize(&Ok(()));

        assert!(state.begin_shutdown());
        assert!(!state.begin_shutdown());
        state.finish_shutdown();
        assert!(!state.begin_shutdown());

        assert_eq!(state.status(), ProviderStatus::Shutdown);
        assert_eq!(
            state.ensure_ready(),
            Err(ResolutionError::ProviderShutDown)
        );
        assert!(matches!(
            state.begin_initialize(EvaluationContext::new()),
            Err(Error::ProviderShutDown)
        ));
        assert!(matches!(state.begin_refresh(), Err(Error::ProviderShutDown)));
    }

    #[test]
    fn shutdown_during_initialize_wins() {
        let state = state();
        let ready = count_events(&state, ProviderEventKind::Ready);
        state.begin_initialize(EvaluationContext::new()).unwrap();
        assert!(state.begin_shutdown());
        state.finish_initialize(&Ok(()));
        assert_eq!(state.status(), ProviderStatus::ShuttingDown);
        assert_eq!(ready.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn guard_converts_errors_and_panics() {
        let ok = guard_resolution("test", "f", 1.0, |_| {
            Ok(ResolutionDetails::static_value(2.0))
        });
        assert_eq!(ok.value, 2.0);
        assert_eq!(ok.reason, Reason::Static);

        let err = guard_resolution("test", "f", 1.0, |_| Err(ResolutionError::ProviderNotReady));
        assert_eq!(err.value, 1.0);
        assert_eq!(err.reason, Reason::Error);
        assert_eq!(err.error, Some(ResolutionError::ProviderNotReady));

        let panicked = guard_resolution("test", "f", "default".to_owned(), |_| panic!("boom"));
        assert_eq!(panicked.value, "default");
        assert_eq!(panicked.error, Some(ResolutionError::Internal));
    }

    #[test]
    fn restore_context_respects_later_writers() {
        let state = state();
        let alice = EvaluationContext::for_user("alice");
        let bob = EvaluationContext::for_user("bob");
        let carol = EvaluationContext::for_user("carol");

        state.set_context(alice.clone());
        let previous = state.context();
        state.set_context(bob.clone());
        state.set_context(carol.clone());
        assert!(!state.restore_context(&bob, previous.clone()));
        assert_eq!(*state.context(), carol);

        state.set_context(bob.clone());
        assert!(state.restore_context(&bob, previous));
        assert_eq!(*state.context(), alice);
    }
}
