//! Reentrancy-safe event emitters
//!
//! [`Emitter`] holds an ordered listener list and guarantees exact
//! semantics under reentrancy: listeners added during a `notify` pass are
//! excluded from that pass, listeners removed mid-pass stop firing
//! immediately, and a failing listener never prevents the rest of the pass
//! from running. [`RetainEmitter`] additionally remembers the last notified
//! payload and replays it to late subscribers.
//!
//! Notification is an index-based scan over a growable list with
//! tombstoning on removal; entries are compacted once no pass is in flight.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

/// Error returned by a failing listener
#[derive(Debug, Clone, Error)]
#[error("listener failed: {0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    /// Create a listener error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result type for listener callbacks
pub type ListenerResult = Result<(), ListenerError>;

type Callback<A> = Rc<dyn Fn(&A) -> ListenerResult>;

/// Identifier handed out per registration
///
/// Tokens are unique per emitter; the same callback registered twice gets
/// two tokens and fires independently until each is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

struct Entry<A> {
    token: ListenerToken,
    key: Option<String>,
    once: bool,
    callback: Callback<A>,
}

struct Inner<A> {
    entries: Vec<Option<Entry<A>>>,
    next_token: u64,
    // Depth of in-flight notify passes; compaction is deferred until zero.
    notifying: u32,
    tombstones: usize,
}

/// Ordered multi-listener notification primitive
pub struct Emitter<A> {
    inner: RefCell<Inner<A>>,
}

impl<A: 'static> Emitter<A> {
    /// Create an emitter with no listeners
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(Inner {
                entries: Vec::new(),
                next_token: 0,
                notifying: 0,
                tombstones: 0,
            }),
        }
    }

    /// Register a listener; fires on every `notify` until removed
    pub fn add(&self, callback: impl Fn(&A) -> ListenerResult + 'static) -> ListenerToken {
        self.register(None, false, Rc::new(callback))
    }

    /// Register a listener under a removal key
    ///
    /// Multiple registrations may share a key; [`Emitter::remove_key`]
    /// removes every one of them.
    pub fn add_keyed(
        &self,
        key: impl Into<String>,
        callback: impl Fn(&A) -> ListenerResult + 'static,
    ) -> ListenerToken {
        self.register(Some(key.into()), false, Rc::new(callback))
    }

    /// Register a listener that is dropped immediately after its first
    /// invocation
    pub fn once(&self, callback: impl Fn(&A) -> ListenerResult + 'static) -> ListenerToken {
        self.register(None, true, Rc::new(callback))
    }

    fn register(&self, key: Option<String>, once: bool, callback: Callback<A>) -> ListenerToken {
        let mut inner = self.inner.borrow_mut();
        let token = ListenerToken(inner.next_token);
        inner.next_token += 1;
        inner.entries.push(Some(Entry {
            token,
            key,
            once,
            callback,
        }));
        token
    }

    /// Remove the registration behind a token
    ///
    /// Takes effect immediately, including for a not-yet-visited entry in an
    /// in-flight `notify` pass. Returns whether anything was removed.
    pub fn remove(&self, token: ListenerToken) -> bool {
        self.remove_where(|entry| entry.token == token)
    }

    /// Remove every registration made under `key`
    pub fn remove_key(&self, key: &str) -> bool {
        self.remove_where(|entry| entry.key.as_deref() == Some(key))
    }

    fn remove_where(&self, matches: impl Fn(&Entry<A>) -> bool) -> bool {
        let mut inner = self.inner.borrow_mut();
        let mut removed = false;
        for slot in &mut inner.entries {
            if slot.as_ref().is_some_and(&matches) {
                *slot = None;
                removed = true;
            }
        }
        if removed {
            inner.tombstones = inner.entries.iter().filter(|s| s.is_none()).count();
            if inner.notifying == 0 {
                inner.entries.retain(Option::is_some);
                inner.tombstones = 0;
            }
        }
        removed
    }

    /// Number of live registrations
    pub fn listener_count(&self) -> usize {
        let inner = self.inner.borrow();
        inner.entries.len() - inner.tombstones
    }

    /// Invoke every listener present at the start of the call, in order
    ///
    /// Listener errors are logged and do not stop the pass; use
    /// [`Emitter::try_notify`] to surface them.
    pub fn notify(&self, arg: &A) {
        if let Err(error) = self.run_pass(arg) {
            log::warn!("emitter listener error: {error}");
        }
    }

    /// Like [`Emitter::notify`], but after the full pass has run, returns
    /// the first error any listener produced
    pub fn try_notify(&self, arg: &A) -> ListenerResult {
        self.run_pass(arg)
    }

    fn run_pass(&self, arg: &A) -> ListenerResult {
        let pass_end = {
            let mut inner = self.inner.borrow_mut();
            inner.notifying += 1;
            inner.entries.len()
        };

        let mut first_error: Option<ListenerError> = None;
        for index in 0..pass_end {
            // Re-borrow per step: the callback may add or remove listeners.
            let callback = {
                let mut inner = self.inner.borrow_mut();
                let inner = &mut *inner;
                match inner.entries.get_mut(index) {
                    Some(slot) => match slot {
                        Some(entry) => {
                            let once = entry.once;
                            let callback = entry.callback.clone();
                            if once {
                                *slot = None;
                                inner.tombstones += 1;
                            }
                            Some(callback)
                        }
                        None => None,
                    },
                    None => None,
                }
            };
            if let Some(callback) = callback {
                if let Err(error) = callback(arg) {
                    if first_error.is_none() {
                        first_error = Some(error);
                    } else {
                        log::warn!("emitter listener error: {error}");
                    }
                }
            }
        }

        let mut inner = self.inner.borrow_mut();
        inner.notifying -= 1;
        if inner.notifying == 0 && inner.tombstones > 0 {
            inner.entries.retain(Option::is_some);
            inner.tombstones = 0;
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl<A: Clone + 'static> Emitter<A> {
    /// One-shot accessor resolved by the next `notify` call's argument
    pub fn next_value(&self) -> NextValue<A> {
        let slot = Rc::new(RefCell::new(None));
        let write = Rc::clone(&slot);
        self.once(move |arg: &A| {
            *write.borrow_mut() = Some(arg.clone());
            Ok(())
        });
        NextValue { slot }
    }
}

impl<A: 'static> Default for Emitter<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle produced by [`Emitter::next_value`]
///
/// Resolves exactly once, with the argument of the first `notify` issued
/// after the handle was created.
pub struct NextValue<A> {
    slot: Rc<RefCell<Option<A>>>,
}

impl<A: Clone> NextValue<A> {
    /// The resolved value, if the emitter has fired since
    pub fn get(&self) -> Option<A> {
        self.slot.borrow().clone()
    }

    /// Whether the handle has resolved
    pub fn is_resolved(&self) -> bool {
        self.slot.borrow().is_some()
    }
}

/// Emitter variant that remembers the most recent payload
///
/// After any `notify`, the emitter is "resolved": listeners added while
/// resolved are invoked immediately and synchronously with the retained
/// payload, in addition to being registered for future notifications.
pub struct RetainEmitter<A> {
    emitter: Emitter<A>,
    retained: RefCell<Option<A>>,
}

impl<A: Clone + 'static> RetainEmitter<A> {
    /// Create an unresolved retaining emitter
    pub fn new() -> Self {
        Self {
            emitter: Emitter::new(),
            retained: RefCell::new(None),
        }
    }

    /// Register a listener; replayed at once if the emitter is resolved
    pub fn add(&self, callback: impl Fn(&A) -> ListenerResult + 'static) -> ListenerToken {
        let callback: Callback<A> = Rc::new(callback);
        let token = self.emitter.register(None, false, callback.clone());
        self.replay(&callback);
        token
    }

    /// Register a once-listener; a resolved emitter consumes it immediately
    pub fn once(&self, callback: impl Fn(&A) -> ListenerResult + 'static) -> ListenerToken {
        let callback: Callback<A> = Rc::new(callback);
        let retained = self.retained.borrow().clone();
        if let Some(value) = retained {
            if let Err(error) = callback(&value) {
                log::warn!("emitter listener error: {error}");
            }
            // Already satisfied; nothing left to register.
            ListenerToken(u64::MAX)
        } else {
            self.emitter.register(None, true, callback)
        }
    }

    fn replay(&self, callback: &Callback<A>) {
        let retained = self.retained.borrow().clone();
        if let Some(value) = retained {
            if let Err(error) = callback(&value) {
                log::warn!("emitter listener error: {error}");
            }
        }
    }

    /// Remove the registration behind a token
    pub fn remove(&self, token: ListenerToken) -> bool {
        self.emitter.remove(token)
    }

    /// Notify all listeners and retain the payload
    pub fn notify(&self, arg: &A) {
        *self.retained.borrow_mut() = Some(arg.clone());
        self.emitter.notify(arg);
    }

    /// Whether a payload has been retained since construction or the last
    /// [`RetainEmitter::reset`]
    pub fn is_resolved(&self) -> bool {
        self.retained.borrow().is_some()
    }

    /// The retained payload, if any
    pub fn retained(&self) -> Option<A> {
        self.retained.borrow().clone()
    }

    /// Clear the resolved state; late subscribers wait for the next notify
    pub fn reset(&self) {
        *self.retained.borrow_mut() = None;
    }
}

impl<A: Clone + 'static> Default for RetainEmitter<A> {
    fn default() -> Self {
        Self::new()
    }
}
