// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Registry of in-flight guarded calls
//!
//! Calls are bucketed by owner, then keyed by signature hash. A nested call
//! that finds an entry under its (owner, hash) resolves that entry instead
//! of itself, which hands back the alternate. Entries are released as soon
//! as the outermost call returns or unwinds, and a bucket is dropped as soon
//! as it is empty.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::Location;
use std::rc::Rc;

use tracing::{debug, instrument, trace};

use crate::callable::{Callable, FunctionRef};
use crate::config::RecurserConfig;
use crate::data::{Frame, Trace, TraceSource};
use crate::error::{GuardError, Result};
use crate::factory::{DefaultFactory, Factory};
use crate::receiver::{Receiver, ScopeId};
use crate::recursable::{Alternate, CallState, Recursable};
use crate::signature::SignatureHash;

thread_local! {
    static INSTANCE: RefCell<Option<Rc<Recurser>>> = const { RefCell::new(None) };
}

/// Placeholder owner for calls made without one.
struct DefaultScope;

/// A registered call, type-erased.
struct Entry {
    signature: String,
    state: Rc<dyn Any>,
}

struct ScopeBucket {
    receiver: Receiver,
    stack: HashMap<SignatureHash, Entry>,
}

/// Tracks guarded calls for one logical call stack.
pub struct Recurser<F: Factory = DefaultFactory> {
    factory: F,
    config: RecurserConfig,
    default_scope: Rc<DefaultScope>,
    cache: RefCell<HashMap<ScopeId, ScopeBucket>>,
    /// Scope count at which the next registration prunes.
    prune_at: Cell<usize>,
}

impl Recurser<DefaultFactory> {
    pub fn new() -> Self {
        Self::with_config(RecurserConfig::default())
    }

    pub fn with_config(config: RecurserConfig) -> Self {
        Self::with_factory(DefaultFactory, config)
    }

    /// The thread's shared instance, created on first use.
    pub fn instance() -> Rc<Self> {
        INSTANCE.with(|slot| Rc::clone(slot.borrow_mut().get_or_insert_with(|| Rc::new(Self::with_config(RecurserConfig::from_env())))))
    }

    /// Drop the thread's shared instance and everything it tracks. Calls
    /// already in flight keep the instance they started on.
    pub fn flush() {
        let previous = INSTANCE.with(|slot| slot.borrow_mut().take());
        if previous.is_some() {
            debug!("flushed recursion tracker");
        }
    }

    /// Run `callback` on the shared instance, guarded by the caller's
    /// location.
    ///
    /// Without an explicit `signature` the call is keyed by `file:line`, so
    /// every call made from the same line shares one guard while calls on
    /// different lines of one function do not. Use [`guard!`](crate::guard)
    /// to key by the enclosing function instead, which makes every guarded
    /// call in that function intercept the others.
    #[track_caller]
    pub fn call<'a, T, C>(callback: C, alternate: impl Into<Alternate<T>>, owner: Option<Receiver>, signature: Option<&str>) -> Result<T>
    where
        T: Clone + 'static,
        C: FnOnce() -> T + 'a,
    {
        let trace = Trace::from_frames(vec![Frame::at(Location::caller())]);
        Self::instance().run(callback, alternate, owner, signature, Some(trace))
    }

    /// Run `callback` on the shared instance, identified by `backtrace`.
    pub fn call_traced<'a, T, C>(callback: C, alternate: impl Into<Alternate<T>>, owner: Option<Receiver>, signature: Option<&str>, backtrace: Trace) -> Result<T>
    where
        T: Clone + 'static,
        C: FnOnce() -> T + 'a,
    {
        Self::instance().run(callback, alternate, owner, signature, Some(backtrace))
    }
}

impl Default for Recurser<DefaultFactory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Factory> Recurser<F> {
    pub fn with_factory(factory: F, config: RecurserConfig) -> Self {
        Self {
            factory,
            default_scope: Rc::new(DefaultScope),
            cache: RefCell::new(HashMap::new()),
            prune_at: Cell::new(config.prune_threshold.max(1)),
            config,
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn config(&self) -> &RecurserConfig {
        &self.config
    }

    /// Owner assigned to calls that have none.
    pub fn default_scope(&self) -> Receiver {
        Receiver::from_rc(&self.default_scope)
    }

    /// Build a guarded call for `callback` through the factory and guard it.
    ///
    /// Without a backtrace the signature is derived from the callback's type.
    #[track_caller]
    pub fn run<'a, T, C>(&self, callback: C, alternate: impl Into<Alternate<T>>, owner: Option<Receiver>, signature: Option<&str>, backtrace: Option<Trace>) -> Result<T>
    where
        T: Clone + 'static,
        C: FnOnce() -> T + 'a,
    {
        let callable = Callable::Function(FunctionRef::of(&callback));
        let recursable = self.factory.make_recursable(callback, &callable, alternate, owner, signature, backtrace.map(TraceSource::from))?;
        self.guard(&recursable)
    }

    /// Resolve `target`, or the call already in flight under its owner and
    /// signature if there is one.
    #[instrument(level = "trace", skip_all, fields(signature = target.signature()))]
    pub fn guard<T: Clone + 'static>(&self, target: &Recursable<'_, T>) -> Result<T> {
        target.for_object(Some(self.default_scope()));

        if let Some(current) = self.find(target)? {
            if self.config.log_interceptions {
                debug!(signature = current.signature(), status = %current.status(), "intercepted recursive call");
            }
            return current.resolve();
        }

        let _registration = self.register(target);
        target.resolve()
    }

    /// The call in flight under `target`'s owner and signature.
    pub fn find<T: 'static>(&self, target: &Recursable<'_, T>) -> Result<Option<Rc<CallState<T>>>> {
        self.find_hash(target.receiver(), &target.hash())
    }

    /// The call in flight under `owner` (the default scope when `None`) and `hash`.
    pub fn find_hash<T: 'static>(&self, owner: Option<&Receiver>, hash: &SignatureHash) -> Result<Option<Rc<CallState<T>>>> {
        let scope = self.scope_of(owner);
        let cache = self.cache.borrow();

        let Some(bucket) = cache.get(&scope.id()) else {
            return Ok(None);
        };
        // A dead owner's address may have been reused by a new one.
        if !bucket.receiver.is_alive() {
            return Ok(None);
        }
        let Some(entry) = bucket.stack.get(hash) else {
            return Ok(None);
        };

        match Rc::clone(&entry.state).downcast::<CallState<T>>() {
            Ok(state) => Ok(Some(state)),
            Err(_) => Err(GuardError::SignatureConflict {
                signature: entry.signature.clone(),
                expected: std::any::type_name::<T>(),
            }),
        }
    }

    /// Forget `target`'s entry. Does nothing if it is not registered.
    pub fn release<T>(&self, target: &Recursable<'_, T>) {
        self.release_hash(target.receiver(), &target.hash());
    }

    fn release_hash(&self, owner: Option<&Receiver>, hash: &SignatureHash) {
        let scope = self.scope_of(owner).id();
        let mut cache = self.cache.borrow_mut();

        let Some(bucket) = cache.get_mut(&scope) else {
            return;
        };
        if let Some(entry) = bucket.stack.remove(hash) {
            trace!(signature = %entry.signature, hash = %hash, "released guarded call");
        }
        if bucket.stack.is_empty() {
            cache.remove(&scope);
        }
    }

    fn register<T: 'static>(&self, target: &Recursable<'_, T>) -> Registration<'_, F> {
        let owner = self.scope_of(target.receiver());
        let hash = target.hash();
        self.maybe_prune();
        let entry = Entry {
            signature: target.signature().to_string(),
            state: Rc::clone(target.state()) as Rc<dyn Any>,
        };

        let mut cache = self.cache.borrow_mut();
        let bucket = cache.entry(owner.id()).or_insert_with(|| ScopeBucket {
            receiver: owner.clone(),
            stack: HashMap::new(),
        });
        if !bucket.receiver.is_alive() {
            bucket.receiver = owner.clone();
            bucket.stack.clear();
        }
        bucket.stack.insert(hash, entry);
        trace!(signature = target.signature(), hash = %hash, owner = owner.type_name(), "registered guarded call");

        Registration { recurser: self, owner, hash }
    }

    /// Prune once the registry reaches the current trigger, then move the
    /// trigger to twice what survived.
    fn maybe_prune(&self) {
        if !self.config.prune_dead_scopes || self.cache.borrow().len() < self.prune_at.get() {
            return;
        }
        self.prune();
        let survivors = self.cache.borrow().len();
        self.prune_at.set(survivors.saturating_mul(2).max(self.config.prune_threshold).max(1));
    }

    fn scope_of(&self, owner: Option<&Receiver>) -> Receiver {
        owner.cloned().unwrap_or_else(|| self.default_scope())
    }

    /// Number of owners with calls in flight.
    pub fn tracked_scopes(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Whether `owner` has any call in flight.
    pub fn is_tracking(&self, owner: &Receiver) -> bool {
        self.cache.borrow().get(&owner.id()).is_some_and(|bucket| bucket.receiver.is_alive())
    }

    /// Drop buckets whose `Rc`-backed owner is gone. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let mut cache = self.cache.borrow_mut();
        let before = cache.len();
        cache.retain(|_, bucket| bucket.receiver.is_alive());

        let pruned = before - cache.len();
        if pruned > 0 {
            debug!(pruned, remaining = cache.len(), "pruned dead recursion scopes");
        }
        pruned
    }
}

/// Releases a registered call when dropped.
struct Registration<'r, F: Factory> {
    recurser: &'r Recurser<F>,
    owner: Receiver,
    hash: SignatureHash,
}

impl<F: Factory> Drop for Registration<'_, F> {
    fn drop(&mut self) {
        self.recurser.release_hash(Some(&self.owner), &self.hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    fn nested(recurser: &Recurser, calls: &Cell<u32>, owner: Option<Receiver>) -> Result<u32> {
        let target = Recursable::new(
            || {
                calls.set(calls.get() + 1);
                nested(recurser, calls, owner.clone()).unwrap() + 1
            },
            100,
            "nested",
        );
        target.for_object(owner.clone());
        recurser.guard(&target)
    }

    #[test]
    fn test_manages_instances() {
        Recurser::flush();
        let instance = Recurser::instance();
        assert!(Rc::ptr_eq(&instance, &Recurser::instance()));

        Recurser::flush();
        assert!(!Rc::ptr_eq(&instance, &Recurser::instance()));
        Recurser::flush();
    }

    #[test]
    fn test_nested_call_receives_alternate() {
        let recurser = Recurser::new();
        let calls = Cell::new(0);

        assert_eq!(nested(&recurser, &calls, None).unwrap(), 101);
        assert_eq!(calls.get(), 1);
        assert_eq!(recurser.tracked_scopes(), 0);
    }

    #[test]
    fn test_unscoped_calls_use_default_scope() {
        let recurser = Recurser::new();
        let target = Recursable::new(|| recurser.is_tracking(&recurser.default_scope()), false, "scoped");

        assert!(recurser.guard(&target).unwrap());
        assert_eq!(target.receiver(), Some(&recurser.default_scope()));
        assert!(!recurser.is_tracking(&recurser.default_scope()));
    }

    #[test]
    fn test_manages_recursables() {
        let recurser = Recurser::new();
        let one = Recursable::new(|| (), (), "same");
        let two = Recursable::new(|| (), (), "same");
        one.for_object(Some(recurser.default_scope()));
        two.for_object(Some(recurser.default_scope()));

        assert!(recurser.find(&one).unwrap().is_none());
        assert!(recurser.find(&two).unwrap().is_none());

        let registration = recurser.register(&one);
        let found = recurser.find(&two).unwrap().unwrap();
        assert!(Rc::ptr_eq(&found, one.state()));
        assert!(!Rc::ptr_eq(&found, two.state()));

        recurser.release(&one);
        assert!(recurser.find(&one).unwrap().is_none());
        assert!(recurser.find(&two).unwrap().is_none());

        drop(registration);
        recurser.release(&two);
        assert_eq!(recurser.tracked_scopes(), 0);
    }

    #[test]
    fn test_owners_are_independent() {
        let recurser = Recurser::new();
        let (first, second) = (1u8, 2u8);
        let (first, second) = (Receiver::of(&first), Receiver::of(&second));

        let inner_calls = Cell::new(0);
        let outer = Recursable::new(
            || {
                let inner = nested(&recurser, &inner_calls, Some(second.clone())).unwrap();
                assert!(recurser.is_tracking(&first));
                inner
            },
            0,
            "nested",
        );
        outer.for_object(Some(first.clone()));

        assert_eq!(recurser.guard(&outer).unwrap(), 101);
        assert_eq!(inner_calls.get(), 1);
        assert!(!recurser.is_tracking(&first));
        assert!(!recurser.is_tracking(&second));
    }

    #[test]
    fn test_running_callback_can_change_alternate() {
        let recurser = Recurser::new();
        let hash = SignatureHash::of("adjust");

        let target = Recursable::new(
            || {
                let current = recurser.find_hash::<i32>(None, &hash).unwrap().unwrap();
                current.and_return(7);
                recurser.guard(&Recursable::new(|| 0, 1, "adjust")).unwrap()
            },
            1,
            "adjust",
        );

        assert_eq!(recurser.guard(&target).unwrap(), 7);
    }

    #[test]
    fn test_mismatched_return_type_conflicts() {
        let recurser = Recurser::new();
        let target = Recursable::new(
            || match recurser.guard(&Recursable::new(|| "text".to_string(), String::new(), "shared")) {
                Err(GuardError::SignatureConflict { signature, .. }) => Some(signature),
                _ => None,
            },
            None,
            "shared",
        );

        assert_eq!(recurser.guard(&target).unwrap().as_deref(), Some("shared"));
    }

    #[test]
    fn test_entry_is_released_after_panic() {
        let recurser = Recurser::new();
        let target = Recursable::new(|| -> u8 { panic!("boom") }, 0, "panics");

        let outcome = catch_unwind(AssertUnwindSafe(|| recurser.guard(&target)));
        assert!(outcome.is_err());
        assert_eq!(recurser.tracked_scopes(), 0);
    }

    #[test]
    fn test_dead_owner_is_pruned() {
        let recurser = Recurser::new();
        let owner = Rc::new(5u32);
        let receiver = Receiver::from_rc(&owner);

        let target = Recursable::new(
            {
                let receiver = receiver.clone();
                let recurser = &recurser;
                move || {
                    assert!(recurser.is_tracking(&receiver));
                    drop(owner);
                    assert!(!recurser.is_tracking(&receiver));
                    recurser.prune()
                }
            },
            0,
            "pruned",
        );
        target.for_object(Some(receiver.clone()));

        assert_eq!(recurser.guard(&target).unwrap(), 1);
        assert_eq!(recurser.tracked_scopes(), 0);
    }

    #[test]
    fn test_release_without_entry_is_noop() {
        let recurser = Recurser::new();
        let target = Recursable::new(|| 1, 0, "absent");

        recurser.release(&target);
        assert_eq!(recurser.tracked_scopes(), 0);
    }

    #[test]
    fn test_call_derives_signature_from_line() {
        Recurser::flush();
        let calls = Cell::new(0);
        fn again(calls: &Cell<u32>) -> Result<u32> {
            Recurser::call(
                || {
                    calls.set(calls.get() + 1);
                    again(calls).unwrap() + 10
                },
                1,
                None,
                None,
            )
        }

        assert_eq!(again(&calls).unwrap(), 11);
        assert_eq!(calls.get(), 1);
        assert_eq!(Recurser::instance().tracked_scopes(), 0);
        Recurser::flush();
    }

    fn scoped_count<'r>(recurser: &'r Recurser, owner: Receiver, signature: &str, callback: impl FnOnce() -> usize + 'r) -> usize {
        let target = Recursable::new(callback, 0, signature);
        target.for_object(Some(owner));
        recurser.guard(&target).unwrap()
    }

    fn dead_scope_survivors(config: RecurserConfig) -> (usize, usize) {
        let recurser = Recurser::with_config(config);
        let doomed = Rc::new(1u32);
        let doomed_scope = Receiver::from_rc(&doomed);
        let (second, third) = (2u32, 3u32);
        let before_inner = Cell::new(0);

        let inside_inner = scoped_count(&recurser, doomed_scope.clone(), "outer", {
            let recurser = &recurser;
            let before_inner = &before_inner;
            let (second, third) = (&second, &third);
            move || {
                drop(doomed);
                assert!(!recurser.is_tracking(&doomed_scope));
                scoped_count(recurser, Receiver::of(second), "middle", move || {
                    before_inner.set(recurser.tracked_scopes());
                    scoped_count(recurser, Receiver::of(third), "inner", || recurser.tracked_scopes())
                })
            }
        });

        assert_eq!(recurser.tracked_scopes(), 0);
        (before_inner.get(), inside_inner)
    }

    #[test]
    fn test_guard_does_not_prune_below_threshold() {
        let config = RecurserConfig {
            prune_threshold: 3,
            ..RecurserConfig::default()
        };

        assert_eq!(dead_scope_survivors(config), (2, 3));
    }

    #[test]
    fn test_registration_prunes_once_threshold_is_reached() {
        let config = RecurserConfig {
            prune_threshold: 2,
            ..RecurserConfig::default()
        };

        assert_eq!(dead_scope_survivors(config), (2, 2));
    }

    #[test]
    fn test_prune_trigger_doubles_with_survivors() {
        let recurser = Recurser::with_config(RecurserConfig {
            prune_threshold: 2,
            ..RecurserConfig::default()
        });
        let owners: Vec<u32> = (0..5).collect();

        fn chain(recurser: &Recurser, owners: &[u32], triggers: &RefCell<Vec<usize>>) -> usize {
            match owners.split_first() {
                Some((owner, rest)) => scoped_count(recurser, Receiver::of(owner), "chain", || {
                    triggers.borrow_mut().push(recurser.prune_at.get());
                    chain(recurser, rest, triggers) + 1
                }),
                None => 0,
            }
        }

        let triggers = RefCell::new(Vec::new());
        assert_eq!(chain(&recurser, &owners, &triggers), 5);
        assert_eq!(*triggers.borrow(), vec![2, 2, 4, 4, 8]);
        assert_eq!(recurser.tracked_scopes(), 0);
    }

    #[test]
    fn test_disabled_pruning_keeps_dead_scopes_until_release() {
        let config = RecurserConfig {
            prune_dead_scopes: false,
            prune_threshold: 1,
            ..RecurserConfig::default()
        };

        assert_eq!(dead_scope_survivors(config), (2, 3));
    }
}
