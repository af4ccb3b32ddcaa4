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

//! Guarded calls
//!
//! A [`Recursable`] pairs a callback with the value to hand out when the
//! callback is re-entered before it returns. Its mutable bookkeeping lives
//! in a shared [`CallState`], which is what the tracker keeps while the call
//! is in flight; the callback itself stays with the `Recursable`.
//!
//! # States
//!
//! - not started: `resolve` runs the callback
//! - running (depth 1): `resolve` returns the alternate
//! - recursing (depth 2+): the alternate is being resolved, `resolve` fails
//! - finished (depth back to 0): `resolve` fails

use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::callable::FunctionRef;
use crate::data::RecursionContext;
use crate::error::{CallStatus, GuardError, RecursionSnapshot, Result};
use crate::receiver::Receiver;
use crate::signature::SignatureHash;

/// What re-entrant calls receive instead of running the callback again.
pub enum Alternate<T> {
    Value(T),
    /// Runs on the first re-entrant call; its result replaces it.
    Producer(Box<dyn FnOnce() -> T>),
}

impl<T> Alternate<T> {
    pub fn value(value: T) -> Self {
        Alternate::Value(value)
    }

    pub fn producer<F>(producer: F) -> Self
    where
        F: FnOnce() -> T + 'static,
    {
        Alternate::Producer(Box::new(producer))
    }
}

impl<T> From<T> for Alternate<T> {
    fn from(value: T) -> Self {
        Alternate::Value(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Alternate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alternate::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Alternate::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

/// Increments a stack depth for as long as it lives.
struct DepthGuard<'s> {
    depth: &'s Cell<usize>,
}

impl<'s> DepthGuard<'s> {
    fn enter(depth: &'s Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

/// Shared, callback-free half of a guarded call.
pub struct CallState<T> {
    signature: String,
    hash: SignatureHash,
    alternate: RefCell<Option<Alternate<T>>>,
    receiver: OnceCell<Receiver>,
    started: Cell<bool>,
    stack_depth: Cell<usize>,
}

impl<T> CallState<T> {
    pub fn new(signature: impl Into<String>, alternate: impl Into<Alternate<T>>) -> Self {
        let signature = signature.into();
        let hash = SignatureHash::of(&signature);
        Self {
            signature,
            hash,
            alternate: RefCell::new(Some(alternate.into())),
            receiver: OnceCell::new(),
            started: Cell::new(false),
            stack_depth: Cell::new(0),
        }
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn hash(&self) -> SignatureHash {
        self.hash
    }

    pub fn receiver(&self) -> Option<&Receiver> {
        self.receiver.get()
    }

    /// Set the owning object. The first receiver sticks; later calls and
    /// `None` change nothing.
    pub fn for_object(&self, receiver: Option<Receiver>) -> &Self {
        if let Some(receiver) = receiver {
            let _ = self.receiver.set(receiver);
        }
        self
    }

    /// Replace what re-entrant calls will receive.
    pub fn and_return(&self, alternate: impl Into<Alternate<T>>) -> &Self {
        *self.alternate.borrow_mut() = Some(alternate.into());
        self
    }

    pub fn depth(&self) -> usize {
        self.stack_depth.get()
    }

    pub fn started(&self) -> bool {
        self.started.get()
    }

    pub fn running(&self) -> bool {
        self.started() && self.depth() > 0
    }

    pub fn finished(&self) -> bool {
        self.started() && !self.running()
    }

    pub fn recursing(&self) -> bool {
        self.running() && self.depth() > 1
    }

    pub fn status(&self) -> CallStatus {
        CallStatus::from_depth(self.started(), self.depth())
    }

    pub fn snapshot(&self) -> RecursionSnapshot {
        RecursionSnapshot {
            signature: self.signature.clone(),
            hash: self.hash,
            status: self.status(),
        }
    }
}

impl<T: Clone> CallState<T> {
    /// Resolve an in-flight call: returns the alternate while the call is
    /// running. A state has no callback of its own, so resolving one that
    /// never started fails.
    pub fn resolve(&self) -> Result<T> {
        self.resolve_with(None::<fn() -> T>)
    }

    pub(crate) fn resolve_with<F>(&self, callback: Option<F>) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        if self.finished() || self.recursing() {
            return Err(GuardError::Recursion(self.snapshot()));
        }

        let _depth = DepthGuard::enter(&self.stack_depth);

        match (self.started(), callback) {
            (false, Some(callback)) => {
                self.started.set(true);
                Ok(callback())
            }
            (false, None) => Err(GuardError::Recursion(self.snapshot())),
            (true, _) => self.resolve_alternate(),
        }
    }

    fn resolve_alternate(&self) -> Result<T> {
        if let Some(Alternate::Value(value)) = &*self.alternate.borrow() {
            return Ok(value.clone());
        }

        let producer = self.alternate.borrow_mut().take();
        match producer {
            Some(Alternate::Producer(producer)) => {
                let value = producer();
                *self.alternate.borrow_mut() = Some(Alternate::Value(value.clone()));
                Ok(value)
            }
            Some(Alternate::Value(value)) => {
                let out = value.clone();
                *self.alternate.borrow_mut() = Some(Alternate::Value(value));
                Ok(out)
            }
            // A producer that panicked leaves nothing behind.
            None => Err(GuardError::Recursion(self.snapshot())),
        }
    }
}

impl<T> fmt::Debug for CallState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallState")
            .field("signature", &self.signature)
            .field("hash", &self.hash)
            .field("receiver", &self.receiver.get())
            .field("status", &self.status())
            .field("depth", &self.depth())
            .finish()
    }
}

/// A callback guarded against re-entrant invocation.
pub struct Recursable<'a, T> {
    state: Rc<CallState<T>>,
    callback: Cell<Option<Box<dyn FnOnce() -> T + 'a>>>,
}

impl<'a, T> Recursable<'a, T> {
    /// Wrap `callback`. An empty `signature` is derived from the callback's
    /// type and the caller's location.
    #[track_caller]
    pub fn new<F>(callback: F, alternate: impl Into<Alternate<T>>, signature: impl Into<String>) -> Self
    where
        F: FnOnce() -> T + 'a,
    {
        let mut signature = signature.into();
        if signature.is_empty() {
            signature = RecursionContext::from_function(&FunctionRef::of(&callback)).signature().to_string();
        }
        Self::with_state(callback, CallState::new(signature, alternate))
    }

    pub(crate) fn with_state<F>(callback: F, state: CallState<T>) -> Self
    where
        F: FnOnce() -> T + 'a,
    {
        Self {
            state: Rc::new(state),
            callback: Cell::new(Some(Box::new(callback))),
        }
    }

    /// Shared state, as tracked while the call is in flight.
    pub fn state(&self) -> &Rc<CallState<T>> {
        &self.state
    }

    pub fn signature(&self) -> &str {
        self.state.signature()
    }

    pub fn hash(&self) -> SignatureHash {
        self.state.hash()
    }

    pub fn receiver(&self) -> Option<&Receiver> {
        self.state.receiver()
    }

    pub fn for_object(&self, receiver: Option<Receiver>) -> &Self {
        self.state.for_object(receiver);
        self
    }

    pub fn and_return(&self, alternate: impl Into<Alternate<T>>) -> &Self {
        self.state.and_return(alternate);
        self
    }

    pub fn started(&self) -> bool {
        self.state.started()
    }

    pub fn running(&self) -> bool {
        self.state.running()
    }

    pub fn finished(&self) -> bool {
        self.state.finished()
    }

    pub fn recursing(&self) -> bool {
        self.state.recursing()
    }

    pub fn status(&self) -> CallStatus {
        self.state.status()
    }
}

impl<T: Clone> Recursable<'_, T> {
    /// Run the callback on first entry; hand out the alternate on re-entry.
    pub fn resolve(&self) -> Result<T> {
        let callback = if self.state.started() { None } else { self.callback.take() };
        self.state.resolve_with(callback)
    }

    /// Alias of [`Recursable::resolve`].
    pub fn invoke(&self) -> Result<T> {
        self.resolve()
    }
}

impl<T> fmt::Debug for Recursable<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recursable").field("state", &self.state).finish_non_exhaustive()
    }
}
