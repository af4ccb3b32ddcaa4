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

//! Owner identity
//!
//! A [`Receiver`] names the object a guarded call belongs to. Recursion is
//! tracked per receiver, so two owners never observe each other's in-flight
//! calls even when their signatures match.
//!
//! Receivers never own the object they name. A receiver built from an `Rc`
//! keeps only a `Weak` handle, which lets the tracker notice that the owner
//! is gone and drop its bucket.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

/// Identity of an owning object: its address together with its type.
///
/// The type keeps a struct apart from a field stored at offset zero, which
/// shares its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId {
    address: usize,
    type_id: TypeId,
}

impl ScopeId {
    fn of<T: ?Sized + Any>(value: *const T) -> Self {
        Self {
            address: value as *const () as usize,
            type_id: TypeId::of::<T>(),
        }
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

/// Non-owning reference to the object a guarded call is scoped to.
#[derive(Clone)]
pub struct Receiver {
    id: ScopeId,
    type_name: &'static str,
    liveness: Option<Weak<dyn Any>>,
}

impl Receiver {
    /// Identify `value` by its address and type.
    ///
    /// The identity is only meaningful while `value` stays where it is, which
    /// holds for the duration of a guarded call made through the borrow.
    /// Distinct zero-sized values of one type may share an address, and then
    /// share an identity too. Give such owners a field, or scope them by an
    /// `Rc`.
    pub fn of<T: ?Sized + Any>(value: &T) -> Self {
        Self {
            id: ScopeId::of(value as *const T),
            type_name: std::any::type_name::<T>(),
            liveness: None,
        }
    }

    /// Identify the allocation behind `value`, observing it weakly.
    pub fn from_rc<T: Any>(value: &Rc<T>) -> Self {
        let weak: Weak<dyn Any> = Rc::downgrade(value) as Weak<dyn Any>;
        Self {
            id: ScopeId::of(Rc::as_ptr(value)),
            type_name: std::any::type_name::<T>(),
            liveness: Some(weak),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the receiver's liveness is observable (built from an `Rc`).
    pub fn is_weak(&self) -> bool {
        self.liveness.is_some()
    }

    /// False once an `Rc`-backed owner has been dropped. Borrow-backed
    /// receivers are always reported alive.
    pub fn is_alive(&self) -> bool {
        match &self.liveness {
            Some(weak) => weak.strong_count() > 0,
            None => true,
        }
    }

    /// Upgrade an `Rc`-backed receiver to its owner, if still alive.
    pub fn upgrade(&self) -> Option<Rc<dyn Any>> {
        self.liveness.as_ref().and_then(Weak::upgrade)
    }
}

impl<T: Any> From<&Rc<T>> for Receiver {
    fn from(value: &Rc<T>) -> Self {
        Receiver::from_rc(value)
    }
}

impl PartialEq for Receiver {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Receiver {}

impl Hash for Receiver {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("address", &format_args!("{:#x}", self.id.address))
            .field("type", &self.type_name)
            .field("alive", &self.is_alive())
            .finish()
    }
}
