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

//! Callable shapes and the metadata they are identified by
//!
//! Rust has no runtime reflection over closures, so every callable carries
//! its identity explicitly:
//!
//! - [`FunctionRef`]: a function or closure, named by its type and located
//!   where the reference was taken
//! - [`Callable::Method`]: a declared method on an object or a class
//! - [`Callable::Invokable`]: an object whose `invoke` method is the call

use std::any::Any;
use std::fmt;
use std::panic::Location;

use crate::receiver::Receiver;
use crate::signature::is_closure_path;

/// Method looked up on invokable objects.
pub const INVOKE_METHOD: &str = "invoke";

/// A declared method and the line it starts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: &'static str,
    pub line: u32,
}

impl MethodInfo {
    pub const fn new(name: &'static str, line: u32) -> Self {
        Self { name, line }
    }
}

/// Static description of a type and its methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassDescriptor {
    pub name: &'static str,
    pub file: &'static str,
    pub methods: &'static [MethodInfo],
}

impl ClassDescriptor {
    pub const fn new(name: &'static str, file: &'static str, methods: &'static [MethodInfo]) -> Self {
        Self { name, file, methods }
    }

    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|method| method.name == name)
    }
}

/// Objects that can describe themselves for signature derivation.
pub trait Introspect: Any {
    fn descriptor(&self) -> &'static ClassDescriptor;

    /// Identity used when the object owns the guarded call. Defaults to the
    /// object's address and concrete type.
    fn receiver(&self) -> Receiver {
        Receiver::of(self)
    }
}

/// A function or closure, identified by its type name and location.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionRef {
    name: &'static str,
    file: &'static str,
    line: u32,
    scope: Option<&'static str>,
    receiver: Option<Receiver>,
}

impl FunctionRef {
    /// Reference `function`, located at the caller.
    #[track_caller]
    pub fn of<F>(_function: &F) -> Self {
        Self::located::<F>(Location::caller())
    }

    /// Reference a value of type `F` defined at `location`.
    pub fn located<F>(location: &'static Location<'static>) -> Self {
        Self::new(std::any::type_name::<F>(), location.file(), location.line())
    }

    pub fn new(name: &'static str, file: &'static str, line: u32) -> Self {
        Self {
            name,
            file,
            line,
            scope: None,
            receiver: None,
        }
    }

    /// Attach the type the function is declared in.
    pub fn scoped(mut self, class: &'static str) -> Self {
        self.scope = Some(class);
        self
    }

    /// Attach the object the function is bound to.
    pub fn bound(mut self, receiver: Receiver) -> Self {
        self.receiver = Some(receiver);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn file(&self) -> &'static str {
        self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn scope(&self) -> Option<&'static str> {
        self.scope
    }

    pub fn receiver(&self) -> Option<&Receiver> {
        self.receiver.as_ref()
    }

    pub fn is_closure(&self) -> bool {
        is_closure_path(self.name)
    }
}

/// Where a method lives: on an object (bound) or on a class (unbound).
#[derive(Clone, Copy)]
pub enum MethodTarget<'c> {
    Object(&'c dyn Introspect),
    Class(&'static ClassDescriptor),
}

impl MethodTarget<'_> {
    pub fn descriptor(&self) -> &'static ClassDescriptor {
        match self {
            MethodTarget::Object(object) => object.descriptor(),
            MethodTarget::Class(class) => *class,
        }
    }
}

impl fmt::Debug for MethodTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodTarget::Object(object) => write!(f, "Object({})", object.descriptor().name),
            MethodTarget::Class(class) => write!(f, "Class({})", class.name),
        }
    }
}

/// The shapes a guarded callback can be identified by.
#[derive(Clone)]
pub enum Callable<'c> {
    Function(FunctionRef),
    Method(MethodTarget<'c>, &'c str),
    Invokable(&'c dyn Introspect),
}

impl<'c> Callable<'c> {
    pub fn method(object: &'c dyn Introspect, name: &'c str) -> Self {
        Callable::Method(MethodTarget::Object(object), name)
    }

    pub fn static_method(class: &'static ClassDescriptor, name: &'c str) -> Self {
        Callable::Method(MethodTarget::Class(class), name)
    }
}

impl From<FunctionRef> for Callable<'_> {
    fn from(function: FunctionRef) -> Self {
        Callable::Function(function)
    }
}

impl fmt::Debug for Callable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Function(function) => f.debug_tuple("Function").field(function).finish(),
            Callable::Method(target, name) => f.debug_tuple("Method").field(target).field(name).finish(),
            Callable::Invokable(object) => write!(f, "Invokable({})", object.descriptor().name),
        }
    }
}
