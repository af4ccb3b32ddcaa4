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

//! # Recursion Guard
//!
//! Guards a callback against being re-entered while it is still running on
//! the same call stack. A nested call with the same owner and signature does
//! not run the callback again: it receives an alternate value instead.
//!
//! A guarded callback may itself return a [`Result`], which lets errors from
//! nested guards travel back out through `?`:
//!
//! ```
//! use recursion_guard::{Result, guard};
//!
//! fn fib(n: i64) -> Result<i64> {
//!     let floor = if n == 0 { 1 } else { n.max(0) };
//!     let alternate: Result<i64> = Ok(floor);
//!     guard!(|| -> Result<i64> { Ok(fib(n - 1)? + fib(n - 2)?) }, alternate, as = format!("fib({})", floor))?
//! }
//!
//! assert_eq!(fib(10).unwrap(), 55);
//! ```
//!
//! ## Layout
//!
//! - [`data`]: frames, traces and call contexts
//! - [`signature`]: signature rendering and hashing
//! - [`callable`]: descriptions of the things that can be guarded
//! - [`recursable`]: a single guarded call and its state machine
//! - [`recurser`]: the registry of calls in flight
//! - [`factory`]: construction of all of the above

pub mod callable;
pub mod config;
pub mod data;
pub mod error;
pub mod factory;
pub mod receiver;
pub mod recursable;
pub mod recurser;
pub mod signature;

pub use callable::{Callable, ClassDescriptor, FunctionRef, Introspect, MethodInfo, MethodTarget};
pub use config::RecurserConfig;
pub use data::{FieldMap, FieldValue, Frame, FrameSource, RecursionContext, Trace, TraceSource};
pub use error::{CallStatus, GuardError, RecursionSnapshot, Result};
pub use factory::{DefaultFactory, Factory};
pub use receiver::{Receiver, ScopeId};
pub use recursable::{Alternate, CallState, Recursable};
pub use recurser::Recurser;
pub use signature::SignatureHash;

/// Run `callback` guarded by the caller's file and line on the thread's
/// shared [`Recurser`].
///
/// Calls on different lines of one function get different signatures. Use
/// [`guard!`] to key by the enclosing function instead.
#[track_caller]
pub fn call<'a, T, C>(callback: C, alternate: impl Into<Alternate<T>>, owner: Option<Receiver>, signature: Option<&str>) -> Result<T>
where
    T: Clone + 'static,
    C: FnOnce() -> T + 'a,
{
    Recurser::call(callback, alternate, owner, signature)
}

/// Drop the thread's shared [`Recurser`].
pub fn flush() {
    Recurser::flush();
}

/// Path of the function the macro is expanded in, with closure segments
/// removed.
#[macro_export]
macro_rules! enclosing_function {
    () => {{
        fn __here() {}
        fn __type_name_of<T>(_: T) -> &'static str {
            ::core::any::type_name::<T>()
        }
        let name = __type_name_of(__here);
        $crate::signature::enclosing_path(name.strip_suffix("::__here").unwrap_or(name))
    }};
}

/// Guard a callback on the thread's shared [`Recurser`].
///
/// The signature is the calling file plus the enclosing function, so every
/// guard in one function shares it unless `as = ...` is given. `for = ...`
/// scopes the guard to an owner ([`Receiver`]).
///
/// ```
/// use recursion_guard::{Receiver, Result, guard};
///
/// struct Node {
///     next: Option<Box<Node>>,
/// }
///
/// impl Node {
///     fn len(&self) -> Result<usize> {
///         let count = || -> Result<usize> {
///             match &self.next {
///                 Some(next) => Ok(1 + next.len()?),
///                 None => Ok(1),
///             }
///         };
///         let empty: Result<usize> = Ok(0);
///         guard!(count, empty, for = Receiver::of(self))?
///     }
/// }
///
/// let list = Node { next: Some(Box::new(Node { next: None })) };
/// assert_eq!(list.len().unwrap(), 2);
/// ```
#[macro_export]
macro_rules! guard {
    ($callback:expr, $alternate:expr $(, for = $owner:expr)? $(, as = $signature:expr)? $(,)?) => {{
        let owner: ::core::option::Option<$crate::Receiver> = $crate::__guard_option!($($owner)?);
        let signature: ::core::option::Option<::std::string::String> = $crate::__guard_option!($(::std::string::ToString::to_string(&$signature))?);
        let trace = $crate::Trace::from_frames(::std::vec![
            $crate::Frame::new(::core::file!(), "", "", ::core::line!(), ::core::option::Option::None),
            $crate::Frame::from_path($crate::enclosing_function!(), owner.clone()),
        ]);
        $crate::Recurser::call_traced($callback, $alternate, owner, signature.as_deref(), trace)
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __guard_option {
    () => {
        ::core::option::Option::None
    };
    ($value:expr) => {
        ::core::option::Option::Some($value)
    };
}
