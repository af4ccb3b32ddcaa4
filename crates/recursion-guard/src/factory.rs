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

//! Construction of frames, traces, contexts and guarded calls
//!
//! Every step is a provided method on [`Factory`], so an implementation can
//! replace any one of them and keep the rest. [`Factory::make_recursable`]
//! fixes the order they are composed in: an explicit signature wins, then a
//! backtrace, then the callable itself.

use crate::callable::{Callable, FunctionRef, INVOKE_METHOD, Introspect, MethodTarget};
use crate::data::{Frame, FrameSource, RecursionContext, Trace, TraceSource};
use crate::error::{GuardError, Result};
use crate::receiver::Receiver;
use crate::recursable::{Alternate, CallState, Recursable};

/// Builds the pieces of a guarded call.
pub trait Factory {
    fn make_frame(&self, source: &FrameSource) -> Option<Frame> {
        Frame::make(source)
    }

    fn make_trace(&self, source: TraceSource) -> Result<Trace> {
        match source {
            TraceSource::Trace(trace) => Trace::with(trace.into_frames().into_iter().map(FrameSource::Frame).collect(), |source| self.make_frame(source)),
            TraceSource::Frames(sources) => Trace::with(sources, |source| self.make_frame(source)),
        }
    }

    /// Context from a backtrace when one is given, otherwise from the callable.
    fn make_context(&self, callable: &Callable<'_>, backtrace: Option<TraceSource>) -> Result<RecursionContext> {
        match backtrace {
            Some(source) if !source.is_absent() => self.make_context_from_trace(&self.make_trace(source)?),
            _ => self.make_context_from_callable(callable),
        }
    }

    /// The first non-empty frame is the caller (file and line), the one
    /// after it the callee (class, function and receiver).
    fn make_context_from_trace(&self, trace: &Trace) -> Result<RecursionContext> {
        let mut frames = trace.frames(false);
        let Some(caller) = frames.next() else {
            return Err(GuardError::empty_trace(trace));
        };

        let context = match frames.next() {
            Some(called) => RecursionContext::new(caller.file(), called.class(), called.function(), caller.line(), called.receiver().cloned()),
            None => RecursionContext::new(caller.file(), "", "", caller.line(), None),
        };
        Ok(context)
    }

    fn make_context_from_callable(&self, callable: &Callable<'_>) -> Result<RecursionContext> {
        match callable {
            Callable::Function(function) => self.make_context_from_function(function),
            Callable::Method(target, method) => self.make_context_from_method(target, method),
            Callable::Invokable(object) => self.make_context_from_object(*object),
        }
    }

    fn make_context_from_function(&self, function: &FunctionRef) -> Result<RecursionContext> {
        if function.name().is_empty() {
            return Err(GuardError::invalid_context(function));
        }
        Ok(RecursionContext::from_function(function))
    }

    fn make_context_from_object(&self, object: &dyn Introspect) -> Result<RecursionContext> {
        let class = object.descriptor();
        let Some(method) = class.method(INVOKE_METHOD) else {
            return Err(GuardError::invalid_context(Callable::Invokable(object)));
        };
        let receiver = object.receiver();
        Ok(RecursionContext::new(class.file, class.name, method.name, method.line, Some(receiver)))
    }

    fn make_context_from_method(&self, target: &MethodTarget<'_>, method: &str) -> Result<RecursionContext> {
        let class = target.descriptor();
        let Some(info) = class.method(method) else {
            return Err(GuardError::unknown_method(class.name, method));
        };
        let receiver = match target {
            MethodTarget::Object(object) => Some(object.receiver()),
            MethodTarget::Class(_) => None,
        };
        Ok(RecursionContext::new(class.file, class.name, info.name, info.line, receiver))
    }

    /// Build a guarded call for `callback`, identified by `callable`.
    ///
    /// The signature is `signature` if non-empty, else derived from
    /// `backtrace` if it carries frames, else from `callable`. The owner is
    /// `object`, falling back to the receiver found while deriving the
    /// context.
    fn make_recursable<'a, T, F>(
        &self,
        callback: F,
        callable: &Callable<'_>,
        alternate: impl Into<Alternate<T>>,
        object: Option<Receiver>,
        signature: Option<&str>,
        backtrace: Option<TraceSource>,
    ) -> Result<Recursable<'a, T>>
    where
        Self: Sized,
        F: FnOnce() -> T + 'a,
    {
        let context = self.make_context(callable, backtrace)?;
        let signature = match signature {
            Some(signature) if !signature.is_empty() => signature.to_string(),
            _ => context.signature().to_string(),
        };

        let recursable = Recursable::with_state(callback, CallState::new(signature, alternate));
        recursable.for_object(object.or_else(|| context.receiver().cloned()));
        Ok(recursable)
    }
}

/// Factory with every step at its default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFactory;

impl DefaultFactory {
    pub fn new() -> Self {
        DefaultFactory
    }
}

impl Factory for DefaultFactory {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::{ClassDescriptor, MethodInfo};
    use crate::data::{FieldMap, FieldValue};

    static REPEATER: ClassDescriptor = ClassDescriptor::new("app::Repeater", "src/repeater.rs", &[MethodInfo::new("invoke", 21), MethodInfo::new("repeat", 30)]);
    static PLAIN: ClassDescriptor = ClassDescriptor::new("app::Plain", "src/plain.rs", &[MethodInfo::new("run", 5)]);

    struct Repeater;

    impl Introspect for Repeater {
        fn descriptor(&self) -> &'static ClassDescriptor {
            &REPEATER
        }
    }

    struct Plain;

    impl Introspect for Plain {
        fn descriptor(&self) -> &'static ClassDescriptor {
            &PLAIN
        }
    }

    fn noop() -> i32 {
        0
    }

    #[test]
    fn test_context_from_two_frame_trace() {
        let owner = 9u32;
        let trace = Trace::from_frames(vec![
            Frame::new("src/list.rs", "recursion_guard::Recurser", "call", 14, None),
            Frame::new("src/other.rs", "app::List", "children", 90, Some(Receiver::of(&owner))),
        ]);

        let context = DefaultFactory.make_context_from_trace(&trace).unwrap();

        assert_eq!(context.signature(), "src/list.rs:app::List@children");
        assert_eq!(context.line(), 14);
        assert_eq!(context.receiver(), Some(&Receiver::of(&owner)));
    }

    #[test]
    fn test_context_from_single_frame_uses_line() {
        let trace = Trace::from_frames(vec![Frame::new("src/fib.rs", "", "", 8, None)]);
        let context = DefaultFactory.make_context_from_trace(&trace).unwrap();

        assert_eq!(context.signature(), "src/fib.rs:8");
        assert!(context.receiver().is_none());
    }

    #[test]
    fn test_context_skips_leading_empty_frames() {
        let trace = Trace::from_frames(vec![Frame::default(), Frame::new("src/a.rs", "", "", 3, None), Frame::new("", "", "run", 0, None)]);
        let context = DefaultFactory.make_context_from_trace(&trace).unwrap();

        assert_eq!(context.signature(), "src/a.rs:run");
    }

    #[test]
    fn test_empty_trace_is_invalid_context() {
        let sources = vec![FrameSource::Fields(FieldMap::new()), FrameSource::Fields(FieldMap::new())];
        let trace = DefaultFactory.make_trace(TraceSource::Frames(sources)).unwrap();

        assert!(trace.is_empty());
        let error = DefaultFactory.make_context_from_trace(&trace).unwrap_err();
        assert!(matches!(error, GuardError::InvalidContext { .. }));
        assert_eq!(error.to_string(), "Empty backtrace provided.");
    }

    #[test]
    fn test_make_trace_reports_invalid_frames() {
        let sources = vec![FrameSource::fields([("file", "a.rs")]), FrameSource::Value(FieldValue::Bool(true))];
        let error = DefaultFactory.make_trace(TraceSource::Frames(sources)).unwrap_err();

        assert!(matches!(error, GuardError::InvalidTrace { .. }));
        assert_eq!(error.invalid_frames().len(), 1);
    }

    #[test]
    fn test_context_from_invokable() {
        let repeater = Repeater;
        let context = DefaultFactory.make_context_from_callable(&Callable::Invokable(&repeater)).unwrap();

        assert_eq!(context.signature(), "src/repeater.rs:app::Repeater@invoke");
        assert_eq!(context.line(), 21);
        assert_eq!(context.receiver(), Some(&Receiver::of(&repeater)));
    }

    #[test]
    fn test_non_invokable_object_is_invalid() {
        let error = DefaultFactory.make_context_from_callable(&Callable::Invokable(&Plain)).unwrap_err();
        assert_eq!(error.to_string(), "Invalid context provided.");
    }

    #[test]
    fn test_context_from_bound_and_static_methods() {
        let repeater = Repeater;

        let bound = DefaultFactory.make_context_from_callable(&Callable::method(&repeater, "repeat")).unwrap();
        assert_eq!(bound.signature(), "src/repeater.rs:app::Repeater@repeat");
        assert!(bound.receiver().is_some());

        let unbound = DefaultFactory.make_context_from_callable(&Callable::static_method(&REPEATER, "repeat")).unwrap();
        assert_eq!(unbound.signature(), bound.signature());
        assert!(unbound.receiver().is_none());
    }

    #[test]
    fn test_unknown_method_is_invalid() {
        let error = DefaultFactory.make_context_from_callable(&Callable::static_method(&PLAIN, "missing")).unwrap_err();
        assert_eq!(error.to_string(), "Unknown method [app::Plain::missing].");
    }

    #[test]
    fn test_unnamed_function_is_invalid() {
        let error = DefaultFactory.make_context_from_function(&FunctionRef::new("", "a.rs", 1)).unwrap_err();
        assert!(matches!(error, GuardError::InvalidContext { .. }));
    }

    #[test]
    fn test_explicit_signature_wins() {
        let trace = Trace::from_frames(vec![Frame::new("src/a.rs", "", "", 3, None)]);
        let recursable = DefaultFactory
            .make_recursable(noop, &Callable::Function(FunctionRef::of(&noop)), 1, None, Some("fib(3)"), Some(trace.into()))
            .unwrap();

        assert_eq!(recursable.signature(), "fib(3)");
    }

    #[test]
    fn test_backtrace_beats_callable() {
        let trace = Trace::from_frames(vec![Frame::new("src/a.rs", "", "", 3, None)]);
        let recursable = DefaultFactory.make_recursable(noop, &Callable::Function(FunctionRef::of(&noop)), 1, None, None, Some(trace.into())).unwrap();

        assert_eq!(recursable.signature(), "src/a.rs:3");
    }

    #[test]
    fn test_empty_frame_list_falls_back_to_callable() {
        let function = FunctionRef::of(&noop);
        let recursable = DefaultFactory.make_recursable(noop, &Callable::Function(function.clone()), 1, None, Some(""), Some(TraceSource::Frames(vec![]))).unwrap();

        assert_eq!(recursable.signature(), RecursionContext::from_function(&function).signature());
        assert!(recursable.signature().ends_with("factory::tests::noop"));
    }

    #[test]
    fn test_object_overrides_context_receiver() {
        let repeater = Repeater;
        let owner = 3u8;

        let recursable = DefaultFactory.make_recursable(|| 1, &Callable::Invokable(&repeater), 0, Some(Receiver::of(&owner)), None, None).unwrap();
        assert_eq!(recursable.receiver(), Some(&Receiver::of(&owner)));

        let recursable = DefaultFactory.make_recursable(|| 1, &Callable::Invokable(&repeater), 0, None, None, None).unwrap();
        assert_eq!(recursable.receiver(), Some(&Receiver::of(&repeater)));
    }

    struct UpperCaseFactory;

    impl Factory for UpperCaseFactory {
        fn make_frame(&self, source: &FrameSource) -> Option<Frame> {
            let frame = Frame::make(source)?;
            Some(Frame::new(frame.file().to_uppercase(), frame.class(), frame.function(), frame.line(), frame.receiver().cloned()))
        }
    }

    #[test]
    fn test_overridden_step_is_used_in_composition() {
        let sources = vec![FrameSource::fields([("file", FieldValue::from("src/a.rs")), ("line", FieldValue::Int(2))])];
        let recursable = UpperCaseFactory.make_recursable(noop, &Callable::Function(FunctionRef::of(&noop)), 0, None, None, Some(sources.into())).unwrap();

        assert_eq!(recursable.signature(), "SRC/A.RS:2");
    }
}
