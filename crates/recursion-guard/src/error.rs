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

//! Error types for the recursion guard

use std::fmt;

use thiserror::Error;

use crate::data::frame::FrameSource;
use crate::signature::SignatureHash;

pub type Result<T> = std::result::Result<T, GuardError>;

/// Errors raised while building or resolving guarded calls.
#[derive(Error, Debug, Clone)]
pub enum GuardError {
    /// A signature could not be derived from a backtrace or callable.
    #[error("{message}")]
    InvalidContext { message: String, input: String },

    /// A trace was built from elements that cannot be coerced into frames.
    #[error("Invalid trace frame(s) provided: {}", render_invalid(.trace, .invalid))]
    InvalidTrace { trace: Vec<FrameSource>, invalid: Vec<usize> },

    /// A guarded call was resolved in a state that does not allow it.
    #[error("{0}")]
    Recursion(RecursionSnapshot),

    /// An in-flight call with the same owner and hash returns a different type.
    #[error("Guarded call [{signature}] is already in flight with a return type other than {expected}")]
    SignatureConflict { signature: String, expected: &'static str },
}

impl GuardError {
    pub(crate) fn empty_trace(input: impl fmt::Debug) -> Self {
        GuardError::InvalidContext {
            message: "Empty backtrace provided.".to_string(),
            input: format!("{:?}", input),
        }
    }

    pub(crate) fn invalid_context(input: impl fmt::Debug) -> Self {
        GuardError::InvalidContext {
            message: "Invalid context provided.".to_string(),
            input: format!("{:?}", input),
        }
    }

    pub(crate) fn unknown_method(class: &str, method: &str) -> Self {
        GuardError::InvalidContext {
            message: format!("Unknown method [{}::{}].", class, method),
            input: format!("{}::{}", class, method),
        }
    }

    /// The full input of an `InvalidTrace` error.
    pub fn invalid_trace(&self) -> Option<&[FrameSource]> {
        match self {
            GuardError::InvalidTrace { trace, .. } => Some(trace),
            _ => None,
        }
    }

    /// The offending elements of an `InvalidTrace` error, with their positions.
    pub fn invalid_frames(&self) -> Vec<(usize, &FrameSource)> {
        match self {
            GuardError::InvalidTrace { trace, invalid } => invalid.iter().filter_map(|&i| trace.get(i).map(|source| (i, source))).collect(),
            _ => Vec::new(),
        }
    }

    /// The guarded call carried by a `Recursion` error.
    pub fn recursion(&self) -> Option<&RecursionSnapshot> {
        match self {
            GuardError::Recursion(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

fn render_invalid(trace: &[FrameSource], invalid: &[usize]) -> String {
    let parts: Vec<String> = invalid.iter().filter_map(|&i| trace.get(i).map(|source| format!("#{} {:?}", i, source))).collect();
    format!("[{}]", parts.join(", "))
}

/// Lifecycle of a guarded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallStatus {
    NotStarted,
    Running,
    Recursing,
    Finished,
}

impl CallStatus {
    /// Derive the status from the started flag and the current stack depth.
    pub fn from_depth(started: bool, depth: usize) -> Self {
        match (started, depth) {
            (false, _) => CallStatus::NotStarted,
            (true, 0) => CallStatus::Finished,
            (true, 1) => CallStatus::Running,
            (true, _) => CallStatus::Recursing,
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::NotStarted => write!(f, "not started"),
            CallStatus::Running => write!(f, "running"),
            CallStatus::Recursing => write!(f, "recursing"),
            CallStatus::Finished => write!(f, "finished"),
        }
    }
}

/// The state of a guarded call at the moment it was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecursionSnapshot {
    pub signature: String,
    pub hash: SignatureHash,
    pub status: CallStatus,
}

impl fmt::Display for RecursionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            CallStatus::Finished => write!(f, "Call stack for [{}] has completed.", self.signature),
            CallStatus::Recursing => write!(f, "Callback for [{}] has been called while resolving return value.", self.signature),
            CallStatus::Running => write!(f, "Callback for [{}] has been called recursively.", self.signature),
            CallStatus::NotStarted => write!(f, "Call stack for [{}] has not commenced.", self.signature),
        }
    }
}
