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

use crate::callable::FunctionRef;
use crate::receiver::Receiver;
use crate::signature::{self, SignatureHash};

/// Call site identity derived from a trace or a callable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecursionContext {
    file: String,
    class: String,
    function: String,
    line: u32,
    receiver: Option<Receiver>,
    signature: String,
}

impl RecursionContext {
    pub fn new(file: impl Into<String>, class: impl Into<String>, function: impl Into<String>, line: u32, receiver: Option<Receiver>) -> Self {
        let file = file.into();
        let class = class.into();
        let function = function.into();
        let signature = signature::render(&file, &class, &function, line);
        Self {
            file,
            class,
            function,
            line,
            receiver,
            signature,
        }
    }

    /// Context of a function reference. Closures have no usable name, so
    /// their signature falls back to the line they were referenced on.
    pub fn from_function(function: &FunctionRef) -> Self {
        let name = if function.is_closure() { "" } else { function.name() };
        Self::new(function.file(), function.scope().unwrap_or(""), name, function.line(), function.receiver().cloned())
    }

    /// Replace the derived signature. An empty string keeps the derived one.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        let signature = signature.into();
        if !signature.is_empty() {
            self.signature = signature;
        }
        self
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn receiver(&self) -> Option<&Receiver> {
        self.receiver.as_ref()
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn hash(&self) -> SignatureHash {
        SignatureHash::of(&self.signature)
    }

    pub fn is_empty(&self) -> bool {
        self.file.is_empty() && self.class.is_empty() && self.function.is_empty() && self.line == 0 && self.receiver.is_none()
    }
}
