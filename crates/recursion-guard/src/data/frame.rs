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

//! Call stack frames

use std::collections::BTreeMap;
use std::panic::Location;

use crate::receiver::Receiver;
use crate::signature::{enclosing_path, split_path};

/// Keys a frame is extracted from. Anything else in a field map is ignored.
pub const FRAME_FIELDS: [&str; 5] = ["file", "class", "function", "line", "object"];

/// Loosely typed value of a raw frame field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Object(Receiver),
    List(Vec<FieldValue>),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<Receiver> for FieldValue {
    fn from(value: Receiver) -> Self {
        FieldValue::Object(value)
    }
}

/// Raw frame, keyed by field name.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Anything a trace can be built from.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameSource {
    Frame(Frame),
    Fields(FieldMap),
    Value(FieldValue),
}

impl FrameSource {
    /// Build a field map source from key/value pairs.
    pub fn fields<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        FrameSource::Fields(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<Frame> for FrameSource {
    fn from(frame: Frame) -> Self {
        FrameSource::Frame(frame)
    }
}

impl From<FieldMap> for FrameSource {
    fn from(fields: FieldMap) -> Self {
        FrameSource::Fields(fields)
    }
}

impl From<FieldValue> for FrameSource {
    fn from(value: FieldValue) -> Self {
        FrameSource::Value(value)
    }
}

/// One entry of a call stack.
///
/// A frame is empty when every field holds its default: empty file, class
/// and function, line zero and no receiver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    file: String,
    class: String,
    function: String,
    line: u32,
    receiver: Option<Receiver>,
}

impl Frame {
    pub fn new(file: impl Into<String>, class: impl Into<String>, function: impl Into<String>, line: u32, receiver: Option<Receiver>) -> Self {
        Self {
            file: file.into(),
            class: class.into(),
            function: function.into(),
            line,
            receiver,
        }
    }

    /// Frame for a source location, with no callee information.
    pub fn at(location: &Location<'_>) -> Self {
        Self::new(location.file(), "", "", location.line(), None)
    }

    /// Frame for the named function at `path`, e.g. `app::List::children`.
    /// Trailing closure segments are dropped so a closure reports the
    /// function it was defined in.
    pub fn from_path(path: &str, receiver: Option<Receiver>) -> Self {
        let (class, function) = split_path(enclosing_path(path));
        Self::new("", class, function, 0, receiver)
    }

    /// Coerce a frame source, or `None` when it is not frame-shaped.
    pub fn make(source: &FrameSource) -> Option<Self> {
        match source {
            FrameSource::Frame(frame) => Some(frame.clone()),
            FrameSource::Fields(fields) => Self::from_fields(fields),
            FrameSource::Value(_) => None,
        }
    }

    /// Extract the recognised fields of a field map. Unknown keys are
    /// ignored, missing or null keys take their default, and a recognised
    /// key holding the wrong kind of value makes the map non-coercible.
    pub fn from_fields(fields: &FieldMap) -> Option<Self> {
        let mut frame = Frame::default();
        for key in FRAME_FIELDS {
            let Some(value) = fields.get(key) else {
                continue;
            };
            match (key, value) {
                (_, FieldValue::Null) => {}
                ("file", FieldValue::Str(s)) => frame.file = s.clone(),
                ("class", FieldValue::Str(s)) => frame.class = s.clone(),
                ("function", FieldValue::Str(s)) => frame.function = s.clone(),
                ("line", FieldValue::Int(n)) => frame.line = u32::try_from(*n).ok()?,
                ("object", FieldValue::Object(receiver)) => frame.receiver = Some(receiver.clone()),
                _ => return None,
            }
        }
        Some(frame)
    }

    /// Back to a field map holding every recognised key.
    pub fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("file".to_string(), FieldValue::Str(self.file.clone()));
        fields.insert("class".to_string(), FieldValue::Str(self.class.clone()));
        fields.insert("function".to_string(), FieldValue::Str(self.function.clone()));
        fields.insert("line".to_string(), FieldValue::from(self.line));
        fields.insert("object".to_string(), self.receiver.clone().map_or(FieldValue::Null, FieldValue::Object));
        fields
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

    pub fn is_empty(&self) -> bool {
        self.file.is_empty() && self.class.is_empty() && self.function.is_empty() && self.line == 0 && self.receiver.is_none()
    }
}
