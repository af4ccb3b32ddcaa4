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

//! Ordered call stack slices

use crate::data::frame::{Frame, FrameSource};
use crate::error::{GuardError, Result};

/// Ordered sequence of frames, innermost first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    frames: Vec<Frame>,
}

/// Input accepted wherever a backtrace is expected.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceSource {
    Trace(Trace),
    Frames(Vec<FrameSource>),
}

impl TraceSource {
    /// A raw frame list with no elements carries no backtrace at all. A
    /// built `Trace` always counts as one, even when all its frames are empty.
    pub fn is_absent(&self) -> bool {
        matches!(self, TraceSource::Frames(frames) if frames.is_empty())
    }
}

impl From<Trace> for TraceSource {
    fn from(trace: Trace) -> Self {
        TraceSource::Trace(trace)
    }
}

impl From<Vec<FrameSource>> for TraceSource {
    fn from(frames: Vec<FrameSource>) -> Self {
        TraceSource::Frames(frames)
    }
}

impl From<Vec<Frame>> for TraceSource {
    fn from(frames: Vec<Frame>) -> Self {
        TraceSource::Trace(Trace::from_frames(frames))
    }
}

impl Trace {
    /// Coerce every source into a frame. Fails with `InvalidTrace`, naming
    /// each offending element, if any source is not frame-shaped.
    pub fn new(sources: Vec<FrameSource>) -> Result<Self> {
        Self::with(sources, Frame::make)
    }

    /// Same as [`Trace::new`] with a custom frame constructor.
    pub fn with<F>(sources: Vec<FrameSource>, make_frame: F) -> Result<Self>
    where
        F: Fn(&FrameSource) -> Option<Frame>,
    {
        let mut frames = Vec::with_capacity(sources.len());
        let mut invalid = Vec::new();

        for (index, source) in sources.iter().enumerate() {
            match make_frame(source) {
                Some(frame) => frames.push(frame),
                None => invalid.push(index),
            }
        }

        if !invalid.is_empty() {
            return Err(GuardError::InvalidTrace { trace: sources, invalid });
        }

        Ok(Self { frames })
    }

    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    /// Build from either an existing trace (copied) or raw sources.
    pub fn make(source: TraceSource) -> Result<Self> {
        match source {
            TraceSource::Trace(trace) => Ok(trace),
            TraceSource::Frames(sources) => Self::new(sources),
        }
    }

    /// Frames in order. Empty frames are skipped unless `include_empty`.
    pub fn frames(&self, include_empty: bool) -> impl Iterator<Item = &Frame> + Clone + '_ {
        self.frames.iter().filter(move |frame| include_empty || !frame.is_empty())
    }

    /// Frame at `index`, counting empty frames.
    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    /// Number of frames, counting empty ones.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when no frame carries any information.
    pub fn is_empty(&self) -> bool {
        self.frames(false).next().is_none()
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}
