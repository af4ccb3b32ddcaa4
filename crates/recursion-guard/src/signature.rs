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

//! Signature rendering and hashing
//!
//! A signature is the string `file:class@function`. Its hash is the key the
//! tracker stores in-flight calls under.

use std::fmt;

/// Length in bytes of a [`SignatureHash`].
pub const SIGNATURE_HASH_LEN: usize = 16;

const CLOSURE_SEGMENT: &str = "{{closure}}";

/// 128-bit BLAKE3 digest of a signature string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignatureHash([u8; SIGNATURE_HASH_LEN]);

impl SignatureHash {
    pub fn of(signature: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(signature.as_bytes());
        let mut out = [0u8; SIGNATURE_HASH_LEN];
        hasher.finalize_xof().fill(&mut out);
        SignatureHash(out)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for SignatureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for SignatureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureHash({})", self.to_hex())
    }
}

/// Render `file:class@function`, falling back to the line when there is no
/// function and dropping `class@` when there is no class.
pub fn render(file: &str, class: &str, function: &str, line: u32) -> String {
    let mut signature = String::with_capacity(file.len() + class.len() + function.len() + 8);
    signature.push_str(file);
    signature.push(':');
    if !class.is_empty() {
        signature.push_str(class);
        signature.push('@');
    }
    if function.is_empty() {
        signature.push_str(&line.to_string());
    } else {
        signature.push_str(function);
    }
    signature
}

/// Whether a type path names a closure rather than a named function.
pub fn is_closure_path(path: &str) -> bool {
    path.ends_with(CLOSURE_SEGMENT)
}

/// Strip trailing closure segments, leaving the named function that
/// encloses them.
pub fn enclosing_path(path: &str) -> &str {
    let mut path = path;
    while let Some(stripped) = path.strip_suffix(CLOSURE_SEGMENT) {
        path = stripped.strip_suffix("::").unwrap_or(stripped);
    }
    path
}

/// Split a function path into its owning path (module or type) and the
/// function name.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind("::") {
        Some(at) => (&path[..at], &path[at + 2..]),
        None => ("", path),
    }
}
