//-
// Copyright (c) 2026, The Postern Authors
//
// This file is part of Postern.
//
// Postern is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Postern is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Postern. If not, see <http://www.gnu.org/licenses/>.

//! Reassembly of logical lines from arbitrarily fragmented input.

use std::collections::VecDeque;
use std::mem;

/// Accumulates raw chunks of input and produces complete lines.
///
/// Lines are delimited by a single LF. A CR immediately before the LF is
/// stripped, so both DOS and UNIX line endings are understood. No limit is
/// placed on the length of a line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    /// The start of a line whose delimiter has not been seen yet.
    partial: Vec<u8>,
    /// Complete lines which were split off but not yet taken by the caller.
    ///
    /// This is only non-empty if a `Lines` iterator was dropped before being
    /// exhausted.
    ready: VecDeque<Vec<u8>>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `data` to the buffer, returning an iterator over the lines it
    /// completes.
    ///
    /// Only `data` is scanned for delimiters; bytes retained from earlier
    /// calls are known not to contain any. If the iterator is dropped early,
    /// the lines it did not yield are kept and will be yielded first by the
    /// next call.
    pub fn feed<'a>(&'a mut self, data: &'a [u8]) -> Lines<'a> {
        Lines { buffer: self, data }
    }

    /// The bytes of the current incomplete line.
    pub fn partial(&self) -> &[u8] {
        &self.partial
    }

    /// Whether any input is buffered, either as a partial line or as complete
    /// lines not yet consumed.
    pub fn is_empty(&self) -> bool {
        self.partial.is_empty() && self.ready.is_empty()
    }

    /// Discards everything buffered.
    pub fn clear(&mut self) {
        self.partial.clear();
        self.ready.clear();
    }

    fn complete_line(&mut self, tail: &[u8]) -> Vec<u8> {
        let mut line = if self.partial.is_empty() {
            tail.to_vec()
        } else {
            let mut line = mem::take(&mut self.partial);
            line.extend_from_slice(tail);
            line
        };

        if Some(&b'\r') == line.last() {
            line.pop();
        }

        line
    }
}

/// Iterator over the lines completed by one call to [`LineBuffer::feed`].
pub struct Lines<'a> {
    buffer: &'a mut LineBuffer,
    data: &'a [u8],
}

impl Iterator for Lines<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if let Some(line) = self.buffer.ready.pop_front() {
            return Some(line);
        }

        match memchr::memchr(b'\n', self.data) {
            Some(eol) => {
                let line = self.buffer.complete_line(&self.data[..eol]);
                self.data = &self.data[eol + 1..];
                Some(line)
            },

            None => {
                self.buffer.partial.extend_from_slice(self.data);
                self.data = &[];
                None
            },
        }
    }
}

impl Drop for Lines<'_> {
    fn drop(&mut self) {
        while let Some(eol) = memchr::memchr(b'\n', self.data) {
            let line = self.buffer.complete_line(&self.data[..eol]);
            self.buffer.ready.push_back(line);
            self.data = &self.data[eol + 1..];
        }

        self.buffer.partial.extend_from_slice(self.data);
    }
}
