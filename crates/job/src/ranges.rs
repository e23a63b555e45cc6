// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event-range bookkeeping.
//!
//! Work is split into blocks per input file. File sizes are unknown up
//! front: every file starts with a single block of the *zero
//! blocksize* `B0`, and only once a worker has touched the file does
//! its real size become known and the remainder `[B0, n)` enter the
//! pool. Ranges handed to a failed worker are added back and processed
//! again by someone else.

use std::collections::VecDeque;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RangeError {
    #[error("[{0}, {1}) is not an interval")]
    NotAnInterval(u64, u64),
    #[error("operation on an empty range set")]
    Empty,
    #[error("union is not disjoint")]
    Overlap,
    #[error("file {file} already has size {known}, got {given}")]
    InconsistentFileSize { file: usize, known: u64, given: u64 },
    #[error("range [{first}, {last}) lies beyond file {file}")]
    BeyondFile { file: usize, first: u64, last: u64 },
    #[error("unknown file index {0}")]
    UnknownFile(usize),
    #[error("consume called although nothing is available")]
    NothingAvailable,
    #[error("blocksize must be positive")]
    ZeroBlocksize,
}

/// A single event interval within one input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRange {
    pub file_index: usize,
    pub first: u64,
    pub last: u64,
}

/// An ordered set of disjoint, non-empty, half-open intervals.
///
/// Intervals are kept sorted by low edge; adjacent intervals
/// (`b == a'`) are coalesced after every insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRanges {
    intervals: VecDeque<(u64, u64)>,
}

impl IndexRanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// The set `{[from, to)}`; empty when `from == to`.
    pub fn interval(from: u64, to: u64) -> Result<Self, RangeError> {
        if to < from {
            return Err(RangeError::NotAnInterval(from, to));
        }
        let mut result = Self::new();
        if from < to {
            result.intervals.push_back((from, to));
        }
        Ok(result)
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Sum of interval widths.
    pub fn size(&self) -> u64 {
        self.intervals.iter().map(|(a, b)| b - a).sum()
    }

    /// The first full interval, without removing it.
    pub fn peek(&self) -> Result<(u64, u64), RangeError> {
        self.intervals.front().copied().ok_or(RangeError::Empty)
    }

    /// Remove and return the front of the set, at most `maxsize` wide:
    /// `[a, min(b, a + maxsize))`.
    pub fn consume(&mut self, maxsize: u64) -> Result<(u64, u64), RangeError> {
        let front = self.intervals.front_mut().ok_or(RangeError::Empty)?;
        let (a, b) = *front;
        if b - a <= maxsize {
            self.intervals.pop_front();
            Ok((a, b))
        } else {
            front.0 = a + maxsize;
            Ok((a, a + maxsize))
        }
    }

    /// Merge `rhs` in. The sets must be disjoint; adjacent intervals
    /// are coalesced.
    pub fn disjoint_union(&mut self, rhs: &IndexRanges) -> Result<(), RangeError> {
        let mut at = 0;
        for &(lo, hi) in &rhs.intervals {
            // First position whose high end reaches past our low edge.
            while at < self.intervals.len() && self.intervals[at].1 <= lo {
                at += 1;
            }
            if at < self.intervals.len() && self.intervals[at].0 < hi {
                return Err(RangeError::Overlap);
            }
            self.intervals.insert(at, (lo, hi));
        }
        // Coalesce neighbours that now touch.
        let mut i = 0;
        while i + 1 < self.intervals.len() {
            if self.intervals[i].1 == self.intervals[i + 1].0 {
                self.intervals[i].1 = self.intervals[i + 1].1;
                self.intervals.remove(i + 1);
            } else {
                i += 1;
            }
        }
        Ok(())
    }
}

/// Splits a dataset's events into consumable ranges, one pool per input
/// file, without knowing file sizes up front.
#[derive(Debug, Clone)]
pub struct EventRangeManager {
    blocksize0: u64,
    /// `None` until the file's size is reported.
    nevents: Vec<Option<u64>>,
    events_left: Vec<IndexRanges>,
}

impl EventRangeManager {
    pub fn new(nfiles: usize, blocksize0: u64) -> Result<Self, RangeError> {
        if blocksize0 == 0 {
            return Err(RangeError::ZeroBlocksize);
        }
        let mut events_left = Vec::with_capacity(nfiles);
        for _ in 0..nfiles {
            events_left.push(IndexRanges::interval(0, blocksize0)?);
        }
        Ok(Self {
            blocksize0,
            nevents: vec![None; nfiles],
            events_left,
        })
    }

    /// Whether any range is available for consumption.
    pub fn available(&self) -> bool {
        self.events_left.iter().any(|r| !r.is_empty())
    }

    /// Hand out a range, preferring (in order): the caller's
    /// `preferred_file` if it has anything left; a file never processed
    /// so far (size unknown, or size equal to what is left); any file
    /// with a non-empty pool.
    ///
    /// The first block of a file always has width exactly `B0`
    /// regardless of `blocksize`; later blocks use `blocksize` (default
    /// `B0`), bounded by what remains.
    pub fn consume(
        &mut self,
        preferred_file: Option<usize>,
        blocksize: Option<u64>,
    ) -> Result<EventRange, RangeError> {
        let blocksize = blocksize.unwrap_or(self.blocksize0);
        if let Some(preferred) = preferred_file {
            if preferred >= self.events_left.len() {
                return Err(RangeError::UnknownFile(preferred));
            }
        }
        let file_index = match preferred_file {
            Some(preferred) if !self.events_left[preferred].is_empty() => preferred,
            _ => self.pick_file().ok_or(RangeError::NothingAvailable)?,
        };
        // The first block of a file starts at 0 and always has size B0.
        let use_blocksize0 = self.events_left[file_index].peek()?.0 == 0;
        let width = if use_blocksize0 {
            self.blocksize0
        } else {
            blocksize
        };
        let (first, last) = self.events_left[file_index].consume(width)?;
        Ok(EventRange {
            file_index,
            first,
            last,
        })
    }

    fn pick_file(&self) -> Option<usize> {
        // A file never processed: size unknown, or everything still left.
        for (i, left) in self.events_left.iter().enumerate() {
            if left.is_empty() {
                continue;
            }
            match self.nevents[i] {
                None => return Some(i),
                Some(n) if n == left.size() => return Some(i),
                Some(_) => {}
            }
        }
        // Otherwise any file not completely processed.
        self.events_left.iter().position(|left| !left.is_empty())
    }

    /// Record the actual size of a file. The first call extends the
    /// pool with `[B0, n)`; repeated calls must agree.
    pub fn set_file_size(&mut self, file_index: usize, n: u64) -> Result<(), RangeError> {
        let known = self
            .nevents
            .get_mut(file_index)
            .ok_or(RangeError::UnknownFile(file_index))?;
        match *known {
            Some(existing) => {
                if existing != n {
                    return Err(RangeError::InconsistentFileSize {
                        file: file_index,
                        known: existing,
                        given: n,
                    });
                }
            }
            None => {
                *known = Some(n);
                if n > self.blocksize0 {
                    let tail = IndexRanges::interval(self.blocksize0, n)?;
                    self.events_left[file_index].disjoint_union(&tail)?;
                }
            }
        }
        Ok(())
    }

    /// Return a previously consumed range to the pool (worker failure
    /// recovery). The first block `[0, B0)` may always come back, even
    /// when the file turned out smaller than `B0`.
    pub fn add(&mut self, range: EventRange) -> Result<(), RangeError> {
        let known = *self
            .nevents
            .get(range.file_index)
            .ok_or(RangeError::UnknownFile(range.file_index))?;
        let is_first_block = range.first == 0 && range.last == self.blocksize0;
        let beyond = match known {
            None => true,
            Some(n) => range.last > n,
        };
        if beyond && !is_first_block {
            return Err(RangeError::BeyondFile {
                file: range.file_index,
                first: range.first,
                last: range.last,
            });
        }
        let piece = IndexRanges::interval(range.first, range.last)?;
        self.events_left[range.file_index].disjoint_union(&piece)
    }

    /// Estimate of events still to do; unknown files count as `B0`.
    pub fn nevents_left(&self) -> u64 {
        self.events_left.iter().map(IndexRanges::size).sum()
    }

    /// Total event count. Negative while any file size is still
    /// unknown; unknown files count as `B0` in the magnitude.
    pub fn nevents_total(&self) -> i64 {
        let mut total: i64 = 0;
        let mut sign: i64 = 1;
        for n in &self.nevents {
            match n {
                Some(n) => total += *n as i64,
                None => {
                    total += self.blocksize0 as i64;
                    sign = -1;
                }
            }
        }
        sign * total
    }

    pub fn nfiles_total(&self) -> usize {
        self.nevents.len()
    }

    /// Files whose size is known and whose pool is empty.
    pub fn nfiles_done(&self) -> usize {
        self.nevents
            .iter()
            .zip(&self.events_left)
            .filter(|(n, left)| n.is_some() && left.is_empty())
            .count()
    }
}

#[cfg(test)]
#[path = "ranges_tests.rs"]
mod tests;
