// Cursor-based search for the window enclosing an instant
//
// Windows are sorted ascending by start. The rightward scan from the cursor
// stops at the first window starting after `t`; if it finds nothing the
// leftward scan runs down to index 0. Among all enclosing windows the one
// with the highest sorted position (latest start) wins, so the answer does
// not depend on where the cursor was.

use crate::sample::SampleId;
use crate::timeline::TimelineNode;

/// A time interval owned by one thread
pub trait Window {
    fn owner(&self) -> u64;
    fn start(&self) -> u64;
    fn end(&self) -> u64;

    /// Inclusive on both ends
    fn encloses(&self, owner: u64, t: u64) -> bool {
        self.owner() == owner && self.start() <= t && t <= self.end()
    }
}

impl Window for TimelineNode {
    fn owner(&self) -> u64 {
        self.thread_id
    }

    fn start(&self) -> u64 {
        self.start_time
    }

    fn end(&self) -> u64 {
        self.end_time()
    }
}

/// An already correlated sample acting as a parent window during recheck
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchedWindow {
    pub pthread_id: u64,
    pub time_begin: u64,
    pub time_end: u64,
    pub sample: SampleId,
    /// Timeline node the sample resolved to
    pub node: usize,
}

impl Window for MatchedWindow {
    fn owner(&self) -> u64 {
        self.pthread_id
    }

    fn start(&self) -> u64 {
        self.time_begin
    }

    fn end(&self) -> u64 {
        self.time_end
    }
}

/// Index of the enclosing window, moving `cursor` to it on success
pub fn find_enclosing<W: Window>(windows: &[W], owner: u64, t: u64, cursor: &mut usize) -> Option<usize> {
    let from = (*cursor).min(windows.len());

    let mut best = None;
    for (i, w) in windows.iter().enumerate().skip(from) {
        if w.start() > t {
            break;
        }
        if w.encloses(owner, t) {
            best = Some(i);
        }
    }

    let found = best.or_else(|| (0..from).rev().find(|&i| windows[i].encloses(owner, t)));
    if let Some(i) = found {
        *cursor = i;
    }
    found
}
