//! # Bounded ring of recent stderr lines.
//!
//! The stderr drain pushes every line the child writes; only the last
//! `capacity` lines are kept. The classifier reads the ring after the
//! child exits, and [`LineRing::summary`] condenses it for log events.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Keeps the last `capacity` lines pushed into it.
///
/// Shared between the stderr drain task and the supervisor loop, so all
/// access goes through an internal mutex.
pub(crate) struct LineRing {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl LineRing {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Appends a line, evicting the oldest when full.
    pub(crate) fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Returns the retained lines, oldest first.
    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    /// Joins the last two lines with `" | "`, truncated to `max_chars`.
    ///
    /// Returns `None` when nothing was captured.
    pub(crate) fn summary(&self, max_chars: usize) -> Option<String> {
        let lines = self.lines.lock();
        if lines.is_empty() {
            return None;
        }
        let start = lines.len().saturating_sub(2);
        let joined = lines
            .iter()
            .skip(start)
            .cloned()
            .collect::<Vec<_>>()
            .join(" | ");
        if joined.chars().count() > max_chars {
            return Some(joined.chars().take(max_chars).collect());
        }
        Some(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_lines() {
        let ring = LineRing::new(3);
        for i in 0..5 {
            ring.push(format!("line {i}"));
        }
        assert_eq!(ring.lines(), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn summary_joins_last_two() {
        let ring = LineRing::new(10);
        assert_eq!(ring.summary(200), None);

        ring.push("one".to_string());
        assert_eq!(ring.summary(200).as_deref(), Some("one"));

        ring.push("two".to_string());
        ring.push("three".to_string());
        assert_eq!(ring.summary(200).as_deref(), Some("two | three"));
    }

    #[test]
    fn summary_truncates() {
        let ring = LineRing::new(10);
        ring.push("x".repeat(300));
        let summary = ring.summary(200).unwrap();
        assert_eq!(summary.chars().count(), 200);
    }
}
