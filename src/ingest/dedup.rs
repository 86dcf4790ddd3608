//! Content-keyed duplicate suppression over a sliding time window.
//!
//! Entries live in a fixed ring. Lookups treat entries older than the window as
//! absent (and clear them); inserts overwrite the oldest physical slot whatever
//! its age. Once the ring wraps within one window a key can therefore be
//! forgotten early, which is an accepted approximation.

use crate::clock::elapsed_ms;

#[derive(Debug, Clone)]
struct SeenEntry {
    key: Vec<u8>,
    at_ms: u32,
}

#[derive(Debug)]
pub struct DedupWindow {
    entries: Vec<Option<SeenEntry>>,
    head: usize,
    window_ms: u32,
}

impl DedupWindow {
    pub fn new(capacity: usize, window_ms: u32) -> Self {
        Self {
            entries: vec![None; capacity.max(1)],
            head: 0,
            window_ms: window_ms.max(1),
        }
    }

    pub fn window_ms(&self) -> u32 {
        self.window_ms
    }

    /// Change the window; zero is clamped to 1 ms.
    pub fn set_window_ms(&mut self, window_ms: u32) {
        self.window_ms = window_ms.max(1);
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Return true when `key` was recorded within the window. Otherwise record it
    /// at `now_ms` and return false.
    pub fn check_and_insert(&mut self, key: &[u8], now_ms: u32) -> bool {
        if self.contains(key, now_ms) {
            return true;
        }
        self.entries[self.head] = Some(SeenEntry {
            key: key.to_vec(),
            at_ms: now_ms,
        });
        self.head = (self.head + 1) % self.entries.len();
        false
    }

    /// Look up `key`, expiring stale entries on the way.
    pub fn contains(&mut self, key: &[u8], now_ms: u32) -> bool {
        let window = self.window_ms;
        let mut found = false;
        for slot in self.entries.iter_mut() {
            let Some(entry) = slot else { continue };
            if elapsed_ms(now_ms, entry.at_ms) > window {
                *slot = None;
                continue;
            }
            if entry.key == key {
                found = true;
            }
        }
        found
    }

    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
        self.head = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_inside_window_are_duplicates() {
        let mut d = DedupWindow::new(8, 2000);
        assert!(!d.check_and_insert(b"hello", 1000));
        assert!(d.check_and_insert(b"hello", 2500));
        assert!(!d.check_and_insert(b"world", 2600));
    }

    #[test]
    fn repeats_outside_window_are_new() {
        let mut d = DedupWindow::new(8, 2000);
        assert!(!d.check_and_insert(b"hello", 1000));
        assert!(!d.check_and_insert(b"hello", 3001));
    }

    #[test]
    fn window_survives_timer_wrap() {
        let mut d = DedupWindow::new(8, 2000);
        assert!(!d.check_and_insert(b"wrap", u32::MAX - 100));
        assert!(d.check_and_insert(b"wrap", 500));
    }

    #[test]
    fn ring_overwrites_oldest_slot_before_expiry() {
        let mut d = DedupWindow::new(2, 60_000);
        d.check_and_insert(b"a", 0);
        d.check_and_insert(b"b", 1);
        d.check_and_insert(b"c", 2); // overwrites "a"
        assert!(!d.check_and_insert(b"a", 3));
    }

    #[test]
    fn zero_window_is_clamped() {
        let mut d = DedupWindow::new(4, 0);
        assert_eq!(d.window_ms(), 1);
        d.set_window_ms(0);
        assert_eq!(d.window_ms(), 1);
    }
}
