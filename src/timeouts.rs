// Multi-threaded HTTP/1.1 server built on an epoll reactor.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2021-2025 by
//     Dr. Maxim Orlovsky <orlovsky@ubideco.org>
//     Alexis Sellier <alexis@cloudhead.io>
//
// Copyright 2022-2025 UBIDECO Labs, InDCS, Lugano, Switzerland. All Rights reserved.
// Copyright 2021-2023 Alexis Sellier <alexis@cloudhead.io>. All Rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;
use std::ops::{Add, AddAssign, Sub};
use std::time::{Duration, Instant};

/// Monotonic timestamp in milliseconds, counted from a caller-chosen origin.
///
/// Timestamps taken against different origins are not comparable.
#[derive(Wrapper, WrapperMut, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, From)]
#[wrapper(Display, LowerHex, UpperHex, Octal)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates timestamp matching the current moment, as measured from `origin`.
    ///
    /// Wall clock adjustments do not affect the result.
    pub fn since(origin: Instant) -> Self { Self(origin.elapsed().as_millis() as u64) }

    /// Converts into number of milliseconds since the origin.
    pub fn into_millis(self) -> u64 { self.0 }

    /// Time left from `self` until `later`, or zero if `later` has already passed.
    pub fn until(self, later: Timestamp) -> Duration {
        Duration::from_millis(later.0.saturating_sub(self.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        Timestamp(self.0.saturating_add(rhs.as_millis() as u64))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Self::Output {
        Timestamp(self.0.saturating_sub(rhs.as_millis() as u64))
    }
}

impl AddAssign<Duration> for Timestamp {
    fn add_assign(&mut self, rhs: Duration) { *self = *self + rhs }
}

/// Callback invoked once when its timer fires.
pub type TimeoutCallback = Box<dyn FnOnce() + Send>;

struct TimerNode<K> {
    id: K,
    expires: Timestamp,
    callback: TimeoutCallback,
}

impl<K: Debug> Debug for TimerNode<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerNode")
            .field("id", &self.id)
            .field("expires", &self.expires)
            .finish_non_exhaustive()
    }
}

/// Manages per-key timers and triggers timeouts.
///
/// Timers live in a binary min-heap ordered by expiry; a key-to-slot index kept in lock-step
/// with every swap allows updating or removing an arbitrary timer in `O(log n)`.
///
/// Callbacks run while the timer holds `&mut self`, so a callback can not reach back into the
/// same timer: anything it wants to reschedule has to happen after the call returns.
#[derive(Debug)]
pub struct Timer<K: Copy + Eq + Hash + Debug> {
    heap: Vec<TimerNode<K>>,
    slots: HashMap<K, usize>,
}

impl<K: Copy + Eq + Hash + Debug> Default for Timer<K> {
    fn default() -> Self { Timer::new() }
}

impl<K: Copy + Eq + Hash + Debug> Timer<K> {
    /// Create a new timeout manager.
    pub fn new() -> Self {
        Timer {
            heap: Vec::with_capacity(64),
            slots: empty!(),
        }
    }

    /// Return the number of timeouts being tracked.
    pub fn len(&self) -> usize { self.heap.len() }

    /// Check whether there are timeouts being tracked.
    pub fn is_empty(&self) -> bool { self.heap.is_empty() }

    pub fn contains(&self, id: K) -> bool { self.slots.contains_key(&id) }

    /// Expiry time of the timer registered under `id`.
    pub fn deadline(&self, id: K) -> Option<Timestamp> {
        self.slots.get(&id).map(|slot| self.heap[*slot].expires)
    }

    /// Schedules `callback` to run `timeout` after `now`.
    ///
    /// Registering an already known `id` replaces its expiry and callback in place.
    pub fn add(&mut self, id: K, timeout: Duration, now: Timestamp, callback: TimeoutCallback) {
        let expires = now + timeout;
        match self.slots.get(&id).copied() {
            Some(slot) => {
                let node = &mut self.heap[slot];
                node.expires = expires;
                node.callback = callback;
                if !self.sift_down(slot, self.heap.len()) {
                    self.sift_up(slot);
                }
            }
            None => {
                let slot = self.heap.len();
                self.slots.insert(id, slot);
                self.heap.push(TimerNode {
                    id,
                    expires,
                    callback,
                });
                self.sift_up(slot);
            }
        }
    }

    /// Moves the timer registered under `id` to `timeout` after `now`.
    ///
    /// Returns `false` if no timer is registered under `id`.
    pub fn adjust(&mut self, id: K, timeout: Duration, now: Timestamp) -> bool {
        let Some(slot) = self.slots.get(&id).copied() else {
            return false;
        };
        let expires = now + timeout;
        self.heap[slot].expires = expires;
        if !self.sift_down(slot, self.heap.len()) {
            self.sift_up(slot);
        }
        true
    }

    /// Runs the callback registered under `id` and removes the timer.
    pub fn fire(&mut self, id: K) -> bool {
        let Some(slot) = self.slots.get(&id).copied() else {
            return false;
        };
        let node = self.delete(slot);
        (node.callback)();
        true
    }

    /// Removes the timer registered under `id` without running its callback.
    pub fn cancel(&mut self, id: K) -> bool {
        match self.slots.get(&id).copied() {
            Some(slot) => {
                self.delete(slot);
                true
            }
            None => false,
        }
    }

    /// Removes the earliest timer without running its callback.
    pub fn pop(&mut self) -> Option<K> {
        if self.heap.is_empty() {
            return None;
        }
        Some(self.delete(0).id)
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.slots.clear();
    }

    /// Runs and removes every timer which has expired by `now`, earliest first.
    ///
    /// Returns the number of fired timers.
    pub fn expire(&mut self, now: Timestamp) -> usize {
        let mut fired = 0;
        while let Some(root) = self.heap.first() {
            if root.expires > now {
                break;
            }
            let node = self.delete(0);
            #[cfg(feature = "log")]
            log::trace!(target: "timer", "Timer {:?} expired at {}", node.id, node.expires);
            (node.callback)();
            fired += 1;
        }
        fired
    }

    /// Expires due timers and returns how long the caller may sleep until the next one.
    ///
    /// Returns `None` if there are no timers left.
    pub fn next_timeout(&mut self, now: Timestamp) -> Option<Duration> {
        self.expire(now);
        self.heap.first().map(|root| now.until(root.expires))
    }

    fn delete(&mut self, slot: usize) -> TimerNode<K> {
        let last = self.heap.len() - 1;
        if slot < last {
            self.swap(slot, last);
            // The tail node may need to travel in either direction
            if !self.sift_down(slot, last) {
                self.sift_up(slot);
            }
        }
        let node = self.heap.pop().expect("heap has at least one node");
        self.slots.remove(&node.id);
        node
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.slots.insert(self.heap[i].id, i);
        self.slots.insert(self.heap[j].id, j);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].expires <= self.heap[i].expires {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    /// Sifts the node at `index` down within the first `n` nodes.
    ///
    /// Returns whether the node has moved.
    fn sift_down(&mut self, index: usize, n: usize) -> bool {
        let mut i = index;
        let mut child = i * 2 + 1;
        while child < n {
            if child + 1 < n && self.heap[child + 1].expires < self.heap[child].expires {
                child += 1;
            }
            if self.heap[i].expires <= self.heap[child].expires {
                break;
            }
            self.swap(i, child);
            i = child;
            child = i * 2 + 1;
        }
        i > index
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use proptest::prelude::*;

    use super::*;

    impl<K: Copy + Eq + Hash + Debug> Timer<K> {
        fn assert_consistent(&self) {
            assert_eq!(self.heap.len(), self.slots.len());
            for (slot, node) in self.heap.iter().enumerate() {
                assert_eq!(self.slots[&node.id], slot);
                if slot > 0 {
                    assert!(self.heap[(slot - 1) / 2].expires <= node.expires);
                }
            }
        }
    }

    fn noop() -> TimeoutCallback { Box::new(|| {}) }

    fn recorder(log: &Arc<Mutex<Vec<u32>>>, id: u32) -> TimeoutCallback {
        let log = log.clone();
        Box::new(move || log.lock().unwrap().push(id))
    }

    #[test]
    fn test_wake_exact() {
        let mut tm = Timer::new();

        let now = Timestamp::from(10_000);
        tm.add(1, Duration::from_secs(8), now, noop());
        tm.add(2, Duration::from_secs(9), now, noop());
        tm.add(3, Duration::from_secs(10), now, noop());

        assert_eq!(tm.expire(now + Duration::from_secs(9)), 2);
        assert_eq!(tm.len(), 1);
    }

    #[test]
    fn test_wake() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut tm = Timer::new();

        let now = Timestamp::from(10_000);
        tm.add(72, Duration::from_secs(72), now, recorder(&log, 72));
        tm.add(8, Duration::from_secs(8), now, recorder(&log, 8));
        tm.add(64, Duration::from_secs(64), now, recorder(&log, 64));
        tm.add(16, Duration::from_secs(16), now, recorder(&log, 16));

        assert_eq!(tm.expire(now), 0);
        assert_eq!(tm.len(), 4);

        assert_eq!(tm.expire(now + Duration::from_secs(9)), 1);
        assert_eq!(tm.len(), 3, "one timeout has expired");

        assert_eq!(tm.expire(now + Duration::from_secs(66)), 2);
        assert_eq!(tm.len(), 1, "another two timeouts have expired");

        assert_eq!(tm.expire(now + Duration::from_secs(96)), 1);
        assert!(tm.is_empty(), "all timeouts have expired");
        assert_eq!(*log.lock().unwrap(), vec![8, 16, 64, 72]);
    }

    #[test]
    fn re_adding_updates_in_place() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut tm = Timer::new();
        let now = Timestamp::from(0);

        tm.add(5, Duration::from_millis(100), now, recorder(&log, 1));
        tm.add(5, Duration::from_millis(300), now, recorder(&log, 2));
        assert_eq!(tm.len(), 1);
        assert_eq!(tm.deadline(5), Some(Timestamp::from(300)));

        assert_eq!(tm.expire(Timestamp::from(299)), 0);
        assert_eq!(tm.expire(Timestamp::from(300)), 1);
        assert_eq!(*log.lock().unwrap(), vec![2], "only the replacing callback runs");
    }

    #[test]
    fn re_adding_earlier_moves_up() {
        let mut tm = Timer::new();
        let now = Timestamp::from(0);
        for id in 0..10 {
            tm.add(id, Duration::from_millis(100 + id as u64), now, noop());
        }
        tm.add(9, Duration::from_millis(1), now, noop());
        tm.assert_consistent();
        assert_eq!(tm.pop(), Some(9));
    }

    #[test]
    fn adjust_extends() {
        let mut tm = Timer::new();
        let now = Timestamp::from(0);
        tm.add(1, Duration::from_millis(10), now, noop());
        tm.add(2, Duration::from_millis(20), now, noop());
        tm.add(3, Duration::from_millis(30), now, noop());

        assert!(tm.adjust(1, Duration::from_millis(50), now));
        assert!(!tm.adjust(42, Duration::from_millis(50), now));
        tm.assert_consistent();
        assert_eq!(tm.pop(), Some(2));
        assert_eq!(tm.pop(), Some(3));
        assert_eq!(tm.pop(), Some(1));
        assert_eq!(tm.pop(), None);
    }

    #[test]
    fn adjust_to_earlier_expiry() {
        let mut tm = Timer::new();
        let now = Timestamp::from(10_000);
        tm.add(1, Duration::from_secs(60), now, noop());
        tm.add(2, Duration::from_secs(60), now + Duration::from_millis(5), noop());
        tm.add(3, Duration::from_secs(61), now, noop());

        assert!(tm.adjust(2, Duration::from_secs(60), now - Duration::from_millis(1000)));
        tm.assert_consistent();
        assert_eq!(tm.deadline(2), Some(Timestamp::from(69_000)));
        assert_eq!(tm.pop(), Some(2));
        assert_eq!(tm.pop(), Some(1));
        assert_eq!(tm.pop(), Some(3));
    }

    #[test]
    fn monotonic_timestamps() {
        let origin = Instant::now();
        let first = Timestamp::since(origin);
        std::thread::sleep(Duration::from_millis(5));
        let second = Timestamp::since(origin);
        assert!(second >= first + Duration::from_millis(5));
        assert!(first.into_millis() < 1_000);
    }

    #[test]
    fn fire_runs_callback_once() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut tm = Timer::new();
        let now = Timestamp::from(0);
        for id in 0..6 {
            tm.add(id, Duration::from_millis(10 * id as u64), now, recorder(&log, id));
        }
        assert!(tm.fire(3));
        assert!(!tm.fire(3));
        assert!(!tm.contains(3));
        tm.assert_consistent();
        assert!(tm.cancel(4));
        tm.assert_consistent();
        assert_eq!(*log.lock().unwrap(), vec![3]);
        assert_eq!(tm.expire(Timestamp::from(1000)), 4);
        assert_eq!(*log.lock().unwrap(), vec![3, 0, 1, 2, 5]);
    }

    #[test]
    fn next_timeout() {
        let mut tm = Timer::new();
        let now = Timestamp::from(1_000);
        assert_eq!(tm.next_timeout(now), None);

        tm.add(1, Duration::from_millis(16), now, noop());
        tm.add(2, Duration::from_millis(8), now, noop());
        tm.add(3, Duration::from_millis(64), now, noop());

        assert_eq!(tm.next_timeout(now), Some(Duration::from_millis(8)));
        assert_eq!(tm.next_timeout(now + Duration::from_millis(1)), Some(Duration::from_millis(7)));
        // Expires the first two timers on the way
        assert_eq!(
            tm.next_timeout(now + Duration::from_millis(20)),
            Some(Duration::from_millis(44))
        );
        assert_eq!(tm.len(), 1);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Add(u8, u16),
        Adjust(u8, u16),
        Fire(u8),
        Cancel(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (any::<u8>(), any::<u16>()).prop_map(|(id, ms)| Op::Add(id % 32, ms)),
            (any::<u8>(), any::<u16>()).prop_map(|(id, ms)| Op::Adjust(id % 32, ms)),
            any::<u8>().prop_map(|id| Op::Fire(id % 32)),
            any::<u8>().prop_map(|id| Op::Cancel(id % 32)),
        ]
    }

    proptest! {
        #[test]
        fn heap_ordering(ops in prop::collection::vec(op(), 0..200), cut in any::<u16>()) {
            let now = Timestamp::from(0);
            let mut tm = Timer::new();
            for op in ops {
                match op {
                    Op::Add(id, ms) => tm.add(id, Duration::from_millis(ms as u64), now, noop()),
                    Op::Adjust(id, ms) => { tm.adjust(id, Duration::from_millis(ms as u64), now); }
                    Op::Fire(id) => { tm.fire(id); }
                    Op::Cancel(id) => { tm.cancel(id); }
                }
                tm.assert_consistent();
                prop_assert!(tm.len() <= 32);
            }

            let cut = Timestamp::from(cut as u64);
            let expected = tm.heap.iter().filter(|node| node.expires <= cut).count();
            let fired = Arc::new(Mutex::new(Vec::new()));
            for node in &mut tm.heap {
                let fired = fired.clone();
                let expires = node.expires;
                node.callback = Box::new(move || fired.lock().unwrap().push(expires));
            }
            prop_assert_eq!(tm.expire(cut), expected);
            let fired = fired.lock().unwrap();
            prop_assert!(fired.windows(2).all(|w| w[0] <= w[1]));
            prop_assert!(tm.heap.iter().all(|node| node.expires > cut));
        }
    }
}
