//! A hierarchical timing wheel.
//!
//! Alarms live in bucketed doubly-linked lists threaded through a slot
//! arena. Level 0 buckets span exactly one resolution tick; each higher
//! level's bucket spans the whole of the level below, so a far-out alarm
//! sits high in the hierarchy and cascades toward level 0 as time advances.
//!
//! The wheel itself is a passive data structure. It knows nothing about
//! jobs or contexts; the scheduler owns one and turns fired payloads into
//! queued work.

pub mod errors;

pub use self::errors::{Error, Result};

use crate::params::WheelParams;
use crate::utils::arena::{Arena, Handle};
use crate::utils::time::Time;

/// Names a pending alarm. Stale after the alarm fires or is removed.
pub type AlarmRef = Handle;

struct Alarm<T> {
    at: Time,
    tick: u64,
    level: u8,
    bucket: u32,
    payload: T,
    prev: Option<Handle>,
    next: Option<Handle>,
}

#[derive(Debug, Default, Copy, Clone)]
struct Bucket {
    head: Option<Handle>,
    tail: Option<Handle>,
    len: u32,
}

struct Level {
    buckets: Vec<Bucket>,
    /// Ticks covered by one bucket of this level.
    unit: u64,
    /// Number of non-empty buckets.
    occupied: usize,
    /// One bit per bucket, kept in step with the bucket lengths, so the
    /// next occupied bucket is a handful of word scans instead of a walk
    /// over the whole level.
    occupancy: Vec<u64>,
}

impl Level {
    /// The index of the first occupied bucket at or after `start`,
    /// wrapping around the level once.
    fn next_occupied(&self, start: usize) -> Option<usize> {
        if self.occupied == 0 {
            return None;
        }

        let words = self.occupancy.len();
        for i in 0..=words {
            let w = (start / 64 + i) % words;
            let mut word = self.occupancy[w];
            if i == 0 {
                word &= !0u64 << (start % 64);
            } else if i == words {
                // Back at the starting word: only the bits before `start`
                // are still unexamined.
                word &= !(!0u64 << (start % 64));
            }

            if word != 0 {
                return Some(w * 64 + word.trailing_zeros() as usize);
            }
        }
        None
    }

    #[inline]
    fn set_occupied(&mut self, bucket: usize) {
        self.occupancy[bucket / 64] |= 1u64 << (bucket % 64);
        self.occupied += 1;
    }

    #[inline]
    fn clear_occupied(&mut self, bucket: usize) {
        self.occupancy[bucket / 64] &= !(1u64 << (bucket % 64));
        self.occupied -= 1;
    }
}

pub struct Wheel<T> {
    resolution: u64,
    levels: Vec<Level>,
    slab: Arena<Alarm<T>>,
    now: Time,
    now_tick: u64,
    len: usize,
}

impl<T> Wheel<T> {
    pub fn new(params: &WheelParams) -> Self {
        assert!(
            !params.level_bits.is_empty(),
            "timing wheel needs at least one level"
        );
        assert!(
            params.resolution.is_positive(),
            "timing wheel resolution must be positive"
        );

        let mut levels = Vec::with_capacity(params.level_bits.len());
        let mut unit = 1u64;
        for bits in &params.level_bits {
            assert!(*bits >= 1 && *bits <= 16, "level bits out of [1, 16]");
            let n = 1usize << bits;
            levels.push(Level {
                buckets: vec![Bucket::default(); n],
                unit,
                occupied: 0,
                occupancy: vec![0; (n + 63) / 64],
            });
            unit *= n as u64;
        }

        Wheel {
            resolution: params.resolution.nanos() as u64,
            levels,
            slab: Arena::new(),
            now: Time::epoch(),
            now_tick: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn now(&self) -> Time {
        self.now
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The latest time an alarm may currently be scheduled at.
    pub fn max_allowed_alarm_time(&self) -> Time {
        let last = self.levels.last().unwrap();
        let n = last.buckets.len() as u64;
        let cur = self.now_tick / last.unit;
        Time::from_nanos(((cur + n) * last.unit - 1) * self.resolution)
    }

    /// The earliest instant at which an alarm may fire, or `None` when the
    /// wheel is empty. Costs O(levels), via the per-level occupancy
    /// bitmaps. For alarms still high in the hierarchy this is the next
    /// cascade boundary, which never overshoots the true fire time.
    pub fn min_alarm_time(&self) -> Option<Time> {
        self.next_expiration()
            .map(|(_, _, tick)| Time::from_nanos(tick * self.resolution))
    }

    /// Schedules `payload` to fire once the wheel is advanced to `at` or
    /// beyond. An `at` in the past lands in the next-to-fire bucket: it
    /// fires on the next advance, never inline.
    pub fn add(&mut self, at: Time, payload: T) -> Result<AlarmRef> {
        let tick = self.tick_of(at).max(self.now_tick + 1);
        let (level, bucket) = match self.place(tick) {
            Some(v) => v,
            None => return Err(Error::OutOfRange(at, self.max_allowed_alarm_time())),
        };

        let handle = self.slab.insert(Alarm {
            at,
            tick,
            level,
            bucket,
            payload,
            prev: None,
            next: None,
        });
        self.link(handle);
        self.len += 1;
        Ok(handle)
    }

    /// Unlinks the alarm named by `handle` and hands its payload back.
    pub fn remove(&mut self, handle: AlarmRef) -> Option<T> {
        if !self.slab.contains(handle) {
            return None;
        }

        self.unlink(handle);
        let alarm = self.slab.remove(handle).unwrap();
        self.len -= 1;
        Some(alarm.payload)
    }

    /// Moves a pending alarm to a new time, keeping its payload. The alarm
    /// is untouched when the new time is out of range.
    pub fn reschedule(&mut self, handle: AlarmRef, at: Time) -> Result<AlarmRef> {
        if !self.slab.contains(handle) {
            return Err(Error::StaleAlarm);
        }

        let tick = self.tick_of(at).max(self.now_tick + 1);
        if self.place(tick).is_none() {
            return Err(Error::OutOfRange(at, self.max_allowed_alarm_time()));
        }

        let payload = self.remove(handle).unwrap();
        self.add(at, payload)
    }

    /// Returns true if `handle` still names a pending alarm.
    #[inline]
    pub fn is_pending(&self, handle: AlarmRef) -> bool {
        self.slab.contains(handle)
    }

    /// The scheduled time of a pending alarm.
    #[inline]
    pub fn alarm_time(&self, handle: AlarmRef) -> Option<Time> {
        self.slab.get(handle).map(|alarm| alarm.at)
    }

    /// Advances the wheel to `now`, appending the payloads of every due
    /// alarm to `fired` in nondecreasing fire-time order. Time never moves
    /// backwards; an older `now` is ignored.
    pub fn advance_to(&mut self, now: Time, fired: &mut Vec<T>) {
        let target_tick = now.nanos() / self.resolution;

        while self.len > 0 {
            match self.next_expiration() {
                Some((level, bucket, tick)) if tick <= target_tick => {
                    debug_assert!(tick >= self.now_tick);
                    self.now_tick = tick;
                    if level == 0 {
                        self.fire_bucket(bucket, fired);
                    } else {
                        self.cascade_bucket(level, bucket);
                    }
                }
                _ => break,
            }
        }

        if target_tick > self.now_tick {
            self.now_tick = target_tick;
        }
        if now > self.now {
            self.now = now;
        }
    }

    /// Walks every bucket verifying the structural invariants. Expensive;
    /// meant for the scheduler's `check_invariants` mode.
    pub fn check_invariants(&self) {
        let mut seen = 0;
        for (l, level) in self.levels.iter().enumerate() {
            let mut occupied = 0;
            for (b, bucket) in level.buckets.iter().enumerate() {
                if bucket.len > 0 {
                    occupied += 1;
                }
                let bit = level.occupancy[b / 64] >> (b % 64) & 1;
                assert_eq!(bit == 1, bucket.len > 0, "occupancy bit out of step");

                let mut cursor = bucket.head;
                let mut prev = None;
                let mut count = 0;
                while let Some(handle) = cursor {
                    let alarm = self.slab.get(handle).expect("dangling alarm handle");
                    assert_eq!(alarm.level as usize, l);
                    assert_eq!(alarm.bucket as usize, b);
                    assert_eq!(alarm.prev, prev);
                    assert!(alarm.tick > self.now_tick || l == 0);
                    prev = Some(handle);
                    cursor = alarm.next;
                    count += 1;
                }
                assert_eq!(bucket.tail, prev);
                assert_eq!(bucket.len, count);
                seen += count as usize;
            }
            assert_eq!(level.occupied, occupied);
        }
        assert_eq!(self.len, seen);
        assert_eq!(self.slab.len(), seen);
    }

    /// The tick an alarm at `at` belongs to: the first tick boundary at or
    /// after `at`, so that firing at the boundary is never early.
    #[inline]
    fn tick_of(&self, at: Time) -> u64 {
        (at.nanos() + self.resolution - 1) / self.resolution
    }

    fn place(&self, tick: u64) -> Option<(u8, u32)> {
        for (l, level) in self.levels.iter().enumerate() {
            let n = level.buckets.len() as u64;
            let cur = self.now_tick / level.unit;
            let target = tick / level.unit;
            if target - cur < n {
                return Some((l as u8, (target % n) as u32));
            }
        }
        None
    }

    /// The earliest occupied bucket across all levels, as
    /// `(level, bucket index, expiration tick)`. For level 0 the tick is
    /// the fire time; for higher levels it is the cascade boundary.
    /// Costs a constant number of occupancy-word scans per level.
    fn next_expiration(&self) -> Option<(u8, u32, u64)> {
        let mut best: Option<(u8, u32, u64)> = None;
        for (l, level) in self.levels.iter().enumerate() {
            let n = level.buckets.len() as u64;
            let cur = self.now_tick / level.unit;
            let start = (cur % n) as usize;

            if let Some(bucket) = level.next_occupied(start) {
                let ahead = (bucket as u64 + n - start as u64) % n;
                let tick = (cur + ahead) * level.unit;
                if best.map_or(true, |(_, _, t)| tick < t) {
                    best = Some((l as u8, bucket as u32, tick));
                }
            }
        }
        best
    }

    fn fire_bucket(&mut self, bucket: u32, fired: &mut Vec<T>) {
        while let Some(handle) = self.levels[0].buckets[bucket as usize].head {
            self.unlink(handle);
            let alarm = self.slab.remove(handle).unwrap();
            self.len -= 1;
            fired.push(alarm.payload);
        }
    }

    /// Redistributes a crossed higher-level bucket into the levels below.
    /// Alarms due exactly at the boundary land in the current level-0
    /// bucket and fire within the same advance.
    fn cascade_bucket(&mut self, level: u8, bucket: u32) {
        while let Some(handle) = self.levels[level as usize].buckets[bucket as usize].head {
            self.unlink(handle);
            let tick = self.slab.get(handle).unwrap().tick;
            let (new_level, new_bucket) = self
                .place(tick)
                .expect("cascaded alarm fell off the wheel");
            {
                let alarm = self.slab.get_mut(handle).unwrap();
                alarm.level = new_level;
                alarm.bucket = new_bucket;
            }
            self.link(handle);
        }
    }

    fn link(&mut self, handle: Handle) {
        let (level, bucket) = {
            let alarm = self.slab.get(handle).unwrap();
            (alarm.level as usize, alarm.bucket as usize)
        };

        let tail = self.levels[level].buckets[bucket].tail;
        {
            let alarm = self.slab.get_mut(handle).unwrap();
            alarm.prev = tail;
            alarm.next = None;
        }
        if let Some(tail) = tail {
            self.slab.get_mut(tail).unwrap().next = Some(handle);
        }

        let now_occupied = {
            let slot = &mut self.levels[level].buckets[bucket];
            if slot.head.is_none() {
                slot.head = Some(handle);
            }
            slot.tail = Some(handle);
            slot.len += 1;
            slot.len == 1
        };
        if now_occupied {
            self.levels[level].set_occupied(bucket);
        }
    }

    fn unlink(&mut self, handle: Handle) {
        let (level, bucket, prev, next) = {
            let alarm = self.slab.get(handle).unwrap();
            (
                alarm.level as usize,
                alarm.bucket as usize,
                alarm.prev,
                alarm.next,
            )
        };

        if let Some(prev) = prev {
            self.slab.get_mut(prev).unwrap().next = next;
        }
        if let Some(next) = next {
            self.slab.get_mut(next).unwrap().prev = prev;
        }

        let now_empty = {
            let slot = &mut self.levels[level].buckets[bucket];
            if slot.head == Some(handle) {
                slot.head = next;
            }
            if slot.tail == Some(handle) {
                slot.tail = prev;
            }
            slot.len -= 1;
            slot.len == 0
        };
        if now_empty {
            self.levels[level].clear_occupied(bucket);
        }

        let alarm = self.slab.get_mut(handle).unwrap();
        alarm.prev = None;
        alarm.next = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::time::Span;

    fn wheel(bits: Vec<u8>, resolution_ns: i64) -> Wheel<u32> {
        Wheel::new(&WheelParams {
            level_bits: bits,
            resolution: Span::from_nanos(resolution_ns),
        })
    }

    fn advance(w: &mut Wheel<u32>, ns: u64) -> Vec<u32> {
        let mut fired = Vec::new();
        w.advance_to(Time::from_nanos(ns), &mut fired);
        fired
    }

    #[test]
    fn fires_in_time_order() {
        let mut w = wheel(vec![4, 4, 4], 1);
        w.add(Time::from_nanos(30), 30).unwrap();
        w.add(Time::from_nanos(10), 10).unwrap();
        w.add(Time::from_nanos(500), 500).unwrap();
        w.add(Time::from_nanos(10), 11).unwrap();
        w.check_invariants();

        assert_eq!(advance(&mut w, 5), Vec::<u32>::new());
        assert_eq!(advance(&mut w, 10), vec![10, 11]);
        assert_eq!(advance(&mut w, 1000), vec![30, 500]);
        assert!(w.is_empty());
        w.check_invariants();
    }

    #[test]
    fn never_fires_early() {
        let mut w = wheel(vec![4, 4], 8);
        w.add(Time::from_nanos(20), 1).unwrap();

        // 20ns rounds up to the 24ns tick boundary with an 8ns resolution.
        assert!(advance(&mut w, 23).is_empty());
        assert_eq!(advance(&mut w, 24), vec![1]);
    }

    #[test]
    fn past_alarms_fire_on_next_advance_only() {
        let mut w = wheel(vec![4, 4], 1);
        advance(&mut w, 100);

        w.add(Time::from_nanos(50), 1).unwrap();
        assert!(advance(&mut w, 100).is_empty());
        assert_eq!(advance(&mut w, 101), vec![1]);
    }

    #[test]
    fn cascades_through_levels() {
        let mut w = wheel(vec![2, 2, 2], 1);
        // Level capacities are 4, 16 and 64 ticks.
        w.add(Time::from_nanos(37), 37).unwrap();
        w.add(Time::from_nanos(13), 13).unwrap();
        w.check_invariants();

        let mut seen = Vec::new();
        for ns in 1..64 {
            for v in advance(&mut w, ns) {
                seen.push((ns, v));
            }
        }
        assert_eq!(seen, vec![(13, 13), (37, 37)]);
    }

    #[test]
    fn out_of_range() {
        let mut w = wheel(vec![2, 2], 1);
        // Horizon is 16 ticks.
        assert!(w.add(Time::from_nanos(15), 1).is_ok());
        match w.add(Time::from_nanos(1 << 20), 2) {
            Err(Error::OutOfRange(..)) => {}
            other => panic!("expected OutOfRange, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn remove_and_reschedule() {
        let mut w = wheel(vec![4, 4], 1);
        let a = w.add(Time::from_nanos(10), 1).unwrap();
        let b = w.add(Time::from_nanos(20), 2).unwrap();

        assert_eq!(w.remove(a), Some(1));
        assert_eq!(w.remove(a), None);

        let b = w.reschedule(b, Time::from_nanos(40)).unwrap();
        assert_eq!(w.alarm_time(b), Some(Time::from_nanos(40)));
        w.check_invariants();

        assert!(advance(&mut w, 39).is_empty());
        assert_eq!(advance(&mut w, 40), vec![2]);
        assert!(match w.reschedule(b, Time::from_nanos(80)) {
            Err(Error::StaleAlarm) => true,
            _ => false,
        });
    }

    #[test]
    fn occupancy_scan_wraps_around_the_level() {
        let mut w = wheel(vec![4, 4], 1);
        advance(&mut w, 10);

        // Bucket 1 sits behind the cursor (bucket 10) until the level
        // wraps; the occupancy scan has to look past the end.
        w.add(Time::from_nanos(17), 17).unwrap();
        w.add(Time::from_nanos(12), 12).unwrap();
        assert_eq!(w.min_alarm_time(), Some(Time::from_nanos(12)));
        w.check_invariants();

        assert_eq!(advance(&mut w, 20), vec![12, 17]);
        assert!(w.is_empty());
    }

    #[test]
    fn min_alarm_time_tracks_contents() {
        let mut w = wheel(vec![4, 4], 1);
        assert_eq!(w.min_alarm_time(), None);

        let a = w.add(Time::from_nanos(9), 1).unwrap();
        w.add(Time::from_nanos(12), 2).unwrap();
        assert_eq!(w.min_alarm_time(), Some(Time::from_nanos(9)));

        w.remove(a);
        assert_eq!(w.min_alarm_time(), Some(Time::from_nanos(12)));
    }
}
