//! One-shot delayed events, independent of tweens.
//!
//! A tick is opened with [`Scheduler::begin`] and drained with
//! [`Scheduler::next_due`]. Handlers run between two `next_due` calls, so a
//! handler may cancel an event that was due in the same tick and it will not
//! fire. Events scheduled while draining wait for a later tick.

use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug)]
struct ScheduledEvent<E> {
    id: TimerId,
    fire_at: f32,
    payload: E,
}

#[derive(Debug)]
pub struct Scheduler<E> {
    // Kept in scheduling order; ids grow monotonically.
    pending: Vec<ScheduledEvent<E>>,
    next_id: u64,
    now: f32,
    // Events with ids below this belong to the open tick.
    watermark: u64,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            next_id: 0,
            now: f32::NEG_INFINITY,
            watermark: 0,
        }
    }
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn after(&mut self, now: f32, delay: f32, payload: E) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.pending.push(ScheduledEvent {
            id,
            fire_at: now + delay.max(0.0),
            payload,
        });
        id
    }

    /// Idempotent; unknown, fired and already cancelled ids are ignored.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.pending.iter().position(|e| e.id == id) {
            Some(idx) => {
                self.pending.remove(idx);
                debug!("timer {:?} cancelled", id);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.pending.iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn begin(&mut self, now: f32) {
        self.now = now;
        self.watermark = self.next_id;
    }

    /// Earliest due event of the open tick, ties in scheduling order.
    pub fn next_due(&mut self) -> Option<(TimerId, E)> {
        let mut best: Option<usize> = None;
        for (idx, ev) in self.pending.iter().enumerate() {
            if ev.id.0 >= self.watermark || ev.fire_at > self.now {
                continue;
            }
            match best {
                // Strict comparison keeps the earlier-scheduled event on ties.
                Some(b) if self.pending[b].fire_at <= ev.fire_at => {}
                _ => best = Some(idx),
            }
        }
        best.map(|idx| {
            let ev = self.pending.remove(idx);
            (ev.id, ev.payload)
        })
    }

    /// Opens a tick and drains it without handlers in between.
    pub fn tick(&mut self, now: f32) -> Vec<(TimerId, E)> {
        self.begin(now);
        std::iter::from_fn(|| self.next_due()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads<E>(fired: Vec<(TimerId, E)>) -> Vec<E> {
        fired.into_iter().map(|(_, e)| e).collect()
    }

    #[test]
    fn fires_by_time_then_fifo() {
        let mut s = Scheduler::new();
        s.after(0.0, 2.0, "late");
        s.after(0.0, 1.0, "first");
        s.after(0.5, 0.5, "second");
        assert!(s.tick(0.9).is_empty());
        assert_eq!(payloads(s.tick(3.0)), vec!["first", "second", "late"]);
        assert!(s.is_empty());
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut s = Scheduler::new();
        let id = s.after(0.0, 1.0, ());
        assert!(s.is_pending(id));
        assert!(s.cancel(id));
        assert!(!s.is_pending(id));
        assert!(!s.cancel(id));
        assert!(s.tick(5.0).is_empty());

        let fired = s.after(0.0, 1.0, ());
        s.tick(1.0);
        assert!(!s.cancel(fired));
    }

    #[test]
    fn handler_can_cancel_an_event_due_in_the_same_tick() {
        let mut s = Scheduler::new();
        let _a = s.after(0.0, 1.0, 'a');
        let b = s.after(0.0, 1.0, 'b');
        s.begin(2.0);
        let mut fired = Vec::new();
        while let Some((_, ev)) = s.next_due() {
            if ev == 'a' {
                s.cancel(b);
            }
            fired.push(ev);
        }
        assert_eq!(fired, vec!['a']);
    }

    #[test]
    fn events_scheduled_while_draining_wait_for_the_next_tick() {
        let mut s = Scheduler::new();
        s.after(0.0, 1.0, 0u32);
        s.begin(1.0);
        let mut fired = Vec::new();
        while let Some((_, n)) = s.next_due() {
            fired.push(n);
            if n < 3 {
                s.after(1.0, 0.0, n + 1);
            }
        }
        assert_eq!(fired, vec![0]);
        assert_eq!(payloads(s.tick(1.0)), vec![1]);
    }
}
