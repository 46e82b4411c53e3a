use crate::gfx::anim::Span;
use crate::gfx::math::Vec3;
use crate::schedule::{Scheduler, TimerId};
use crate::stage::EntityId;
use log::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct CollectibleItem {
    pub id: EntityId,
    pub collected: bool,
    pub original_local_position: Vec3,
    /// Outward direction used when the items scatter.
    pub direction: Vec3,
}

impl CollectibleItem {
    pub fn new(id: EntityId, direction: Vec3) -> Self {
        Self {
            id,
            collected: false,
            original_local_position: Vec3::ZERO,
            direction,
        }
    }

    fn collect(&mut self) -> bool {
        if self.collected {
            return false;
        }
        self.collected = true;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Selected,
    Failsafe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateSignal {
    ItemCollected { item: usize, remaining: usize },
    /// Items swept up in one batch by the failsafe.
    Swept { items: Vec<usize> },
    AllDone(Completion),
}

/// One arm cycle of the collect step. Items live with the caller and are
/// passed in, so their `collected` flags outlive the gate.
#[derive(Debug)]
pub struct CollectionGate {
    remaining: usize,
    failsafe: Option<TimerId>,
    done: bool,
}

impl CollectionGate {
    /// Arms a fresh gate and schedules `on_timeout` as its failsafe.
    pub fn arm<E>(
        items: &[CollectibleItem],
        timeout: Span,
        now: f32,
        timers: &mut Scheduler<E>,
        on_timeout: E,
    ) -> Self {
        let remaining = items.iter().filter(|i| !i.collected).count();
        let failsafe = timers.after(now, timeout.secs(), on_timeout);
        info!("collection armed: {} item(s), failsafe in {:.1}s", remaining, timeout.secs());
        Self {
            remaining,
            failsafe: Some(failsafe),
            done: false,
        }
    }

    pub fn is_armed(&self) -> bool {
        !self.done
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn failsafe(&self) -> Option<TimerId> {
        self.failsafe
    }

    pub fn select<E>(
        &mut self,
        items: &mut [CollectibleItem],
        id: &EntityId,
        timers: &mut Scheduler<E>,
    ) -> Vec<GateSignal> {
        if self.done {
            debug!("selection of {} ignored: gate not armed", id);
            return Vec::new();
        }
        let Some(index) = items.iter().position(|i| &i.id == id) else {
            debug!("selection of unknown item {} ignored", id);
            return Vec::new();
        };
        if !items[index].collect() {
            debug!("{} already collected", id);
            return Vec::new();
        }

        self.remaining = self.remaining.saturating_sub(1);
        let mut signals = vec![GateSignal::ItemCollected {
            item: index,
            remaining: self.remaining,
        }];
        if self.remaining == 0 {
            if let Some(timer) = self.failsafe.take() {
                timers.cancel(timer);
            }
            self.done = true;
            signals.push(GateSignal::AllDone(Completion::Selected));
        }
        signals
    }

    /// Handles the failsafe event. A stale timer id is ignored.
    pub fn failsafe_fired(&mut self, items: &mut [CollectibleItem], timer: TimerId) -> Vec<GateSignal> {
        if self.done || self.failsafe != Some(timer) {
            return Vec::new();
        }
        self.failsafe = None;
        self.done = true;
        self.remaining = 0;

        let swept: Vec<usize> = items
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, item)| item.collect().then_some(idx))
            .collect();
        info!("failsafe collected {} item(s)", swept.len());
        vec![
            GateSignal::Swept { items: swept },
            GateSignal::AllDone(Completion::Failsafe),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<CollectibleItem> {
        (0..n)
            .map(|i| CollectibleItem::new(EntityId(format!("shard{i}")), Vec3::ZERO))
            .collect()
    }

    fn arm(items: &[CollectibleItem], timers: &mut Scheduler<&'static str>) -> CollectionGate {
        CollectionGate::arm(items, Span::new(120.0).unwrap(), 0.0, timers, "failsafe")
    }

    fn all_done(signals: &[GateSignal]) -> usize {
        signals.iter().filter(|s| matches!(s, GateSignal::AllDone(_))).count()
    }

    #[test]
    fn every_item_selected_once_finishes_once() {
        let mut timers = Scheduler::new();
        let mut items = items(4);
        let mut gate = arm(&items, &mut timers);

        let mut remaining = Vec::new();
        let mut done = 0;
        for order in [2usize, 0, 3, 1] {
            let id = items[order].id.clone();
            let signals = gate.select(&mut items, &id, &mut timers);
            done += all_done(&signals);
            for s in signals {
                if let GateSignal::ItemCollected { remaining: r, .. } = s {
                    remaining.push(r);
                }
            }
        }
        assert_eq!(remaining, vec![3, 2, 1, 0]);
        assert_eq!(done, 1);
        assert!(items.iter().all(|i| i.collected));
        assert!(timers.is_empty(), "failsafe should be cancelled");
        assert!(!gate.is_armed());
    }

    #[test]
    fn repeated_selection_has_no_effect() {
        let mut timers = Scheduler::new();
        let mut items = items(3);
        let mut gate = arm(&items, &mut timers);
        let id = items[1].id.clone();

        assert_eq!(gate.select(&mut items, &id, &mut timers).len(), 1);
        assert!(gate.select(&mut items, &id, &mut timers).is_empty());
        assert_eq!(gate.remaining(), 2);
        assert!(gate.select(&mut items, &EntityId::from("nope"), &mut timers).is_empty());
    }

    #[test]
    fn failsafe_sweeps_the_rest() {
        let mut timers = Scheduler::new();
        let mut items = items(3);
        let mut gate = arm(&items, &mut timers);
        let id = items[0].id.clone();
        gate.select(&mut items, &id, &mut timers);

        let fired = timers.tick(120.0);
        assert_eq!(fired.len(), 1);
        let (timer, payload) = fired[0];
        assert_eq!(payload, "failsafe");

        let signals = gate.failsafe_fired(&mut items, timer);
        assert_eq!(
            signals,
            vec![
                GateSignal::Swept { items: vec![1, 2] },
                GateSignal::AllDone(Completion::Failsafe)
            ]
        );
        assert!(items.iter().all(|i| i.collected));

        // Late selections and a duplicate fire are inert.
        assert!(gate.select(&mut items, &id, &mut timers).is_empty());
        assert!(gate.failsafe_fired(&mut items, timer).is_empty());
    }

    #[test]
    fn last_selection_beats_a_failsafe_due_in_the_same_tick() {
        let mut timers = Scheduler::new();
        let mut items = items(1);
        let mut gate = arm(&items, &mut timers);
        let failsafe = gate.failsafe().unwrap();
        let id = items[0].id.clone();

        // Selections are applied before the scheduler drains.
        let signals = gate.select(&mut items, &id, &mut timers);
        assert_eq!(all_done(&signals), 1);
        assert!(timers.tick(120.0).is_empty());
        assert!(gate.failsafe_fired(&mut items, failsafe).is_empty());
    }
}
