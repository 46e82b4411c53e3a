use super::anim::{evaluate, Easing, Span, Timeline};
use super::math::{TransformPatch, Vec3};
use crate::stage::{EntityId, MaterialId, Stage};

/// The property a tween writes and its end points.
#[derive(Debug, Clone, PartialEq)]
pub enum Track {
    /// Writes nothing; keeps the timing of a step whose target is missing.
    Idle,
    LocalPosition { entity: EntityId, from: Vec3, to: Vec3 },
    WorldPosition { entity: EntityId, from: Vec3, to: Vec3 },
    LocalScale { entity: EntityId, from: Vec3, to: Vec3 },
    LocalRotation { entity: EntityId, from: Vec3, to: Vec3 },
    Alpha { material: MaterialId, from: f32, to: f32 },
}

impl Track {
    fn apply(&self, stage: &mut dyn Stage, t: f32, curve: Easing) {
        match self {
            Track::Idle => {}
            Track::LocalPosition { entity, from, to } => {
                stage.set_local_transform(entity, TransformPatch::position(evaluate(*from, *to, t, curve)));
            }
            Track::WorldPosition { entity, from, to } => {
                stage.set_world_position(entity, evaluate(*from, *to, t, curve));
            }
            Track::LocalScale { entity, from, to } => {
                stage.set_local_transform(entity, TransformPatch::scale(evaluate(*from, *to, t, curve)));
            }
            Track::LocalRotation { entity, from, to } => {
                stage.set_local_transform(entity, TransformPatch::rotation(evaluate(*from, *to, t, curve)));
            }
            Track::Alpha { material, from, to } => {
                stage.set_alpha(material, evaluate(*from, *to, t, curve));
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tween<C> {
    track: Track,
    timeline: Timeline,
    easing: Easing,
    on_complete: Option<C>,
}

impl<C> Tween<C> {
    pub fn new(track: Track, duration: Span) -> Self {
        Self {
            track,
            timeline: Timeline::new(duration),
            easing: Easing::Linear,
            on_complete: None,
        }
    }

    pub fn easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    /// Payload handed back by [`TweenRegistry::tick`] once the tween lands.
    pub fn on_complete(mut self, cue: C) -> Self {
        self.on_complete = Some(cue);
        self
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    fn advance(&mut self, now: f32, stage: &mut dyn Stage) -> bool {
        self.timeline.update(now);
        self.track.apply(stage, self.timeline.progress(), self.easing);
        self.timeline.is_complete()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TweenId(u64);

/// Active tweens in registration order.
#[derive(Debug)]
pub struct TweenRegistry<C> {
    active: Vec<(TweenId, Tween<C>)>,
    next_id: u64,
}

impl<C> Default for TweenRegistry<C> {
    fn default() -> Self {
        Self {
            active: Vec::new(),
            next_id: 0,
        }
    }
}

impl<C> TweenRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the tween starting at `now` and writes its start value.
    pub fn start(&mut self, mut tween: Tween<C>, now: f32, stage: &mut dyn Stage) -> TweenId {
        let id = TweenId(self.next_id);
        self.next_id += 1;
        tween.timeline.start(now);
        tween.track.apply(stage, 0.0, tween.easing);
        self.active.push((id, tween));
        id
    }

    /// Advances every active tween, then hands back the completion payloads
    /// of those that reached their end, in registration order. Tweens
    /// started while handling the payloads first move on the next tick.
    pub fn tick(&mut self, now: f32, stage: &mut dyn Stage) -> Vec<(TweenId, C)> {
        let mut landed = Vec::new();
        for (id, tween) in self.active.iter_mut() {
            if tween.advance(now, stage) {
                landed.push(*id);
            }
        }
        if landed.is_empty() {
            return Vec::new();
        }

        let mut completions = Vec::new();
        let mut remaining = Vec::with_capacity(self.active.len() - landed.len());
        for (id, tween) in self.active.drain(..) {
            if landed.contains(&id) {
                if let Some(cue) = tween.on_complete {
                    completions.push((id, cue));
                }
            } else {
                remaining.push((id, tween));
            }
        }
        self.active = remaining;
        completions
    }

    /// Drops the tween without its completion. False if it already finished.
    pub fn cancel(&mut self, id: TweenId) -> bool {
        let before = self.active.len();
        self.active.retain(|(tid, _)| *tid != id);
        self.active.len() != before
    }

    pub fn is_active(&self, id: TweenId) -> bool {
        self.active.iter().any(|(tid, _)| *tid == id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
