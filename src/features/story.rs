use super::caption::{Caption, CaptionChannel, CaptionCue, TextSequencer};
use super::gate::{CollectibleItem, CollectionGate, Completion, GateSignal};
use super::Feature;
use crate::app::UiEvent;
use crate::config::{Config, ConfigError, Pacing, RevealPacing};
use crate::gfx::anim::{Easing, Span};
use crate::gfx::math::{TransformPatch, Vec3};
use crate::gfx::tween::{Track, Tween, TweenId, TweenRegistry};
use crate::schedule::{Scheduler, TimerId};
use crate::stage::{EntityId, MaterialId, SoundId, Stage};
use log::{debug, info, warn};
use rand::{Rng, RngCore};

const REVEAL_SEED_SCALE: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Descending,
    WindBlowing,
    Exploding,
    Collecting,
    Unifying,
    Complete,
}

/// Identifies which caption finished so the matching follow-up can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Shattered,
    CollectIntro,
    PinchHint,
    Remaining,
    Rekindled,
    Finale,
    OrnamentsHint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealGroup {
    Ornaments,
    Landscape,
}

/// Everything a tween completion or a timer can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    MenuHidden,
    /// Next leg of the start star bounce.
    Bounce { up: bool },
    DescentFinished,
    WindFaded,
    WindPassed,
    ExplosionSettled,
    Failsafe,
    Unify,
    Reveal(RevealGroup, usize),
    TreePart(usize),
    Finish,
    Caption(CaptionCue),
}

impl From<CaptionCue> for Cue {
    fn from(cue: CaptionCue) -> Self {
        Cue::Caption(cue)
    }
}

/// Input from the host, applied at the start of the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Start,
    Select(EntityId),
}

#[derive(Debug)]
enum PhaseState {
    Idle,
    Menu { hiding: bool },
    Descending,
    WindBlowing,
    Exploding,
    Collecting { gate: CollectionGate, settle: Option<TimerId> },
    Unifying { reveals_pending: usize },
    Complete,
}

impl PhaseState {
    fn phase(&self) -> Option<Phase> {
        match self {
            PhaseState::Idle | PhaseState::Menu { .. } => None,
            PhaseState::Descending => Some(Phase::Descending),
            PhaseState::WindBlowing => Some(Phase::WindBlowing),
            PhaseState::Exploding => Some(Phase::Exploding),
            PhaseState::Collecting { .. } => Some(Phase::Collecting),
            PhaseState::Unifying { .. } => Some(Phase::Unifying),
            PhaseState::Complete => Some(Phase::Complete),
        }
    }
}

pub struct Story<S> {
    stage: S,
    config: Config,
    pacing: Pacing,
    state: PhaseState,
    history: Vec<(Phase, f32)>,
    tweens: TweenRegistry<Cue>,
    timers: Scheduler<Cue>,
    caption: TextSequencer<Tag>,
    items: Vec<CollectibleItem>,
    spikes_scale: Vec<(EntityId, Vec3)>,
    decal_scale: Option<(EntityId, Vec3)>,
    bounce_origin: Option<(EntityId, Vec3)>,
    inbox: Vec<Action>,
    rng: Box<dyn RngCore>,
}

impl<S: Stage> Story<S> {
    /// Validates the configuration and prepares the scene. Nothing moves
    /// until [`Story::begin`].
    pub fn new(config: Config, stage: S, rng: Box<dyn RngCore>) -> Result<Self, ConfigError> {
        let pacing = config.validate()?;
        let items = config
            .scene
            .items
            .iter()
            .map(|b| CollectibleItem::new(b.entity.clone(), b.direction))
            .collect();
        let bindings = &config.scene.caption;
        let caption = TextSequencer::new(CaptionChannel {
            panel: bindings.panel.clone(),
            text: bindings.text.clone(),
            backdrop: bindings.backdrop.clone(),
            hint: bindings.hint.clone(),
        });

        let mut story = Self {
            stage,
            config,
            pacing,
            state: PhaseState::Idle,
            history: Vec::new(),
            tweens: TweenRegistry::new(),
            timers: Scheduler::new(),
            caption,
            items,
            spikes_scale: Vec::new(),
            decal_scale: None,
            bounce_origin: None,
            inbox: Vec::new(),
            rng,
        };
        story.prepare_scene();
        Ok(story)
    }

    pub fn phase(&self) -> Option<Phase> {
        self.state.phase()
    }

    /// Every phase entered so far with the time it was entered.
    pub fn history(&self) -> &[(Phase, f32)] {
        &self.history
    }

    pub fn entered_at(&self, phase: Phase) -> Option<f32> {
        self.history.iter().find(|(p, _)| *p == phase).map(|(_, t)| *t)
    }

    pub fn items(&self) -> &[CollectibleItem] {
        &self.items
    }

    /// Items still to collect while the gate is armed.
    pub fn remaining(&self) -> Option<usize> {
        match &self.state {
            PhaseState::Collecting { gate, .. } if gate.is_armed() => Some(gate.remaining()),
            _ => None,
        }
    }

    /// True once every item is in and the hand-off to unifying is scheduled.
    pub fn unify_pending(&self) -> bool {
        matches!(self.state, PhaseState::Collecting { settle: Some(_), .. })
    }

    pub fn caption(&self) -> &TextSequencer<Tag> {
        &self.caption
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    pub fn is_waiting_for_start(&self) -> bool {
        matches!(self.state, PhaseState::Menu { hiding: false })
    }

    /// Complete and nothing left to animate or fire.
    pub fn is_settled(&self) -> bool {
        self.phase() == Some(Phase::Complete)
            && self.caption.is_idle()
            && self.tweens.is_empty()
            && self.timers.is_empty()
    }

    /// Shows the start menu when one is bound, otherwise starts descending.
    pub fn begin(&mut self, now: f32) {
        if !matches!(self.state, PhaseState::Idle) {
            return;
        }
        let menu = self.resolve(&self.config.scene.start_menu.clone(), "start menu");
        let button = self.resolve(&self.config.scene.start_button.clone(), "start button");
        match (menu, button) {
            (Some(menu), Some(button)) => {
                self.stage.set_enabled(&menu, true);
                self.stage.set_enabled(&button, true);
                self.stage.set_interactable(&button, true);
                self.state = PhaseState::Menu { hiding: false };
                info!("waiting for start");
                self.start_bounce(now);
            }
            _ => self.enter_descent(now),
        }
    }

    pub fn on_action_selected(&mut self, item: EntityId) {
        self.inbox.push(Action::Select(item));
    }

    pub fn press_start(&mut self) {
        self.inbox.push(Action::Start);
    }

    /// One frame: queued actions, then tweens, then due timers.
    pub fn tick(&mut self, now: f32) {
        for action in std::mem::take(&mut self.inbox) {
            self.apply(action, now);
        }

        for (_, cue) in self.tweens.tick(now, &mut self.stage) {
            self.dispatch(cue, None, now);
        }

        self.timers.begin(now);
        while let Some((timer, cue)) = self.timers.next_due() {
            self.dispatch(cue, Some(timer), now);
        }
    }

    fn apply(&mut self, action: Action, now: f32) {
        match action {
            Action::Start => self.hide_menu(now),
            Action::Select(id) => {
                let signals = match &mut self.state {
                    PhaseState::Collecting { gate, .. } => gate.select(&mut self.items, &id, &mut self.timers),
                    _ => {
                        debug!("selection of {} ignored outside collecting", id);
                        return;
                    }
                };
                self.on_gate(signals, now);
            }
        }
    }

    fn dispatch(&mut self, cue: Cue, timer: Option<TimerId>, now: f32) {
        match cue {
            Cue::MenuHidden if matches!(self.state, PhaseState::Menu { .. }) => {
                if let Some(menu) = self.config.scene.start_menu.clone() {
                    self.stage.set_enabled(&menu, false);
                }
                self.enter_descent(now);
            }
            Cue::Bounce { up } if matches!(self.state, PhaseState::Menu { .. }) => self.bounce(up, now),
            Cue::DescentFinished if matches!(self.state, PhaseState::Descending) => {
                self.record_item_positions();
                self.cache_decor();
                self.enter_wind(now);
            }
            Cue::WindFaded => {
                if let Some(wind) = self.config.scene.wind.clone() {
                    self.stage.set_enabled(&wind, false);
                }
            }
            Cue::WindPassed if matches!(self.state, PhaseState::WindBlowing) => {
                let message = self.config.messages.shattered.clone();
                self.say(Tag::Shattered, message, self.pacing.caption_hold, false, now);
                self.enter_explosion(now);
            }
            Cue::ExplosionSettled if matches!(self.state, PhaseState::Exploding) => self.enter_collecting(now),
            Cue::Failsafe => {
                let Some(timer) = timer else { return };
                let signals = match &mut self.state {
                    PhaseState::Collecting { gate, .. } => gate.failsafe_fired(&mut self.items, timer),
                    _ => return,
                };
                self.on_gate(signals, now);
            }
            Cue::Unify if matches!(self.state, PhaseState::Collecting { .. }) => self.enter_unifying(now),
            Cue::Reveal(group, index) => self.reveal(group, index, now),
            Cue::TreePart(index) => self.reveal_tree_part(index, now),
            Cue::Finish if matches!(self.state, PhaseState::Unifying { .. }) => self.enter_complete(now),
            Cue::Caption(cue) => {
                let finished = self
                    .caption
                    .handle(cue, now, &mut self.stage, &mut self.tweens, &mut self.timers);
                if let Some(tag) = finished {
                    self.after_caption(tag, now);
                }
            }
            cue => debug!("{:?} ignored in {:?}", cue, self.phase()),
        }
    }

    fn after_caption(&mut self, tag: Tag, now: f32) {
        match tag {
            Tag::CollectIntro => {
                let message = self.config.messages.pinch_hint.clone();
                self.say(Tag::PinchHint, message, self.pacing.hint_hold, true, now);
            }
            Tag::Finale => {
                let message = self.config.messages.ornaments_hint.clone();
                self.say(Tag::OrnamentsHint, message, self.pacing.hint_hold, false, now);
            }
            _ => {}
        }
    }

    fn set_state(&mut self, state: PhaseState, now: f32) {
        if let Some(phase) = state.phase() {
            info!("phase {:?} at {:.2}s", phase, now);
            self.history.push((phase, now));
        }
        self.state = state;
    }

    // Start menu

    fn hide_menu(&mut self, now: f32) {
        if !self.is_waiting_for_start() {
            debug!("start ignored");
            return;
        }
        let scene = &self.config.scene;
        let (Some(menu), button) = (scene.start_menu.clone(), scene.start_button.clone()) else {
            return;
        };
        if let Some(button) = button {
            self.stage.set_interactable(&button, false);
        }
        let from = self.stage.local_transform(&menu).map(|t| t.scale).unwrap_or(Vec3::ONE);
        self.state = PhaseState::Menu { hiding: true };
        self.animate(
            Tween::new(Track::LocalScale { entity: menu, from, to: Vec3::ZERO }, self.pacing.menu_hide)
                .easing(Easing::QuadIn)
                .on_complete(Cue::MenuHidden),
            now,
        );
        for material in self.config.scene.start_menu_materials.clone() {
            self.fade_to(&Some(material), 0.0, self.pacing.menu_fade, Easing::QuadIn, now);
        }
    }

    fn start_bounce(&mut self, now: f32) {
        let Some(star) = self.resolve(&self.config.scene.start_star.clone(), "start star") else {
            return;
        };
        let origin = self.stage.local_transform(&star).map(|t| t.position).unwrap_or(Vec3::ZERO);
        self.bounce_origin = Some((star, origin));
        self.bounce(true, now);
    }

    // Each leg cues the opposite one; the chain ends once the menu is gone.
    fn bounce(&mut self, up: bool, now: f32) {
        let Some((star, origin)) = self.bounce_origin.clone() else {
            return;
        };
        let from = self.stage.local_transform(&star).map(|t| t.position).unwrap_or(origin);
        let to = if up {
            origin + Vec3::new(0.0, self.config.motion.bounce_distance, 0.0)
        } else {
            origin
        };
        self.animate(
            Tween::new(Track::LocalPosition { entity: star, from, to }, self.pacing.bounce)
                .easing(Easing::SineInOut)
                .on_complete(Cue::Bounce { up: !up }),
            now,
        );
    }

    // Descending

    fn enter_descent(&mut self, now: f32) {
        if let Some(root) = self.resolve(&self.config.scene.star_root.clone(), "star root") {
            self.stage.set_enabled(&root, true);
        }
        let duration = self.pacing.descent;
        let motion = self.config.motion.clone();
        match self.resolve(&self.config.scene.star.clone(), "star") {
            Some(star) => {
                self.stage.set_enabled(&star, true);
                let from = self.stage.local_transform(&star).map(|t| t.position).unwrap_or(Vec3::ZERO);
                let to = from - Vec3::new(0.0, motion.descent_distance, 0.0);
                self.animate(
                    Tween::new(
                        Track::LocalScale {
                            entity: star.clone(),
                            from: Vec3::splat(motion.descent_start_scale),
                            to: Vec3::splat(motion.descent_end_scale),
                        },
                        duration,
                    )
                    .easing(Easing::QuadOut),
                    now,
                );
                self.animate(
                    Tween::new(Track::LocalPosition { entity: star, from, to }, duration)
                        .easing(Easing::QuadInOut)
                        .on_complete(Cue::DescentFinished),
                    now,
                );
            }
            None => {
                self.animate(Tween::new(Track::Idle, duration).on_complete(Cue::DescentFinished), now);
            }
        }
        self.set_state(PhaseState::Descending, now);
    }

    fn record_item_positions(&mut self) {
        for item in self.items.iter_mut() {
            match self.stage.local_transform(&item.id) {
                Some(t) => item.original_local_position = t.position,
                None => warn!("item {} missing from the scene", item.id),
            }
        }
    }

    fn cache_decor(&mut self) {
        if self.spikes_scale.is_empty() {
            self.spikes_scale = self
                .config
                .scene
                .spikes
                .iter()
                .filter_map(|id| self.stage.local_transform(id).map(|t| (id.clone(), t.scale)))
                .collect();
        }
        if self.decal_scale.is_none() {
            self.decal_scale = self
                .config
                .scene
                .decal
                .as_ref()
                .and_then(|id| self.stage.local_transform(id).map(|t| (id.clone(), t.scale)));
        }
    }

    // WindBlowing

    fn enter_wind(&mut self, now: f32) {
        self.set_state(PhaseState::WindBlowing, now);
        self.play(&self.config.scene.sounds.wind.clone(), 1);
        if let Some(wind) = self.resolve(&self.config.scene.wind.clone(), "wind") {
            self.stage.set_enabled(&wind, true);
            self.timers.after(now, self.pacing.wind_visible.secs(), Cue::WindFaded);
        }
        self.timers.after(now, self.pacing.wind_hold.secs(), Cue::WindPassed);
    }

    // Exploding

    fn enter_explosion(&mut self, now: f32) {
        self.set_state(PhaseState::Exploding, now);
        self.set_star_animations_paused(true);
        self.play(&self.config.scene.sounds.explosion.clone(), 1);

        let halo_fade = self.pacing.halo_fade;
        let border_dim = self.config.motion.border_dim;
        self.fade_to(&self.config.scene.halo.clone(), 0.0, halo_fade, Easing::Linear, now);
        self.fade_to(&self.config.scene.border.clone(), border_dim, halo_fade, Easing::Linear, now);

        if let Some((decal, from)) = self.decal_scale.clone() {
            self.scale_to(decal, from, Vec3::ZERO, self.pacing.decal, now);
        }
        let factor = self.config.motion.spikes_factor;
        for (spike, original) in self.spikes_scale.clone() {
            let from = self.stage.local_transform(&spike).map(|t| t.scale).unwrap_or(original);
            self.scale_to(spike, from, original * factor, self.pacing.spikes, now);
        }

        let camera = self
            .resolve(&self.config.scene.camera.clone(), "camera")
            .and_then(|c| self.stage.world_position(&c));
        let distance = self.config.motion.explosion_distance;
        let pull = self.config.motion.user_pull;
        let explosion = self.pacing.explosion;
        for index in 0..self.items.len() {
            let id = self.items[index].id.clone();
            let Some(start) = self.stage.world_position(&id) else {
                warn!("item {} missing; not scattered", id);
                continue;
            };
            let outward = self.items[index].direction * distance;
            let toward_user = camera
                .map(|cam| (cam - start).normalize_or_zero() * pull)
                .unwrap_or(Vec3::ZERO);
            self.animate(
                Tween::new(Track::WorldPosition { entity: id, from: start, to: start + outward + toward_user }, explosion)
                    .easing(Easing::QuadOut),
                now,
            );
        }
        self.timers.after(now, explosion.secs(), Cue::ExplosionSettled);
    }

    // Collecting

    fn enter_collecting(&mut self, now: f32) {
        let message = self.config.messages.collect_intro.clone();
        self.say(Tag::CollectIntro, message, self.pacing.caption_hold, false, now);
        let gate = CollectionGate::arm(&self.items, self.pacing.failsafe, now, &mut self.timers, Cue::Failsafe);
        self.set_state(PhaseState::Collecting { gate, settle: None }, now);
    }

    fn on_gate(&mut self, signals: Vec<GateSignal>, now: f32) {
        for signal in signals {
            match signal {
                GateSignal::ItemCollected { item, remaining } => {
                    info!("{} collected, {} remaining", self.items[item].id, remaining);
                    self.play(&self.config.scene.sounds.collected.clone(), 1);
                    self.send_home(item, now);
                    if remaining > 0 {
                        let message = self.config.messages.remaining(remaining);
                        self.say(Tag::Remaining, message, self.pacing.remaining_hold, false, now);
                    }
                }
                GateSignal::Swept { items } => {
                    for item in items {
                        self.send_home(item, now);
                    }
                }
                GateSignal::AllDone(via) => {
                    let settle = match via {
                        Completion::Selected => self.pacing.collect_settle,
                        Completion::Failsafe => self.pacing.failsafe_settle,
                    };
                    let timer = self.timers.after(now, self.pacing.collect.secs() + settle, Cue::Unify);
                    info!("all items collected ({:?})", via);
                    if let PhaseState::Collecting { settle, .. } = &mut self.state {
                        *settle = Some(timer);
                    }
                }
            }
        }
    }

    fn send_home(&mut self, index: usize, now: f32) {
        let item = &self.items[index];
        let id = item.id.clone();
        let to = item.original_local_position;
        self.stage.set_interactable(&id, false);
        let Some(from) = self.stage.local_transform(&id).map(|t| t.position) else {
            return;
        };
        self.animate(
            Tween::new(Track::LocalPosition { entity: id, from, to }, self.pacing.collect).easing(Easing::CubicInOut),
            now,
        );
    }

    // Unifying

    fn enter_unifying(&mut self, now: f32) {
        self.set_star_animations_paused(false);
        self.play(&self.config.scene.sounds.unification.clone(), 1);

        let halo_fade = self.pacing.halo_fade;
        self.fade_to(&self.config.scene.halo.clone(), 1.0, halo_fade, Easing::Linear, now);
        self.fade_to(&self.config.scene.border.clone(), 1.0, halo_fade, Easing::Linear, now);
        if let Some((decal, original)) = self.decal_scale.clone() {
            let from = self.stage.local_transform(&decal).map(|t| t.scale).unwrap_or(Vec3::ZERO);
            self.scale_to(decal, from, original, self.pacing.decal, now);
        }
        for (spike, original) in self.spikes_scale.clone() {
            let from = self.stage.local_transform(&spike).map(|t| t.scale).unwrap_or(original);
            self.scale_to(spike, from, original, self.pacing.spikes, now);
        }

        let message = self.config.messages.rekindled.clone();
        self.say(Tag::Rekindled, message, self.pacing.caption_hold, false, now);

        if let Some(star) = self.resolve(&self.config.scene.star.clone(), "star") {
            let from = self.stage.local_transform(&star).map(|t| t.position).unwrap_or(Vec3::ZERO);
            let to = from + Vec3::new(0.0, self.config.motion.rise_distance, 0.0);
            self.animate(
                Tween::new(Track::LocalPosition { entity: star, from, to }, self.pacing.rise).easing(Easing::QuadInOut),
                now,
            );
        }
        if let Some(tree) = self.resolve(&self.config.scene.tree.clone(), "tree") {
            self.stage.set_enabled(&tree, true);
            self.schedule_tree_parts(now);
        }
        if let Some(snow) = self.resolve(&self.config.scene.snow.clone(), "snow") {
            self.stage.set_enabled(&snow, true);
        }

        let reveals_pending = self.schedule_reveals(RevealGroup::Ornaments, now)
            + self.schedule_reveals(RevealGroup::Landscape, now);
        self.timers.after(now, self.pacing.rise.secs() + self.pacing.finale_delay, Cue::Finish);
        self.set_state(PhaseState::Unifying { reveals_pending }, now);
    }

    fn schedule_tree_parts(&mut self, now: f32) {
        let pacing = self.pacing.tree;
        for (index, part) in self.config.scene.tree_children.iter().enumerate() {
            if !self.stage.has_entity(part) {
                warn!("tree part '{}' not found in the scene", part);
                continue;
            }
            let delay = pacing.start_delay + index as f32 * pacing.delay_between;
            self.timers.after(now, delay, Cue::TreePart(index));
        }
    }

    fn reveal_tree_part(&mut self, index: usize, now: f32) {
        let Some(part) = self.config.scene.tree_children.get(index).cloned() else {
            return;
        };
        self.stage.set_enabled(&part, true);
        let from = self.stage.local_transform(&part).map(|t| t.rotation).unwrap_or(Vec3::ZERO);
        let to = from + Vec3::new(0.0, self.config.motion.tree_rotation, 0.0);
        self.animate(
            Tween::new(Track::LocalRotation { entity: part, from, to }, self.pacing.tree.rotation)
                .easing(Easing::QuadInOut),
            now,
        );
    }

    fn reveal_set(&self, group: RevealGroup) -> (&[EntityId], RevealPacing, Easing) {
        match group {
            RevealGroup::Ornaments => (&self.config.scene.ornaments, self.pacing.ornaments, Easing::BackOut),
            RevealGroup::Landscape => (&self.config.scene.landscape, self.pacing.landscape, Easing::QuadInOut),
        }
    }

    fn schedule_reveals(&mut self, group: RevealGroup, now: f32) -> usize {
        let (entities, pacing, _) = self.reveal_set(group);
        let present: Vec<usize> = entities
            .iter()
            .enumerate()
            .filter(|(_, id)| self.stage.has_entity(id))
            .map(|(i, _)| i)
            .collect();
        if present.len() != entities.len() {
            warn!("{:?}: {} of {} entities missing", group, entities.len() - present.len(), entities.len());
        }
        for &index in &present {
            let delay = pacing.start_delay + self.rng.gen_range(pacing.delay_min..=pacing.delay_max);
            self.timers.after(now, delay, Cue::Reveal(group, index));
        }
        present.len()
    }

    fn reveal(&mut self, group: RevealGroup, index: usize, now: f32) {
        let (entities, pacing, easing) = self.reveal_set(group);
        let Some(id) = entities.get(index).cloned() else {
            return;
        };
        self.stage.set_enabled(&id, true);
        self.scale_to_eased(id, Vec3::splat(REVEAL_SEED_SCALE), Vec3::ONE, pacing.duration, easing, now);
        if let PhaseState::Unifying { reveals_pending } = &mut self.state {
            *reveals_pending = reveals_pending.saturating_sub(1);
        }
    }

    // Complete

    fn enter_complete(&mut self, now: f32) {
        if let PhaseState::Unifying { reveals_pending } = self.state {
            if reveals_pending > 0 {
                debug!("{} reveal(s) still pending at completion", reveals_pending);
            }
        }
        self.set_state(PhaseState::Complete, now);
        for id in self.resolve_all(&self.config.scene.finale.clone(), "finale") {
            self.stage.set_enabled(&id, true);
        }
        let message = self.config.messages.finale.clone();
        self.say(Tag::Finale, message, self.pacing.finale_hold, false, now);
    }

    // Scene helpers

    fn prepare_scene(&mut self) {
        self.play(&self.config.scene.sounds.soundtrack.clone(), -1);
        self.caption.reset(&mut self.stage);

        let scene = self.config.scene.clone();
        let hidden = [scene.star.clone(), scene.star_root.clone(), scene.wind.clone(), scene.snow.clone(), scene.tree.clone()]
            .into_iter()
            .flatten()
            .chain(scene.tree_children.iter().cloned())
            .chain(scene.finale.iter().cloned())
            .chain(scene.ornaments.iter().cloned())
            .chain(scene.landscape.iter().cloned());
        for id in hidden {
            self.stage.set_enabled(&id, false);
        }
        if let Some(menu) = &scene.start_menu {
            self.stage.set_enabled(menu, true);
        }
        self.cache_decor();
    }

    fn resolve(&self, binding: &Option<EntityId>, what: &str) -> Option<EntityId> {
        match binding {
            Some(id) if self.stage.has_entity(id) => Some(id.clone()),
            Some(id) => {
                warn!("{} '{}' not found in the scene", what, id);
                None
            }
            None => {
                warn!("{} not assigned", what);
                None
            }
        }
    }

    fn resolve_all(&self, ids: &[EntityId], what: &str) -> Vec<EntityId> {
        ids.iter()
            .filter(|id| {
                let found = self.stage.has_entity(id);
                if !found {
                    warn!("{} '{}' not found in the scene", what, id);
                }
                found
            })
            .cloned()
            .collect()
    }

    fn set_star_animations_paused(&mut self, paused: bool) {
        for id in self.resolve_all(&self.config.scene.star_animations.clone(), "star animation") {
            self.stage.set_animations_paused(&id, paused);
        }
    }

    fn play(&mut self, sound: &Option<SoundId>, loops: i32) {
        if let Some(sound) = sound {
            self.stage.play_sound(sound, loops);
        }
    }

    fn animate(&mut self, tween: Tween<Cue>, now: f32) -> TweenId {
        self.tweens.start(tween, now, &mut self.stage)
    }

    fn fade_to(&mut self, material: &Option<MaterialId>, to: f32, duration: Span, easing: Easing, now: f32) {
        let Some(material) = material else { return };
        let Some(from) = self.stage.alpha(material) else {
            warn!("material '{}' not found", material);
            return;
        };
        self.animate(
            Tween::new(Track::Alpha { material: material.clone(), from, to }, duration).easing(easing),
            now,
        );
    }

    fn scale_to(&mut self, entity: EntityId, from: Vec3, to: Vec3, duration: Span, now: f32) {
        self.scale_to_eased(entity, from, to, duration, Easing::QuadInOut, now);
    }

    fn scale_to_eased(&mut self, entity: EntityId, from: Vec3, to: Vec3, duration: Span, easing: Easing, now: f32) {
        self.stage.set_local_transform(&entity, TransformPatch::scale(from));
        self.animate(Tween::new(Track::LocalScale { entity, from, to }, duration).easing(easing), now);
    }

    fn say(&mut self, tag: Tag, message: String, hold: Span, show_hint: bool, now: f32) {
        let caption = Caption {
            message,
            tag,
            hold,
            fade_in: self.pacing.caption_fade_in,
            fade_out: self.pacing.caption_fade_out,
            show_hint,
        };
        self.caption.show(caption, now, &mut self.stage, &mut self.tweens, &mut self.timers);
    }
}

impl<S: Stage> Feature for Story<S> {
    fn name(&self) -> &'static str {
        "story"
    }

    fn update(&mut self, now: f32) {
        self.tick(now);
    }

    fn handle_event(&mut self, event: &UiEvent) -> bool {
        match event {
            UiEvent::StartPressed => {
                self.press_start();
                true
            }
            UiEvent::Select(item) => {
                self.on_action_selected(item.clone());
                true
            }
            UiEvent::Quit => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::math::Transform;
    use crate::stage::MemoryStage;
    use rand::rngs::mock::StepRng;

    fn bare_config() -> Config {
        let mut config = Config::default();
        config.scene.start_menu = None;
        config.scene.start_button = None;
        config
    }

    fn stage() -> MemoryStage {
        MemoryStage::new()
            .with_entity("star_root", Transform::default())
            .with_entity("star", Transform::at(Vec3::new(0.0, 1.0, -1.0)))
            .with_entity("shard_a", Transform::at(Vec3::new(0.0, 0.1, 0.0)))
            .with_entity("shard_b", Transform::at(Vec3::new(-0.1, 0.0, 0.0)))
            .with_entity("shard_c", Transform::at(Vec3::new(0.1, 0.0, 0.0)))
            .with_entity("wind", Transform::default())
            .with_entity("camera", Transform::at(Vec3::new(0.0, 1.0, 1.0)))
            .with_entity("spikes_tall", Transform::default())
            .with_entity("caption_panel", Transform::default())
            .with_entity("ornament_1", Transform::default())
            .with_entity("ornament_2", Transform::default())
            .with_material("caption_text", 1.0)
            .with_material("halo", 1.0)
    }

    fn story(config: Config) -> Story<MemoryStage> {
        Story::new(config, stage(), Box::new(StepRng::new(0, 0))).unwrap()
    }

    fn run(story: &mut Story<MemoryStage>, from: f32, to: f32) -> f32 {
        let mut now = from;
        while now < to {
            story.tick(now);
            now += 0.02;
        }
        now
    }

    #[test]
    fn nothing_happens_before_begin() {
        let mut s = story(bare_config());
        s.tick(10.0);
        assert_eq!(s.phase(), None);
        assert!(!s.stage().is_enabled("star"));
        assert_eq!(s.stage().sounds(), [(SoundId::from("soundtrack"), -1)]);
    }

    #[test]
    fn descent_moves_and_grows_the_star() {
        let mut s = story(bare_config());
        s.begin(0.0);
        assert_eq!(s.phase(), Some(Phase::Descending));
        assert!(s.stage().is_enabled("star"));
        assert_eq!(s.stage().node("star").unwrap().transform.scale, Vec3::ZERO);

        run(&mut s, 0.0, 5.1);
        let star = s.stage().node("star").unwrap().transform;
        assert!((star.position.y - 0.7).abs() < 1e-5);
        assert_eq!(star.scale, Vec3::splat(0.05));
        assert_eq!(s.phase(), Some(Phase::WindBlowing));
        assert!(s.stage().is_enabled("wind"));
        assert_eq!(s.items()[0].original_local_position, Vec3::new(0.0, 0.1, 0.0));
    }

    #[test]
    fn explosion_scatters_items_and_dims_the_halo() {
        let mut s = story(bare_config());
        s.begin(0.0);
        let now = run(&mut s, 0.0, 6.5);
        assert_eq!(s.phase(), Some(Phase::Exploding));
        run(&mut s, now, 7.1);
        assert_eq!(s.phase(), Some(Phase::Collecting));
        let a = s.stage().node("shard_a").unwrap().transform.position;
        let moved = a.distance(Vec3::new(0.0, 0.1, 0.0));
        assert!(moved > 0.3, "shard_a moved only {moved}");
        assert_eq!(s.stage().material_alpha("halo"), Some(0.0));
        assert_eq!(s.remaining(), Some(3));
    }

    #[test]
    fn selections_outside_collecting_are_ignored() {
        let mut s = story(bare_config());
        s.begin(0.0);
        s.on_action_selected(EntityId::from("shard_a"));
        run(&mut s, 0.0, 7.1);
        assert!(s.items().iter().all(|i| !i.collected));
        assert_eq!(s.remaining(), Some(3));
    }

    #[test]
    fn collect_intro_chains_the_pinch_hint() {
        let mut s = story(bare_config());
        s.begin(0.0);
        run(&mut s, 0.0, 14.0);
        let captions = s.stage().captions();
        let intro = captions.iter().position(|c| c.starts_with("COLLECT")).unwrap();
        assert!(captions[intro + 1].starts_with("PINCH & POINT"));
    }

    #[test]
    fn missing_star_keeps_descent_timing() {
        let mut config = bare_config();
        config.scene.star = Some(EntityId::from("not_there"));
        let mut s = story(config);
        s.begin(0.0);
        run(&mut s, 0.0, 4.9);
        assert_eq!(s.phase(), Some(Phase::Descending));
        run(&mut s, 4.9, 5.1);
        assert_eq!(s.phase(), Some(Phase::WindBlowing));
    }

    #[test]
    fn start_menu_waits_for_press() {
        let stage = stage()
            .with_entity("start_menu", Transform::default())
            .with_entity("start_button", Transform::default())
            .with_material("start_backdrop", 1.0);
        let mut s = Story::new(Config::default(), stage, Box::new(StepRng::new(0, 0))).unwrap();
        s.begin(0.0);
        assert!(s.is_waiting_for_start());
        run(&mut s, 0.0, 3.0);
        assert_eq!(s.phase(), None);

        s.press_start();
        let now = run(&mut s, 3.0, 3.6);
        assert_eq!(s.phase(), Some(Phase::Descending));
        assert!(!s.stage().is_enabled("start_menu"));
        assert!(!s.stage().node("start_button").unwrap().interactable);

        run(&mut s, now, 4.2);
        assert_eq!(s.stage().material_alpha("start_backdrop"), Some(0.0));
    }

    #[test]
    fn start_star_bounces_until_the_menu_is_gone() {
        let stage = stage()
            .with_entity("start_menu", Transform::default())
            .with_entity("start_button", Transform::default())
            .with_entity("start_star", Transform::at(Vec3::new(0.0, 1.0, 0.0)));
        let mut s = Story::new(Config::default(), stage, Box::new(StepRng::new(0, 0))).unwrap();
        s.begin(0.0);
        let height = |s: &Story<MemoryStage>| s.stage().node("start_star").unwrap().transform.position.y;

        let (mut peaks, mut troughs, mut rising) = (0, 0, true);
        let mut now = 0.0;
        while now < 4.5 {
            s.tick(now);
            let y = height(&s);
            if rising && y >= 1.02 - 1e-6 {
                peaks += 1;
                rising = false;
            } else if !rising && y <= 1.0 + 1e-6 {
                troughs += 1;
                rising = true;
            }
            assert!((1.0 - 1e-6..=1.02 + 1e-6).contains(&y), "star at {y}");
            now += 0.02;
        }
        assert_eq!((peaks, troughs), (2, 2));

        s.press_start();
        while s.phase() != Some(Phase::Descending) {
            s.tick(now);
            now += 0.02;
        }
        let stopped = run(&mut s, now, now + 1.2);
        let resting = height(&s);
        run(&mut s, stopped, stopped + 2.0);
        assert_eq!(height(&s), resting);
    }

    #[test]
    fn tree_parts_appear_in_turn_and_rotate() {
        let mut config = bare_config();
        config.timing.failsafe = 1.0;
        let stage = stage()
            .with_entity("tree", Transform::default())
            .with_entity("tree_tier_1", Transform::default())
            .with_entity("tree_tier_2", Transform::default())
            .with_entity("tree_topper", Transform { rotation: Vec3::new(0.0, 10.0, 0.0), ..Transform::default() });
        let mut s = Story::new(config, stage, Box::new(StepRng::new(0, 0))).unwrap();
        s.begin(0.0);
        assert!(!s.stage().is_enabled("tree_tier_1"));

        // tree_tier_3 is missing, so the topper keeps its fourth slot.
        let parts = ["tree_tier_1", "tree_tier_2", "tree_topper"];
        let mut shown = [None; 3];
        let mut now = 0.0;
        while now < 20.0 {
            s.tick(now);
            for (slot, name) in shown.iter_mut().zip(parts) {
                if slot.is_none() && s.stage().is_enabled(name) {
                    *slot = Some(now);
                }
            }
            now += 0.02;
        }

        let unifying = s.entered_at(Phase::Unifying).unwrap();
        for (seen, offset) in shown.iter().zip([0.0, 0.5, 1.5]) {
            let at = seen.unwrap() - unifying;
            assert!(at >= offset - 1e-3 && at <= offset + 0.05, "expected +{offset}s, got +{at}s");
        }
        let turned = |name| s.stage().node(name).unwrap().transform.rotation;
        assert_eq!(turned("tree_tier_1"), Vec3::new(0.0, 45.0, 0.0));
        assert_eq!(turned("tree_topper"), Vec3::new(0.0, 55.0, 0.0));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = bare_config();
        config.timing.descent = -1.0;
        assert!(Story::new(config, stage(), Box::new(StepRng::new(0, 0))).is_err());
    }
}
