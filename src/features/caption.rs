use crate::gfx::anim::{Easing, Span};
use crate::gfx::tween::{Track, Tween, TweenId, TweenRegistry};
use crate::schedule::{Scheduler, TimerId};
use crate::stage::{EntityId, MaterialId, Stage};
use log::{debug, info, warn};
use std::fmt::Debug;

/// Where captions are displayed. Every binding is optional; without a text
/// material the caption still runs its timing so continuations happen.
#[derive(Debug, Clone, Default)]
pub struct CaptionChannel {
    pub panel: Option<EntityId>,
    pub text: Option<MaterialId>,
    pub backdrop: Option<MaterialId>,
    pub hint: Option<EntityId>,
}

#[derive(Debug, Clone)]
pub struct Caption<T> {
    pub message: String,
    pub tag: T,
    pub hold: Span,
    pub fade_in: Span,
    pub fade_out: Span,
    pub show_hint: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionStep {
    FadingIn,
    Holding,
    FadingOut,
}

/// Tween and timer payloads of the caption channel, keyed by session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionCue {
    FadedIn(u64),
    HoldElapsed(u64),
    FadedOut(u64),
}

impl CaptionCue {
    fn session(self) -> u64 {
        match self {
            CaptionCue::FadedIn(s) | CaptionCue::HoldElapsed(s) | CaptionCue::FadedOut(s) => s,
        }
    }
}

#[derive(Debug)]
struct Session<T> {
    id: u64,
    message: String,
    tag: T,
    hold: Span,
    fade_out: Span,
    step: CaptionStep,
    step_started: f32,
    fade: Option<TweenId>,
    hold_timer: Option<TimerId>,
}

#[derive(Debug)]
pub struct TextSequencer<T> {
    channel: CaptionChannel,
    session: Option<Session<T>>,
    next_session: u64,
    backdrop_fade: Option<TweenId>,
}

fn alpha_track(material: &Option<MaterialId>, from: f32, to: f32) -> Track {
    match material {
        Some(material) => Track::Alpha { material: material.clone(), from, to },
        None => Track::Idle,
    }
}

impl<T: Clone + Debug> TextSequencer<T> {
    pub fn new(channel: CaptionChannel) -> Self {
        Self {
            channel,
            session: None,
            next_session: 0,
            backdrop_fade: None,
        }
    }

    /// Prepares the channel before anything is shown: panel and hint off,
    /// backdrop transparent.
    pub fn reset(&self, stage: &mut dyn Stage) {
        if self.channel.text.is_none() {
            warn!("no caption material bound; messages are only logged");
        }
        if let Some(panel) = &self.channel.panel {
            stage.set_enabled(panel, false);
        }
        if let Some(hint) = &self.channel.hint {
            stage.set_enabled(hint, false);
        }
        if let Some(backdrop) = &self.channel.backdrop {
            stage.set_alpha(backdrop, 0.0);
        }
    }

    pub fn is_idle(&self) -> bool {
        self.session.is_none()
    }

    pub fn step(&self) -> Option<CaptionStep> {
        self.session.as_ref().map(|s| s.step)
    }

    pub fn message(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.message.as_str())
    }

    pub fn tag(&self) -> Option<&T> {
        self.session.as_ref().map(|s| &s.tag)
    }

    /// Seconds spent in the current step.
    pub fn step_elapsed(&self, now: f32) -> Option<f32> {
        self.session.as_ref().map(|s| now - s.step_started)
    }

    /// Starts a new session, superseding the live one.
    pub fn show<C: From<CaptionCue>>(
        &mut self,
        caption: Caption<T>,
        now: f32,
        stage: &mut dyn Stage,
        tweens: &mut TweenRegistry<C>,
        timers: &mut Scheduler<C>,
    ) {
        self.cancel(tweens, timers);

        let id = self.next_session;
        self.next_session += 1;
        info!("caption {:?}: {:?}", caption.tag, caption.message);

        if let Some(panel) = &self.channel.panel {
            stage.set_enabled(panel, true);
        }
        if let Some(hint) = &self.channel.hint {
            stage.set_enabled(hint, caption.show_hint);
        }
        stage.set_text(&caption.message);
        if let Some(text) = &self.channel.text {
            stage.set_alpha(text, 0.0);
        }
        self.fade_backdrop(1.0, caption.fade_in, now, stage, tweens);

        let fade = tweens.start(
            Tween::new(alpha_track(&self.channel.text, 0.0, 1.0), caption.fade_in)
                .easing(Easing::Linear)
                .on_complete(C::from(CaptionCue::FadedIn(id))),
            now,
            stage,
        );
        self.session = Some(Session {
            id,
            message: caption.message,
            tag: caption.tag,
            hold: caption.hold,
            fade_out: caption.fade_out,
            step: CaptionStep::FadingIn,
            step_started: now,
            fade: Some(fade),
            hold_timer: None,
        });
    }

    /// Advances the live session. Returns the tag once its fade-out has
    /// finished so the caller can run the follow-up for that tag.
    pub fn handle<C: From<CaptionCue>>(
        &mut self,
        cue: CaptionCue,
        now: f32,
        stage: &mut dyn Stage,
        tweens: &mut TweenRegistry<C>,
        timers: &mut Scheduler<C>,
    ) -> Option<T> {
        let live = self.session.as_ref().map(|s| (s.id, s.step));
        match (live, cue) {
            (Some((id, CaptionStep::FadingIn)), CaptionCue::FadedIn(s)) if id == s => {
                let session = self.session.as_mut()?;
                session.fade = None;
                session.step = CaptionStep::Holding;
                session.step_started = now;
                session.hold_timer = Some(timers.after(now, session.hold.secs(), C::from(CaptionCue::HoldElapsed(id))));
                None
            }
            (Some((id, CaptionStep::Holding)), CaptionCue::HoldElapsed(s)) if id == s => {
                let fade_out = {
                    let session = self.session.as_mut()?;
                    session.hold_timer = None;
                    session.step = CaptionStep::FadingOut;
                    session.step_started = now;
                    session.fade_out
                };
                self.fade_backdrop(0.0, fade_out, now, stage, tweens);
                let fade = tweens.start(
                    Tween::new(alpha_track(&self.channel.text, 1.0, 0.0), fade_out)
                        .on_complete(C::from(CaptionCue::FadedOut(id))),
                    now,
                    stage,
                );
                if let Some(session) = self.session.as_mut() {
                    session.fade = Some(fade);
                }
                None
            }
            (Some((id, CaptionStep::FadingOut)), CaptionCue::FadedOut(s)) if id == s => {
                let session = self.session.take()?;
                if let Some(panel) = &self.channel.panel {
                    stage.set_enabled(panel, false);
                }
                if let Some(hint) = &self.channel.hint {
                    stage.set_enabled(hint, false);
                }
                Some(session.tag)
            }
            _ => {
                debug!("stale caption cue {:?} (session {})", cue, cue.session());
                None
            }
        }
    }

    fn cancel<C>(&mut self, tweens: &mut TweenRegistry<C>, timers: &mut Scheduler<C>) {
        if let Some(session) = self.session.take() {
            debug!("caption {:?} superseded during {:?}", session.tag, session.step);
            if let Some(timer) = session.hold_timer {
                timers.cancel(timer);
            }
            if let Some(fade) = session.fade {
                tweens.cancel(fade);
            }
        }
    }

    fn fade_backdrop<C>(
        &mut self,
        to: f32,
        duration: Span,
        now: f32,
        stage: &mut dyn Stage,
        tweens: &mut TweenRegistry<C>,
    ) {
        if let Some(prev) = self.backdrop_fade.take() {
            tweens.cancel(prev);
        }
        let Some(backdrop) = &self.channel.backdrop else {
            return;
        };
        let from = stage.alpha(backdrop).unwrap_or(1.0 - to);
        self.backdrop_fade = Some(tweens.start(
            Tween::new(alpha_track(&self.channel.backdrop, from, to), duration),
            now,
            stage,
        ));
    }
}
