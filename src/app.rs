use crate::config::Config;
use crate::features::story::{Phase, Story};
use crate::features::Feature;
use crate::stage::{EntityId, Stage};
use anyhow::Result;
use log::info;
use rand::RngCore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    StartPressed,
    /// The user pinched or clicked a collectible.
    Select(EntityId),
    Quit,
}

pub struct App<S> {
    pub story: Story<S>,
    pub time: f32,
    pub running: bool,
    last_phase: Option<Phase>,
}

impl<S: Stage> App<S> {
    pub fn new(config: Config, stage: S, rng: Box<dyn RngCore>) -> Result<Self> {
        let story = Story::new(config, stage, rng)?;
        Ok(Self {
            story,
            time: 0.0,
            running: true,
            last_phase: None,
        })
    }

    pub fn start(&mut self) {
        self.story.begin(self.time);
    }

    pub fn handle_event(&mut self, event: UiEvent) {
        if event == UiEvent::Quit {
            info!("quit requested at {:.2}s", self.time);
            self.running = false;
            return;
        }
        if !self.story.handle_event(&event) {
            info!("{} ignored {:?}", self.story.name(), event);
        }
    }

    pub fn update(&mut self, dt: f32) {
        self.time += dt;
        self.story.update(self.time);

        let phase = self.story.phase();
        if phase != self.last_phase {
            if let Some(phase) = phase {
                println!("[{:6.2}s] {:?}", self.time, phase);
            }
            self.last_phase = phase;
        }
        if self.story.is_settled() {
            info!("story settled at {:.2}s", self.time);
            self.running = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::math::Transform;
    use crate::stage::MemoryStage;
    use rand::rngs::mock::StepRng;

    fn app() -> App<MemoryStage> {
        let mut config = Config::default();
        config.scene.start_menu = None;
        config.timing.failsafe = 2.0;
        let stage = MemoryStage::new()
            .with_entity("shard_a", Transform::default())
            .with_entity("shard_b", Transform::default())
            .with_entity("shard_c", Transform::default());
        App::new(config, stage, Box::new(StepRng::new(0, 0))).unwrap()
    }

    #[test]
    fn quit_stops_the_loop() {
        let mut app = app();
        app.start();
        app.handle_event(UiEvent::Quit);
        assert!(!app.running);
    }

    #[test]
    fn runs_until_settled() {
        let mut app = app();
        app.start();
        let mut frames = 0;
        while app.running && frames < 10_000 {
            app.update(1.0 / 60.0);
            frames += 1;
        }
        assert!(!app.running);
        assert_eq!(app.story.phase(), Some(Phase::Complete));
    }

    #[test]
    fn selections_reach_the_story() {
        let mut app = app();
        app.start();
        while app.story.phase() != Some(Phase::Collecting) {
            app.update(0.05);
        }
        app.handle_event(UiEvent::Select(EntityId::from("shard_b")));
        app.update(0.05);
        assert_eq!(app.story.remaining(), Some(2));
    }
}
