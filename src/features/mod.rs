pub mod caption;
pub mod gate;
pub mod story;

use crate::app::UiEvent;

pub trait Feature {
    fn name(&self) -> &'static str;
    fn update(&mut self, now: f32);
    /// Returns true when the event was consumed.
    fn handle_event(&mut self, event: &UiEvent) -> bool;
}
