use crate::gfx::anim::{AnimError, Span};
use crate::gfx::math::Vec3;
use crate::stage::{EntityId, MaterialId, SoundId};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_scene")]
    pub scene: Scene,

    #[serde(default = "default_timing")]
    pub timing: Timing,

    #[serde(default = "default_motion")]
    pub motion: Motion,

    #[serde(default = "default_caption")]
    pub caption: CaptionTiming,

    #[serde(default = "default_messages")]
    pub messages: Messages,

    #[serde(default = "default_fps_cap")]
    pub fps_cap: u32,
}

/// Names of the scene content the story drives. Everything except the item
/// list may be left out; the matching visual step is then skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Scene {
    pub start_menu: Option<EntityId>,
    pub start_button: Option<EntityId>,
    pub start_menu_materials: Vec<MaterialId>,
    /// Bobs up and down while the start menu waits.
    pub start_star: Option<EntityId>,
    pub star_root: Option<EntityId>,
    pub star: Option<EntityId>,
    pub items: Vec<ItemBinding>,
    pub star_animations: Vec<EntityId>,
    pub spikes: Vec<EntityId>,
    pub decal: Option<EntityId>,
    pub halo: Option<MaterialId>,
    pub border: Option<MaterialId>,
    pub wind: Option<EntityId>,
    pub camera: Option<EntityId>,
    pub tree: Option<EntityId>,
    /// Tree parts switched on one after another once the tree appears.
    pub tree_children: Vec<EntityId>,
    pub snow: Option<EntityId>,
    pub finale: Vec<EntityId>,
    pub ornaments: Vec<EntityId>,
    pub landscape: Vec<EntityId>,
    pub caption: CaptionBindings,
    pub sounds: Sounds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemBinding {
    pub entity: EntityId,
    pub direction: Vec3,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionBindings {
    pub panel: Option<EntityId>,
    pub text: Option<MaterialId>,
    pub backdrop: Option<MaterialId>,
    pub hint: Option<EntityId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Sounds {
    pub soundtrack: Option<SoundId>,
    pub wind: Option<SoundId>,
    pub explosion: Option<SoundId>,
    pub collected: Option<SoundId>,
    pub unification: Option<SoundId>,
}

/// All durations and delays, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub descent: f32,
    pub wind_visible: f32,
    pub wind_hold: f32,
    pub explosion: f32,
    pub collect: f32,
    pub collect_settle: f32,
    pub failsafe_settle: f32,
    pub failsafe: f32,
    pub rise: f32,
    pub finale_delay: f32,
    pub halo_fade: f32,
    pub spikes: f32,
    pub decal: f32,
    pub menu_hide: f32,
    pub menu_fade: f32,
    /// One leg of the start star bounce.
    pub bounce: f32,
    pub tree: TreeTiming,
    pub ornaments: RevealTiming,
    pub landscape: RevealTiming,
}

/// Missing fields fall back to the ornament reveal values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RevealTiming {
    pub duration: f32,
    pub start_delay: f32,
    pub delay_min: f32,
    pub delay_max: f32,
}

impl Default for RevealTiming {
    fn default() -> Self {
        RevealTiming { duration: 0.5, start_delay: 0.0, delay_min: 0.0, delay_max: 3.0 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeTiming {
    pub start_delay: f32,
    pub delay_between: f32,
    pub rotation: f32,
}

impl Default for TreeTiming {
    fn default() -> Self {
        TreeTiming { start_delay: 0.0, delay_between: 0.5, rotation: 3.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Motion {
    pub descent_distance: f32,
    pub descent_start_scale: f32,
    pub descent_end_scale: f32,
    pub explosion_distance: f32,
    pub user_pull: f32,
    pub rise_distance: f32,
    pub spikes_factor: f32,
    pub border_dim: f32,
    pub bounce_distance: f32,
    /// Turn of each tree part about the vertical axis, in degrees.
    pub tree_rotation: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionTiming {
    pub fade_in: f32,
    pub hold: f32,
    pub fade_out: f32,
    pub remaining_hold: f32,
    pub hint_hold: f32,
    pub finale_hold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub shattered: String,
    pub collect_intro: String,
    pub pinch_hint: String,
    pub remaining_one: String,
    /// `{n}` is replaced with the count.
    pub remaining_many: String,
    pub rekindled: String,
    pub finale: String,
    pub ornaments_hint: String,
}

impl Messages {
    pub fn remaining(&self, n: usize) -> String {
        if n == 1 {
            self.remaining_one.clone()
        } else {
            self.remaining_many.replace("{n}", &n.to_string())
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scene: default_scene(),
            timing: default_timing(),
            motion: default_motion(),
            caption: default_caption(),
            messages: default_messages(),
            fps_cap: default_fps_cap(),
        }
    }
}

impl Default for Scene {
    fn default() -> Self {
        default_scene()
    }
}

impl Default for Timing {
    fn default() -> Self {
        default_timing()
    }
}

impl Default for Motion {
    fn default() -> Self {
        default_motion()
    }
}

impl Default for CaptionTiming {
    fn default() -> Self {
        default_caption()
    }
}

impl Default for Messages {
    fn default() -> Self {
        default_messages()
    }
}

fn ids<T: From<&'static str>>(names: &[&'static str]) -> Vec<T> {
    names.iter().map(|n| T::from(*n)).collect()
}

fn default_scene() -> Scene {
    Scene {
        start_menu: Some("start_menu".into()),
        start_button: Some("start_button".into()),
        start_menu_materials: ids(&["start_backdrop", "start_title"]),
        start_star: Some("start_star".into()),
        star_root: Some("star_root".into()),
        star: Some("star".into()),
        items: vec![
            ItemBinding { entity: "shard_a".into(), direction: Vec3::new(0.0, 0.5, -0.3) },
            ItemBinding { entity: "shard_b".into(), direction: Vec3::new(-0.6, -0.2, -0.2) },
            ItemBinding { entity: "shard_c".into(), direction: Vec3::new(0.6, -0.2, -0.2) },
        ],
        star_animations: ids(&["star_rings"]),
        spikes: ids(&["spikes_tall", "spikes_short"]),
        decal: Some("snowflake".into()),
        halo: Some("halo".into()),
        border: Some("star_border".into()),
        wind: Some("wind".into()),
        camera: Some("camera".into()),
        tree: Some("tree".into()),
        tree_children: ids(&["tree_tier_1", "tree_tier_2", "tree_tier_3", "tree_topper"]),
        snow: Some("snow".into()),
        finale: ids(&["sparks_left", "sparks_right"]),
        ornaments: ids(&["ornament_1", "ornament_2", "ornament_3", "ornament_4"]),
        landscape: ids(&["hill", "cabin", "pines"]),
        caption: CaptionBindings {
            panel: Some("caption_panel".into()),
            text: Some("caption_text".into()),
            backdrop: Some("caption_backdrop".into()),
            hint: Some("pinch_hint".into()),
        },
        sounds: Sounds {
            soundtrack: Some("soundtrack".into()),
            wind: Some("wind".into()),
            explosion: Some("explosion".into()),
            collected: Some("collected".into()),
            unification: Some("unification".into()),
        },
    }
}

fn default_timing() -> Timing {
    Timing {
        descent: 5.0,
        wind_visible: 5.0,
        wind_hold: 1.0,
        explosion: 1.0,
        collect: 0.8,
        collect_settle: 0.05,
        failsafe_settle: 0.5,
        failsafe: 120.0,
        rise: 3.0,
        finale_delay: 1.0,
        halo_fade: 1.0,
        spikes: 0.4,
        decal: 0.4,
        menu_hide: 0.5,
        menu_fade: 1.0,
        bounce: 1.0,
        tree: TreeTiming::default(),
        ornaments: RevealTiming::default(),
        landscape: RevealTiming { duration: 2.0, start_delay: 0.0, delay_min: 0.0, delay_max: 2.0 },
    }
}

fn default_motion() -> Motion {
    Motion {
        descent_distance: 0.3,
        descent_start_scale: 0.0,
        descent_end_scale: 0.05,
        explosion_distance: 0.5,
        user_pull: 0.15,
        rise_distance: 0.6,
        spikes_factor: 0.6,
        border_dim: 0.2,
        bounce_distance: 0.02,
        tree_rotation: 45.0,
    }
}

fn default_caption() -> CaptionTiming {
    CaptionTiming {
        fade_in: 0.35,
        hold: 2.0,
        fade_out: 0.35,
        remaining_hold: 1.2,
        hint_hold: 2.0,
        finale_hold: 2.0,
    }
}

fn default_messages() -> Messages {
    Messages {
        shattered: "Oh no! The winter star has\nSHATTERED and gone dark!".to_string(),
        collect_intro: "COLLECT the fragments to\nbring it back to life!".to_string(),
        pinch_hint: "PINCH & POINT to\nCOLLECT the fragments.".to_string(),
        remaining_one: "1 fragment remaining ...".to_string(),
        remaining_many: "{n} fragments remaining ...".to_string(),
        rekindled: "The winter star\nBURNS BRIGHT AGAIN!".to_string(),
        finale: "You are a STAR BEARER.\nMOVE your hands.".to_string(),
        ornaments_hint: "PINCH & DRAG to\nmove the ornaments.".to_string(),
    }
}

fn default_fps_cap() -> u32 {
    60
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field}: {source}")]
    Duration {
        field: &'static str,
        #[source]
        source: AnimError,
    },

    #[error("{field} must be a non-negative delay, got {value}")]
    NegativeDelay { field: &'static str, value: f32 },

    #[error("{field}: minimum delay {min} exceeds maximum {max}")]
    InvertedRange { field: &'static str, min: f32, max: f32 },

    #[error("scene has no collectible items")]
    NoItems,

    #[error("collectible item {id} is listed more than once")]
    DuplicateItem { id: EntityId },
}

#[derive(Debug, Clone, Copy)]
pub struct TreePacing {
    pub start_delay: f32,
    pub delay_between: f32,
    pub rotation: Span,
}

#[derive(Debug, Clone, Copy)]
pub struct RevealPacing {
    pub duration: Span,
    pub start_delay: f32,
    pub delay_min: f32,
    pub delay_max: f32,
}

/// Validated timing: every duration is a [`Span`], every delay non-negative.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub descent: Span,
    pub wind_visible: Span,
    pub wind_hold: Span,
    pub explosion: Span,
    pub collect: Span,
    pub collect_settle: f32,
    pub failsafe_settle: f32,
    pub failsafe: Span,
    pub rise: Span,
    pub finale_delay: f32,
    pub halo_fade: Span,
    pub spikes: Span,
    pub decal: Span,
    pub menu_hide: Span,
    pub menu_fade: Span,
    pub bounce: Span,
    pub tree: TreePacing,
    pub ornaments: RevealPacing,
    pub landscape: RevealPacing,
    pub caption_fade_in: Span,
    pub caption_fade_out: Span,
    pub caption_hold: Span,
    pub remaining_hold: Span,
    pub hint_hold: Span,
    pub finale_hold: Span,
}

fn span(field: &'static str, secs: f32) -> Result<Span, ConfigError> {
    Span::new(secs).map_err(|source| ConfigError::Duration { field, source })
}

fn delay(field: &'static str, value: f32) -> Result<f32, ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::NegativeDelay { field, value })
    }
}

fn reveal(field: &'static str, r: &RevealTiming) -> Result<RevealPacing, ConfigError> {
    let delay_min = delay(field, r.delay_min)?;
    let delay_max = delay(field, r.delay_max)?;
    if delay_min > delay_max {
        return Err(ConfigError::InvertedRange { field, min: delay_min, max: delay_max });
    }
    Ok(RevealPacing {
        duration: span(field, r.duration)?,
        start_delay: delay(field, r.start_delay)?,
        delay_min,
        delay_max,
    })
}

impl Config {
    pub fn validate(&self) -> Result<Pacing, ConfigError> {
        if self.scene.items.is_empty() {
            return Err(ConfigError::NoItems);
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.scene.items.iter().find(|i| !seen.insert(&i.entity)) {
            return Err(ConfigError::DuplicateItem { id: dup.entity.clone() });
        }
        let t = &self.timing;
        let c = &self.caption;
        Ok(Pacing {
            descent: span("timing.descent", t.descent)?,
            wind_visible: span("timing.wind_visible", t.wind_visible)?,
            wind_hold: span("timing.wind_hold", t.wind_hold)?,
            explosion: span("timing.explosion", t.explosion)?,
            collect: span("timing.collect", t.collect)?,
            collect_settle: delay("timing.collect_settle", t.collect_settle)?,
            failsafe_settle: delay("timing.failsafe_settle", t.failsafe_settle)?,
            failsafe: span("timing.failsafe", t.failsafe)?,
            rise: span("timing.rise", t.rise)?,
            finale_delay: delay("timing.finale_delay", t.finale_delay)?,
            halo_fade: span("timing.halo_fade", t.halo_fade)?,
            spikes: span("timing.spikes", t.spikes)?,
            decal: span("timing.decal", t.decal)?,
            menu_hide: span("timing.menu_hide", t.menu_hide)?,
            menu_fade: span("timing.menu_fade", t.menu_fade)?,
            bounce: span("timing.bounce", t.bounce)?,
            tree: TreePacing {
                start_delay: delay("timing.tree.start_delay", t.tree.start_delay)?,
                delay_between: delay("timing.tree.delay_between", t.tree.delay_between)?,
                rotation: span("timing.tree.rotation", t.tree.rotation)?,
            },
            ornaments: reveal("timing.ornaments", &t.ornaments)?,
            landscape: reveal("timing.landscape", &t.landscape)?,
            caption_fade_in: span("caption.fade_in", c.fade_in)?,
            caption_fade_out: span("caption.fade_out", c.fade_out)?,
            caption_hold: span("caption.hold", c.hold)?,
            remaining_hold: span("caption.remaining_hold", c.remaining_hold)?,
            hint_hold: span("caption.hint_hold", c.hint_hold)?,
            finale_hold: span("caption.finale_hold", c.finale_hold)?,
        })
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join("starfall").join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::parse(&contents)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Writes this config to `path` unless a file is already there, so a
    /// first run leaves an editable copy behind. Returns whether it wrote.
    pub fn save_if_missing(&self, path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        self.save_to(path)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let pacing = Config::default().validate().unwrap();
        assert_eq!(pacing.failsafe.secs(), 120.0);
        assert_eq!(pacing.collect_settle, 0.05);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::parse(
            r#"
            fps_cap = 30

            [timing]
            failsafe = 45.0

            [scene]
            items = [{ entity = "only", direction = { x = 1.0, y = 0.0, z = 0.0 } }]
            "#,
        )
        .unwrap();
        assert_eq!(config.fps_cap, 30);
        assert_eq!(config.timing.failsafe, 45.0);
        assert_eq!(config.timing.descent, 5.0);
        assert_eq!(config.scene.items.len(), 1);
        assert_eq!(config.scene.star, Some(EntityId::from("star")));
        assert_eq!(config.messages.remaining(2), "2 fragments remaining ...");
    }

    #[test]
    fn zero_duration_is_rejected() {
        let mut config = Config::default();
        config.timing.explosion = 0.0;
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::Duration {
                field: "timing.explosion",
                source: AnimError::NonPositiveDuration(0.0)
            }
        );
    }

    #[test]
    fn inverted_reveal_range_is_rejected() {
        let mut config = Config::default();
        config.timing.landscape.delay_min = 3.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvertedRange { field: "timing.landscape", .. })
        ));
    }

    #[test]
    fn empty_item_list_is_rejected() {
        let mut config = Config::default();
        config.scene.items.clear();
        assert_eq!(config.validate().unwrap_err(), ConfigError::NoItems);
    }

    #[test]
    fn duplicate_items_are_rejected() {
        let mut config = Config::default();
        let first = config.scene.items[0].clone();
        config.scene.items.push(first);
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::DuplicateItem { id: EntityId::from("shard_a") }
        );
    }

    #[test]
    fn partial_reveal_table_fills_missing_fields() {
        let config = Config::parse(
            r#"
            [timing.ornaments]
            delay_max = 1.5

            [timing.tree]
            delay_between = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(config.timing.ornaments.delay_max, 1.5);
        assert_eq!(config.timing.ornaments.duration, 0.5);
        assert_eq!(config.timing.tree.delay_between, 0.25);
        assert_eq!(config.timing.tree.rotation, 3.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn first_run_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("starfall").join("config.toml");
        assert_eq!(Config::load_from(&path).unwrap().fps_cap, 60);

        let mut config = Config::default();
        config.fps_cap = 24;
        assert!(config.save_if_missing(&path).unwrap());
        assert!(!Config::default().save_if_missing(&path).unwrap());

        let back = Config::load_from(&path).unwrap();
        assert_eq!(back.fps_cap, 24);
        assert_eq!(back.scene.tree_children.len(), 4);
    }

    #[test]
    fn round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let back = Config::parse(&text).unwrap();
        assert_eq!(back.scene.items.len(), 3);
        assert_eq!(back.messages.finale, Config::default().messages.finale);
    }
}
