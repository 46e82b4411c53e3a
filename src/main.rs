use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use log::{info, warn};
use starfall::app::{App, UiEvent};
use starfall::config::Config;
use starfall::gfx::math::{Transform, Vec3};
use starfall::stage::{EntityId, MemoryStage};
use std::io::BufRead;
use std::time::{Duration, Instant};

const STAR_ORIGIN: Vec3 = Vec3::new(0.0, 1.2, -1.0);

/// Stand-in scene holding every entity and material the config names.
fn demo_stage(config: &Config) -> MemoryStage {
    let scene = &config.scene;
    let mut stage = MemoryStage::new();

    let singles = [
        &scene.start_menu,
        &scene.start_button,
        &scene.start_star,
        &scene.star_root,
        &scene.decal,
        &scene.wind,
        &scene.tree,
        &scene.snow,
        &scene.caption.panel,
        &scene.caption.hint,
    ];
    let lists = [
        &scene.star_animations,
        &scene.spikes,
        &scene.tree_children,
        &scene.finale,
        &scene.ornaments,
        &scene.landscape,
    ];
    for id in singles.into_iter().flatten().chain(lists.into_iter().flatten()) {
        stage = stage.with_entity(id.clone(), Transform::default());
    }
    if let Some(star) = &scene.star {
        stage = stage.with_entity(star.clone(), Transform::at(STAR_ORIGIN));
    }
    if let Some(camera) = &scene.camera {
        stage = stage.with_entity(camera.clone(), Transform::at(Vec3::new(0.0, 1.6, 0.0)));
    }
    for item in &scene.items {
        let origin = STAR_ORIGIN - Vec3::new(0.0, config.motion.descent_distance, 0.0);
        stage = stage.with_entity_under(item.entity.clone(), origin, Transform::at(item.direction * 0.05));
    }

    let materials = [&scene.halo, &scene.border, &scene.caption.text, &scene.caption.backdrop];
    for id in materials.into_iter().flatten().chain(scene.start_menu_materials.iter()) {
        stage = stage.with_material(id.clone(), 1.0);
    }
    stage
}

/// Reads commands from stdin: an empty line or `start` presses start, `q`
/// quits, anything else selects the named item.
fn spawn_input(tx: Sender<UiEvent>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let event = match line.trim() {
                "" | "start" => UiEvent::StartPressed,
                "q" | "quit" => UiEvent::Quit,
                name => UiEvent::Select(EntityId::from(name)),
            };
            if tx.send(event).is_err() {
                break;
            }
        }
    });
}

fn drain(rx: &Receiver<UiEvent>, app: &mut App<MemoryStage>) {
    while let Ok(event) = rx.try_recv() {
        app.handle_event(event);
    }
}

fn main() -> Result<()> {
    env_logger::init();
    println!("Starting starfall...");

    let config = Config::load().unwrap_or_else(|e| {
        warn!("could not load config, using defaults: {e:#}");
        Config::default()
    });
    match Config::path() {
        Ok(path) => match config.save_if_missing(&path) {
            Ok(true) => info!("wrote default config to {}", path.display()),
            Ok(false) => {}
            Err(e) => warn!("could not write {}: {e:#}", path.display()),
        },
        Err(e) => warn!("{e:#}"),
    }
    let frame = Duration::from_millis(1000 / u64::from(config.fps_cap.max(1)));
    let items: Vec<String> = config.scene.items.iter().map(|i| i.entity.to_string()).collect();

    let stage = demo_stage(&config);
    let mut app = App::new(config, stage, Box::new(rand::thread_rng()))?;

    let (tx, rx) = crossbeam_channel::unbounded();
    spawn_input(tx);

    println!("Press enter to start. Type an item name to collect it: {}", items.join(", "));
    app.start();

    let mut last_frame = Instant::now();
    while app.running {
        drain(&rx, &mut app);

        let now = Instant::now();
        let dt = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;
        app.update(dt);

        std::thread::sleep(frame);
    }

    info!("finished after {:.1}s", app.time);
    for line in app.story.stage().captions() {
        println!("  {}", line.replace('\n', " "));
    }
    Ok(())
}
