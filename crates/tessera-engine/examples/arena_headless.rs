//! Headless arena demo.
//!
//! Writes a tiny game directory (engine config, base records, one balance
//! override), boots the [`App`] from it and runs frames until the hero's
//! health runs out and the game moves to its game-over state.
//!
//! Run with: `cargo run --example arena_headless`
//! Pass a path to an `engine.toml` to use your own data instead.

use std::cell::RefCell;
use std::path::PathBuf;

use anyhow::Context;
use tessera_engine::logging;
use tessera_engine::prelude::*;

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

struct Health {
    gauge: Gauge,
}

impl Component for Health {}

struct Bleed {
    per_second: f64,
}

impl Component for Bleed {
    fn required_owner_kind(&self) -> Option<&str> {
        Some("player")
    }

    fn on_entity_ready(&mut self, ctx: &mut EntityContext<'_>) {
        let Ok(id) = ctx.find_sibling::<Health>() else {
            tracing::warn!(entity = %ctx.entity_name(), "nothing to bleed, disabling");
            ctx.disable();
            return;
        };
        // Stop bleeding once dead; queued because it fires mid-pass.
        let commands = ctx.commands();
        let me = ctx.component_id();
        if let Some(health) = ctx.sibling::<Health>(id) {
            health.gauge.depleted.subscribe(move |_| commands.disable(me));
        }
    }

    fn on_fixed_tick(&mut self, ctx: &mut EntityContext<'_>) {
        let amount = self.per_second * ctx.dt();
        let _ = ctx.with_sibling::<Health, _>(|h| h.gauge.apply(-amount));
    }
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

struct Arena {
    tree: CompositionTree,
}

impl GameState for Arena {
    fn name(&self) -> &str {
        "arena"
    }

    fn enter(&mut self, _ctx: &mut StateContext<'_>) {
        tracing::info!(entities = self.tree.entity_count(), "arena ready");
    }

    fn on_fixed_tick(&mut self, ctx: &mut StateContext<'_>, dt: f64) {
        self.tree.fixed_tick(ctx.services(), dt);
    }

    fn exit(&mut self, ctx: &mut StateContext<'_>) {
        self.tree.clear(ctx.services());
    }
}

struct GameOver;

impl GameState for GameOver {
    fn name(&self) -> &str {
        "game_over"
    }
}

fn build_arena(ctx: &mut StateContext<'_>) -> Result<Box<dyn GameState>, StateError> {
    let store = ctx.services().get::<RefCell<ConfigurationStore>>("config")?;
    let (hp, bleed) = {
        let store = store.borrow();
        let hero = store
            .require("hero")
            .map_err(|e| StateError::unconstructible(e.to_string()))?;
        (
            hero.get_f64("hp").unwrap_or(10.0),
            hero.get_f64("bleed_per_second").unwrap_or(1.0),
        )
    };

    let mut tree = CompositionTree::new();
    let hero = tree.spawn("hero", "player")?;
    let health = tree.attach_new(hero, Box::new(Health { gauge: Gauge::full(hp) }))?;
    tree.attach_new(hero, Box::new(Bleed { per_second: bleed }))?;
    tree.ready(ctx.services(), hero)?;

    let handle = ctx.handle().clone();
    if let Some(h) = tree.get::<Health>(health) {
        h.gauge.depleted.subscribe(move |_| {
            handle.request(|_| Ok(Box::new(GameOver) as Box<dyn GameState>));
        });
        h.gauge.changed.subscribe(|change| {
            tracing::debug!(from = change.previous, to = change.current, "hero health");
        });
    }
    Ok(Box::new(Arena { tree }))
}

// ---------------------------------------------------------------------------
// Demo data
// ---------------------------------------------------------------------------

fn write_demo(dir: &std::path::Path) -> anyhow::Result<PathBuf> {
    let write = |rel: &str, text: &str| -> anyhow::Result<()> {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))
    };
    write(
        "engine.toml",
        "tick_rate = 20.0\nlog_filter = \"info\"\n\n[records]\nbase = \"data/records.toml\"\n",
    )?;
    write(
        "data/records.toml",
        "[[records]]\nid = \"hero\"\nhp = 10\nbleed_per_second = 2.0\n",
    )?;
    write(
        "mods/10_balance/data/records.json",
        r#"[{"id": "hero", "hp": 4, "bleed_per_second": 4.0}]"#,
    )?;
    Ok(dir.join("engine.toml"))
}

fn main() -> anyhow::Result<()> {
    let scratch = tempfile::tempdir()?;
    let config_path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => write_demo(scratch.path())?,
    };

    let config = EngineConfig::load(&config_path)?;
    logging::init(&config.log_filter);

    let mut app = App::bootstrap(config, build_arena).context("bootstrapping arena")?;

    let frame_dt = 1.0 / 60.0;
    let mut frames = 0u32;
    while app.machine().active_name() == Some("arena") && frames < 10_000 {
        app.advance(frame_dt)?;
        frames += 1;
    }

    let ticks = app.tick_loop();
    println!(
        "state={} frames={} fixed_steps={} sim_time={:.2}s",
        app.machine().active_name().unwrap_or("<none>"),
        ticks.frame_count(),
        ticks.fixed_step_count(),
        ticks.sim_time(),
    );
    app.shutdown();
    Ok(())
}
