//! End-to-end composition scenarios: two-phase readiness, sibling lookup,
//! event wiring between siblings and deferred reactions to terminal events.

use std::cell::RefCell;
use std::rc::Rc;

use tessera_core::prelude::*;

// -- Components --------------------------------------------------------------

struct Health {
    gauge: Gauge,
}

impl Component for Health {}

/// Moves every tick until its sibling `Health` runs out.
struct Mover {
    steps: u32,
    health_subscription: Option<SubscriptionToken>,
}

impl Component for Mover {
    fn on_entity_ready(&mut self, ctx: &mut EntityContext<'_>) {
        let me = ctx.component_id();
        let commands = ctx.commands();
        let token = ctx.with_sibling::<Health, _>(|health| {
            health.gauge.depleted.subscribe(move |_| commands.disable(me))
        });
        match token {
            Ok(token) => self.health_subscription = Some(token),
            Err(err) => {
                tracing::warn!(entity = %ctx.entity_name(), error = %err, "mover needs health");
                ctx.disable();
            }
        }
    }

    fn on_tick(&mut self, _ctx: &mut EntityContext<'_>) {
        self.steps += 1;
    }
}

fn mover() -> Box<dyn Component> {
    Box::new(Mover {
        steps: 0,
        health_subscription: None,
    })
}

/// Records the order in which hooks fire across siblings.
struct Witness {
    tag: String,
    journal: Rc<RefCell<Vec<String>>>,
}

impl Component for Witness {
    fn on_local_ready(&mut self, _ctx: &mut LocalContext<'_>) {
        self.journal.borrow_mut().push(format!("local:{}", self.tag));
    }

    fn on_entity_ready(&mut self, _ctx: &mut EntityContext<'_>) {
        self.journal.borrow_mut().push(format!("entity:{}", self.tag));
    }
}

// -- Scenarios ---------------------------------------------------------------

#[test]
fn missing_sibling_disables_instead_of_failing() {
    let services = ServiceRegistry::new();
    let mut tree = CompositionTree::new();
    let ghost = tree.spawn("ghost", "enemy").unwrap();
    let m = tree.attach_new(ghost, mover()).unwrap();

    tree.ready(&services, ghost).unwrap();

    assert_eq!(tree.component_phase(m), Some(ComponentPhase::Disabled));
    assert_eq!(tree.tick(&services, 0.1), 0);
    assert_eq!(tree.get::<Mover>(m).unwrap().steps, 0);
}

#[test]
fn depletion_event_disables_sibling_through_commands() {
    let services = ServiceRegistry::new();
    let mut tree = CompositionTree::new();
    let hero = tree.spawn("hero", "player").unwrap();
    let h = tree
        .attach_new(
            hero,
            Box::new(Health {
                gauge: Gauge::full(10.0),
            }),
        )
        .unwrap();
    let m = tree.attach_new(hero, mover()).unwrap();
    tree.ready(&services, hero).unwrap();
    assert!(tree.get::<Mover>(m).unwrap().health_subscription.is_some());

    tree.tick(&services, 0.1);
    tree.get_mut::<Health>(h).unwrap().gauge.apply(-10.0);
    assert_eq!(tree.apply_commands(&services), 1);

    assert_eq!(tree.component_phase(m), Some(ComponentPhase::Disabled));
    tree.tick(&services, 0.1);
    tree.tick(&services, 0.1);
    assert_eq!(tree.get::<Mover>(m).unwrap().steps, 1);

    // Further damage while depleted queues nothing new.
    tree.get_mut::<Health>(h).unwrap().gauge.apply(-5.0);
    assert!(tree.commands().is_empty());
}

#[test]
fn entity_ready_follows_all_local_ready_across_attach_order() {
    let services = ServiceRegistry::new();
    let journal = Rc::new(RefCell::new(Vec::new()));
    let mut tree = CompositionTree::new();
    let e = tree.spawn("crowd", "npc").unwrap();
    for tag in ["x", "y", "z"] {
        tree.attach_new(
            e,
            Box::new(Witness {
                tag: tag.to_owned(),
                journal: journal.clone(),
            }),
        )
        .unwrap();
    }

    tree.ready(&services, e).unwrap();
    tree.ready(&services, e).unwrap();

    assert_eq!(
        *journal.borrow(),
        vec!["local:x", "local:y", "local:z", "entity:x", "entity:y", "entity:z"],
        "each hook exactly once, phases not interleaved"
    );
}

#[test]
fn destroy_command_from_handler_tears_entity_down() {
    let services = ServiceRegistry::new();
    let mut tree = CompositionTree::new();
    let barrel = tree.spawn("barrel", "prop").unwrap();
    let h = tree
        .attach_new(
            barrel,
            Box::new(Health {
                gauge: Gauge::full(1.0),
            }),
        )
        .unwrap();
    tree.ready(&services, barrel).unwrap();

    let commands = tree.commands();
    tree.get::<Health>(h)
        .unwrap()
        .gauge
        .depleted
        .subscribe(move |_| commands.destroy(barrel));

    tree.get_mut::<Health>(h).unwrap().gauge.set(0.0);
    tree.tick(&services, 0.1);

    assert_eq!(tree.entity_count(), 0);
    assert!(tree.find_entity("barrel").is_none());
}

#[test]
fn ready_all_walks_constructing_entities_in_spawn_order() {
    let services = ServiceRegistry::new();
    let journal = Rc::new(RefCell::new(Vec::new()));
    let mut tree = CompositionTree::new();
    for name in ["first", "second"] {
        let e = tree.spawn(name, "npc").unwrap();
        tree.attach_new(
            e,
            Box::new(Witness {
                tag: name.to_owned(),
                journal: journal.clone(),
            }),
        )
        .unwrap();
    }

    assert_eq!(tree.ready_all(&services), 2);
    assert_eq!(tree.ready_all(&services), 0);
    assert_eq!(
        *journal.borrow(),
        vec!["local:first", "entity:first", "local:second", "entity:second"]
    );
}

#[test]
fn services_are_visible_from_hooks() {
    struct Difficulty(f64);

    struct Scaler {
        factor: f64,
    }

    impl Component for Scaler {
        fn on_entity_ready(&mut self, ctx: &mut EntityContext<'_>) {
            self.factor = ctx
                .services()
                .resolve::<Difficulty>()
                .map(|d| d.0)
                .unwrap_or(1.0);
        }
    }

    let mut services = ServiceRegistry::new();
    let mut tree = CompositionTree::new();
    let e = tree.spawn("boss", "enemy").unwrap();
    let without = tree.attach_new(e, Box::new(Scaler { factor: 0.0 })).unwrap();
    tree.ready(&services, e).unwrap();
    assert_eq!(tree.get::<Scaler>(without).unwrap().factor, 1.0);

    services.provide(Difficulty(2.5));
    let with = tree.attach_new(e, Box::new(Scaler { factor: 0.0 })).unwrap();
    tree.ready(&services, e).unwrap();
    assert_eq!(tree.get::<Scaler>(with).unwrap().factor, 2.5);
}
