use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::cell::Cell;
use std::rc::Rc;

use tessera_core::prelude::*;

struct Spinner {
    turns: u64,
}

impl Component for Spinner {
    fn on_tick(&mut self, _ctx: &mut EntityContext<'_>) {
        self.turns += 1;
    }
}

fn bench_emit(c: &mut Criterion) {
    let channel = EventChannel::<u64>::named("bench");
    let total = Rc::new(Cell::new(0u64));
    for _ in 0..32 {
        let sink = total.clone();
        channel.subscribe(move |v| sink.set(sink.get().wrapping_add(*v)));
    }
    c.bench_function("emit_32_subscribers", |b| {
        b.iter(|| channel.emit(black_box(&3)))
    });
}

fn bench_tree_tick(c: &mut Criterion) {
    let services = ServiceRegistry::new();
    let mut tree = CompositionTree::new();
    for i in 0..1_000 {
        let e = tree.spawn(&format!("spinner-{i}"), "prop").unwrap();
        tree.attach_new(e, Box::new(Spinner { turns: 0 })).unwrap();
        tree.attach_new(e, Box::new(Spinner { turns: 0 })).unwrap();
    }
    tree.ready_all(&services);
    c.bench_function("tick_1000_entities", |b| {
        b.iter(|| tree.tick(&services, black_box(1.0 / 60.0)))
    });
}

criterion_group!(benches, bench_emit, bench_tree_tick);
criterion_main!(benches);
