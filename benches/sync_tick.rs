use std::sync::Arc;
use std::time::Instant;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use window_overlay::overlay::process::ProcessLauncher;
use window_overlay::overlay::simulated::{ProgramBehavior, WindowSpec};
use window_overlay::overlay::sync::{MotionSmoother, SyncTarget};
use window_overlay::overlay::{
    ContainerRef, CoordinateSystem, FixedContainer, HostGeometry, LaunchSpec, LocalBounds,
    OriginConvention, PositionSyncEngine, ScreenRect, SessionId, SimulatedDesktop, SyncConfig,
};

fn bench_to_screen(c: &mut Criterion) {
    let host = HostGeometry {
        content_origin: (1280.0, 900.0),
        scale_factor: 1.25,
        origin: OriginConvention::BottomLeft,
        desktop_height: 1440.0,
        monitor: ScreenRect::new(0, 0, 2560, 1440),
        minimized: false,
    };
    let local = LocalBounds::new(12.5, 48.0, 801.3, 600.7);
    c.bench_function("to_screen", |b| {
        b.iter(|| CoordinateSystem::to_screen(black_box(local), black_box(&host)))
    });
}

fn bench_smoother(c: &mut Criterion) {
    let config = SyncConfig::default();
    let targets = [
        ScreenRect::new(100, 100, 800, 600),
        ScreenRect::new(700, 420, 800, 600),
    ];
    c.bench_function("smoother_step", |b| {
        let mut smoother = MotionSmoother::new(&config);
        let mut i = 0usize;
        b.iter(|| {
            i = i.wrapping_add(1);
            smoother.step(black_box(targets[(i / 8) % 2]))
        })
    });
}

fn bench_steady_tick(c: &mut Criterion) {
    let desktop = SimulatedDesktop::new();
    desktop.register_program("viewer", ProgramBehavior::new());
    let process = desktop
        .launch(&LaunchSpec::new("viewer"))
        .expect("simulated launch");
    let window = desktop.create_window(WindowSpec::new(process.pid(), "Doc", "Frame"));
    let container: Arc<dyn ContainerRef> =
        Arc::new(FixedContainer::on_desktop(ScreenRect::new(100, 100, 800, 600)));
    let mut engine = PositionSyncEngine::new(
        Arc::new(desktop.clone()),
        SyncTarget {
            session: SessionId(1),
            window,
            owner: process.pid(),
            probe: process.probe(),
            container: Arc::downgrade(&container),
        },
        &SyncConfig::default(),
        None,
    );
    engine.tick(Instant::now());
    c.bench_function("steady_state_tick", |b| b.iter(|| engine.tick(Instant::now())));
}

criterion_group!(benches, bench_to_screen, bench_smoother, bench_steady_tick);
criterion_main!(benches);
