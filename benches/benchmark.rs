use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use drydock::{
    event::ChannelSurface,
    provider::{ConnectionStatus, ContainerConnection, ProviderDescriptor},
    CancellationTokenRegistry, Channel, EventBus, ProviderRegistry,
};
use serde_json::json;

fn bench_send_with_handlers(c: &mut Criterion) {
    let bus = EventBus::new(1024);
    let handles: Vec<_> = (0..8)
        .map(|_| bus.receive("bench", |payload| {
            black_box(payload);
        }))
        .collect();
    let (surface, mut received) = ChannelSurface::new();
    bus.attach_surface(Arc::new(surface));
    bus.mark_backend_ready();
    bus.mark_surface_ready();

    c.bench_function("send to 8 handlers and surface", |b| {
        b.iter(|| {
            bus.send("bench", json!({"status": "started"}));
            while received.try_recv().is_ok() {}
        })
    });
    drop(handles);
}

fn bench_connection_status_publish(c: &mut Criterion) {
    let registry = ProviderRegistry::new(
        Arc::new(EventBus::new(1024)),
        Arc::new(CancellationTokenRegistry::new()),
    );
    let (id, _handle) = registry
        .register(ProviderDescriptor::new("podman", "Podman"))
        .expect("register provider");
    let connection = ContainerConnection::new("machine", "unix:///machine.sock");
    let _connection = registry
        .register_container_connection(id, connection)
        .expect("register connection");
    let reference = drydock::provider::ConnectionRef::container("machine", "unix:///machine.sock");
    let _tray = drydock::tray::TrayMenu::attach(&registry);
    let _sink = registry
        .event_bus()
        .receive(Channel::ContainerConnectionStatusUpdated.as_ref(), |_| {});

    let mut started = false;
    c.bench_function("connection status update with tray", |b| {
        b.iter(|| {
            started = !started;
            let status = if started {
                ConnectionStatus::Started
            } else {
                ConnectionStatus::Stopped
            };
            registry
                .update_connection_status(id, &reference, status)
                .expect("update status");
        })
    });
}

criterion_group!(benches, bench_send_with_handlers, bench_connection_status_publish);
criterion_main!(benches);
