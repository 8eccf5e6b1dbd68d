use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Sender, unbounded};
use pmomediarouter::{
    ConnectionState, LoopbackBackend, LoopbackOutcome, MediaObserver, MediaRoute,
    MediaRouterConfig, MediaRouterContext, MediaSink, ProviderKind, RouteMessage, SinkIconType,
    SinkRecord,
};
use tracing_subscriber::EnvFilter;

/// Affiche tout ce que le routeur nous remonte
struct PrintObserver {
    sinks: Sender<Vec<MediaSink>>,
}

impl MediaObserver for PrintObserver {
    fn on_sinks(&self, sinks: Vec<MediaSink>) {
        println!("Sinks detected : {}", sinks.len());
        for s in &sinks {
            println!("- [{}] {} ({:?}) cast={}", s.id(), s.name(), s.icon_type(), s.is_cast_sink());
        }
        let _ = self.sinks.send(sinks);
    }

    fn on_routes(&self, routes: Vec<MediaRoute>) {
        println!("Routes : {}", routes.len());
        for r in &routes {
            println!("- [{}] {} -> {}", r.id(), r.source().id(), r.sink().name());
        }
    }

    fn on_route_state_changed(&self, route: MediaRoute, state: ConnectionState) {
        println!("Route {} is now {}", route.id(), state);
    }

    fn on_route_message_received(&self, route: MediaRoute, message: &[u8]) {
        println!("Route {} received: {}", route.id(), String::from_utf8_lossy(message));
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let backend = LoopbackBackend::new();
    let config = MediaRouterConfig::load("")?;
    let context = MediaRouterContext::new(Arc::new(backend.clone()), config)?;
    let router = context.media_router(Some(Box::new(|| tracing::info!("Media router ready"))))?;

    let (tx, rx) = unbounded();
    let _registration = router.add_observer(Arc::new(PrintObserver { sinks: tx }));

    backend.push_sinks(vec![
        SinkRecord::new("living-room", "Living Room TV", ProviderKind::Cast)
            .with_icon(SinkIconType::Cast),
        SinkRecord::new("kitchen", "Kitchen speaker", ProviderKind::Cast)
            .with_icon(SinkIconType::CastAudio),
        SinkRecord::new("bedroom", "Bedroom TV", ProviderKind::Dial),
    ]);
    let sinks = rx.recv_timeout(Duration::from_secs(2))?;

    let Some(source) = router.get_source("cast:233637DE?clientId=pmomusic") else {
        anyhow::bail!("invalid source URN");
    };
    let Some(sink) = sinks.into_iter().find(|s| s.is_compatible_with(Some(&source))) else {
        anyhow::bail!("no compatible sink");
    };

    backend.plan(LoopbackOutcome::Connected);
    let (route_tx, route_rx) = unbounded();
    router.create_route(Some(&source), Some(&sink), move |code, error, route| {
        println!("CreateRoute: {:?} {}", code, error);
        let _ = route_tx.send(route);
    });

    let Some(route) = route_rx.recv_timeout(Duration::from_secs(2))? else {
        anyhow::bail!("route creation failed");
    };

    backend.emit_state(route.id(), "connected");
    route.send_route_message(r#"{"type":"LAUNCH"}"#);
    backend.emit_messages(route.id(), vec![RouteMessage::text(r#"{"type":"RECEIVER_STATUS"}"#)]);

    std::thread::sleep(Duration::from_millis(200));
    println!("Sent through the provider: {:?}", backend.generic_sends());

    route.terminate();
    std::thread::sleep(Duration::from_millis(200));

    context.shutdown();
    Ok(())
}
