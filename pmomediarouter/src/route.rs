//! Media routes.

use std::fmt;

use crate::backend::{RouteRecord, SinkRecord};
use crate::dispatch::ContextHandle;
use crate::model::{ProviderKind, SinkIconType};
use crate::sink::MediaSink;
use crate::source::MediaSource;

/// An established binding between a source and a sink.
///
/// A route only holds its identifiers and a handle on its context. Actions
/// are posted to the router thread and silently dropped once the context
/// is gone.
#[derive(Clone)]
pub struct MediaRoute {
    record: RouteRecord,
    context: ContextHandle,
}

impl MediaRoute {
    pub(crate) fn new(record: RouteRecord, context: ContextHandle) -> Self {
        Self { record, context }
    }

    pub fn id(&self) -> &str {
        &self.record.route_id
    }

    pub fn source(&self) -> MediaSource {
        MediaSource::from_id(&self.record.source_id)
    }

    /// The sink of the route, rebuilt from its id and name.
    pub fn sink(&self) -> MediaSink {
        let provider = if self.source().is_dial_source() {
            ProviderKind::Dial
        } else {
            ProviderKind::Cast
        };
        let record = SinkRecord::new(&self.record.sink_id, &self.record.sink_name, provider)
            .with_icon(SinkIconType::Generic);
        MediaSink::with_context(record, self.context.clone())
    }

    pub fn send_route_message(&self, message: impl Into<String>) {
        let route_id = self.record.route_id.clone();
        let message = message.into();
        self.context.post(move |state| {
            if let Some(state) = state {
                state
                    .media_router_manager()
                    .send_route_message(&route_id, message);
            }
        });
    }

    pub fn terminate(&self) {
        let route_id = self.record.route_id.clone();
        self.context.post(move |state| {
            if let Some(state) = state {
                state.media_router_manager().terminate_route(&route_id);
            }
        });
    }
}

impl PartialEq for MediaRoute {
    fn eq(&self, other: &Self) -> bool {
        self.record == other.record && self.context.same_context(&other.context)
    }
}

impl fmt::Debug for MediaRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaRoute")
            .field("id", &self.record.route_id)
            .field("source_id", &self.record.source_id)
            .field("sink_id", &self.record.sink_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(source_id: &str) -> MediaRoute {
        let (handle, _receiver) = ContextHandle::channel();
        MediaRoute::new(
            RouteRecord {
                route_id: "route-1".to_string(),
                source_id: source_id.to_string(),
                sink_id: "sink-1".to_string(),
                sink_name: "Cuisine".to_string(),
            },
            handle,
        )
    }

    #[test]
    fn test_sink_kind_follows_source() {
        let dial = route("dial:YouTube");
        assert!(dial.source().is_dial_source());
        assert!(dial.sink().is_dial_sink());

        let cast = route("cast:233637DE");
        let sink = cast.sink();
        assert!(sink.is_cast_sink());
        assert_eq!(sink.id(), "sink-1");
        assert_eq!(sink.name(), "Cuisine");
        assert_eq!(sink.icon_type(), SinkIconType::Generic);
        assert!(sink.is_compatible_with(Some(&cast.source())));
    }

    #[test]
    fn test_actions_on_gone_context_are_silent() {
        let r = route("cast:233637DE");
        r.context.mark_gone();
        // Le récepteur est déjà détruit: les tâches s'exécutent avec None.
        r.send_route_message("hello");
        r.terminate();
        assert_eq!(r.id(), "route-1");
    }
}
