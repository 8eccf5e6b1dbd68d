//! Media sinks.

use std::fmt;

use crate::backend::SinkRecord;
use crate::dispatch::ContextHandle;
use crate::model::{ProviderKind, SinkDeviceInfo, SinkIconType};
use crate::source::MediaSource;

/// A receiving device reported by sink discovery.
///
/// Sinks are immutable snapshots: a change on the device shows up as a new
/// sink list, never as a mutation of an existing value.
#[derive(Clone)]
pub struct MediaSink {
    record: SinkRecord,
    context: Option<ContextHandle>,
}

impl MediaSink {
    /// A sink not attached to any context. `device_info` always reports
    /// default values for it.
    pub fn new(record: SinkRecord) -> Self {
        Self {
            record,
            context: None,
        }
    }

    pub(crate) fn with_context(record: SinkRecord, context: ContextHandle) -> Self {
        Self {
            record,
            context: Some(context),
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn icon_type(&self) -> SinkIconType {
        self.record.icon_type
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.record.provider
    }

    pub fn is_cast_sink(&self) -> bool {
        self.record.provider == ProviderKind::Cast
    }

    pub fn is_dial_sink(&self) -> bool {
        self.record.provider == ProviderKind::Dial
    }

    /// A Cast sink accepts Cast sources only, a DIAL sink DIAL sources only.
    pub fn is_compatible_with(&self, source: Option<&MediaSource>) -> bool {
        match (source, self.record.provider) {
            (Some(source), ProviderKind::Cast) => source.is_cast_source(),
            (Some(source), ProviderKind::Dial) => source.is_dial_source(),
            (None, _) => false,
        }
    }

    /// Asks the discovery engine for the network details of this sink.
    ///
    /// `callback` runs exactly once, on the router thread when the context is
    /// alive. An unknown sink or a gone context yields default values.
    pub fn device_info<F>(&self, callback: F)
    where
        F: FnOnce(SinkDeviceInfo) + Send + 'static,
    {
        let Some(context) = &self.context else {
            callback(SinkDeviceInfo::default());
            return;
        };

        let sink_id = self.record.id.clone();
        context.post(move |state| {
            let info = state
                .and_then(|s| s.sink_discovery().sink_device_info(&sink_id))
                .unwrap_or_default();
            callback(info);
        });
    }
}

impl PartialEq for MediaSink {
    fn eq(&self, other: &Self) -> bool {
        self.record == other.record
    }
}

impl Eq for MediaSink {}

impl fmt::Debug for MediaSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSink")
            .field("id", &self.record.id)
            .field("name", &self.record.name)
            .field("icon_type", &self.record.icon_type)
            .field("provider", &self.record.provider)
            .finish()
    }
}
