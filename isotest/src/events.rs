//! Diagnostic tracing for the harness itself.

use std::{collections::HashSet, fmt::Display};

use tracing_subscriber::{
    Layer, Registry, filter::Targets, layer::SubscriberExt, reload::Handle,
    util::SubscriberInitExt,
};

use crate::error::Error;
use crate::trace_categories;

/// Type of event to trace.
#[derive(Clone, Debug, Eq, Hash, PartialEq, clap::ValueEnum)]
pub enum TraceEvent {
    /// Traces pipe setup, forking and output collection.
    #[clap(name = "capture")]
    Capture,
    /// Traces comparison of expected and observed effects.
    #[clap(name = "compare")]
    Compare,
    /// Traces test registration and record preparation.
    #[clap(name = "registry")]
    Registry,
    /// Traces the run loop and its hooks.
    #[clap(name = "runner")]
    Runner,
}

impl TraceEvent {
    const fn target(&self) -> &'static str {
        match self {
            Self::Capture => trace_categories::CAPTURE,
            Self::Compare => trace_categories::COMPARE,
            Self::Registry => trace_categories::REGISTRY,
            Self::Runner => trace_categories::RUNNER,
        }
    }
}

impl Display for TraceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.target())
    }
}

/// Installed tracing configuration.
#[derive(Default)]
pub struct TraceEventConfig {
    enabled_trace_events: HashSet<TraceEvent>,
    handle: Option<Handle<Targets, Registry>>,
}

impl TraceEventConfig {
    /// Installs a global subscriber writing to stderr, with the given events
    /// raised to debug level. Only the first call in a process takes effect.
    pub fn init(enabled_log_events: &[TraceEvent]) -> Self {
        let enabled_trace_events: HashSet<TraceEvent> =
            enabled_log_events.iter().cloned().collect();

        let mut config = Self {
            enabled_trace_events,
            ..Default::default()
        };

        let filter = config.compose_filter();

        // Make the filter reloadable so that events can be toggled at runtime.
        let (reload_filter, handle) = tracing_subscriber::reload::Layer::new(filter);

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .without_time()
            .with_target(false)
            .with_filter(reload_filter);

        if tracing_subscriber::registry()
            .with(layer)
            .try_init()
            .is_ok()
        {
            config.handle = Some(handle);
        } else {
            tracing::debug!(target: trace_categories::RUNNER, "tracing already initialized");
        }

        config
    }

    fn compose_filter(&self) -> Targets {
        let filter = Targets::new().with_default(tracing_subscriber::filter::LevelFilter::INFO);

        filter.with_targets(
            self.enabled_trace_events
                .iter()
                .map(|event| (event.target(), tracing::Level::DEBUG)),
        )
    }

    /// Returns the currently enabled events.
    pub const fn get_enabled_events(&self) -> &HashSet<TraceEvent> {
        &self.enabled_trace_events
    }

    /// Enables an event.
    pub fn enable(&mut self, event: &TraceEvent) -> Result<(), Error> {
        if !self.enabled_trace_events.insert(event.to_owned()) {
            return Ok(());
        }

        self.reload_filter()
    }

    /// Disables an event.
    pub fn disable(&mut self, event: &TraceEvent) -> Result<(), Error> {
        if !self.enabled_trace_events.remove(event) {
            return Ok(());
        }

        self.reload_filter()
    }

    fn reload_filter(&self) -> Result<(), Error> {
        let Some(handle) = &self.handle else {
            return Err(Error::Tracing("tracing not initialized"));
        };

        handle
            .reload(self.compose_filter())
            .map_err(|_| Error::Tracing("failed to update tracing filter"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn enabled_events_raise_their_target_to_debug() {
        let config = TraceEventConfig {
            enabled_trace_events: [TraceEvent::Capture].into_iter().collect(),
            handle: None,
        };
        let filter = config.compose_filter();

        assert!(filter.would_enable(trace_categories::CAPTURE, &Level::DEBUG));
        assert!(!filter.would_enable(trace_categories::COMPARE, &Level::DEBUG));
        assert!(filter.would_enable(trace_categories::COMPARE, &Level::INFO));
    }

    #[test]
    fn toggling_without_subscriber_fails() {
        let mut config = TraceEventConfig::default();
        assert!(matches!(
            config.enable(&TraceEvent::Runner),
            Err(Error::Tracing(_))
        ));
        assert!(config.get_enabled_events().contains(&TraceEvent::Runner));
        assert!(matches!(config.disable(&TraceEvent::Compare), Ok(())));
    }
}
