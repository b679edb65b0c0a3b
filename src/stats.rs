//! Stats surface
//!
//! The engine does not push metrics anywhere on its own; an embedder hands
//! in a [`StatsCollector`] sink and the engine records its counters on
//! demand. Counter names are stable and tags use `key=value` form.

/// Sink for the engine's monotonic counters and gauges
pub trait StatsCollector {
    /// Record one sample, optionally tagged (e.g. `type=trivial`)
    fn record(&mut self, name: &str, value: u64, tag: Option<&str>);
}

/// A recorded sample, as captured by [`VecCollector`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub name: String,
    pub value: u64,
    pub tag: Option<String>,
}

/// Collector that buffers samples in memory, for tests and simple exporters
#[derive(Debug, Default)]
pub struct VecCollector {
    samples: Vec<Sample>,
}

impl VecCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// All samples recorded so far, in recording order
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Value of the first sample matching name and tag, if recorded
    pub fn get(&self, name: &str, tag: Option<&str>) -> Option<u64> {
        self.samples
            .iter()
            .find(|s| s.name == name && s.tag.as_deref() == tag)
            .map(|s| s.value)
    }
}

impl StatsCollector for VecCollector {
    fn record(&mut self, name: &str, value: u64, tag: Option<&str>) {
        self.samples.push(Sample {
            name: name.to_string(),
            value,
            tag: tag.map(str::to_string),
        });
    }
}
