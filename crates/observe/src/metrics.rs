use {
    prometheus::{
        Encoder,
        core::{AtomicF64, AtomicU64, GenericCounterVec},
    },
    std::{collections::HashMap, sync::OnceLock, time::Instant},
};

/// Global metrics registry used by all components.
static REGISTRY: OnceLock<prometheus_metric_storage::StorageRegistry> = OnceLock::new();

/// Configure global metrics registry.
///
/// This function allows specifying common prefix that will be added
/// to all metric names, as well as common labels.
///
/// # Panics
///
/// This function panics if it's called twice, or if it's called after
/// any call to [`get_registry`]. This function also panics if registry
/// configuration is invalid.
pub fn setup_registry(prefix: Option<String>, labels: Option<HashMap<String, String>>) {
    let registry = prometheus::Registry::new_custom(prefix, labels).unwrap();
    let storage_registry = prometheus_metric_storage::StorageRegistry::new(registry);
    REGISTRY.set(storage_registry).unwrap();
}

/// Get the global instance of the metrics registry.
pub fn get_registry() -> &'static prometheus::Registry {
    get_storage_registry().registry()
}

/// Get the global instance of the metric storage registry.
///
/// If the registry was not configured with [`setup_registry`] it gets
/// initialized with a default value so unit tests don't have to set it up.
pub fn get_storage_registry() -> &'static prometheus_metric_storage::StorageRegistry {
    REGISTRY.get_or_init(prometheus_metric_storage::StorageRegistry::default)
}

/// Renders all metrics of the registry in the prometheus text format.
pub fn encode(registry: &prometheus::Registry) -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Metrics shared by potentially all processes.
#[derive(prometheus_metric_storage::MetricStorage)]
pub struct Metrics {
    /// Time spent in each phase of an allocation batch.
    #[metric(labels("component", "phase"))]
    pub phase_time: GenericCounterVec<AtomicF64>,

    /// How many measurements we did for each phase.
    #[metric(labels("component", "phase"))]
    pub phase_count: GenericCounterVec<AtomicU64>,
}

impl Metrics {
    pub fn measure_phase(&self, start: Instant, component: &str, phase: &str) {
        self.phase_time
            .with_label_values(&[component, phase])
            .inc_by(start.elapsed().as_secs_f64());

        self.phase_count
            .with_label_values(&[component, phase])
            .inc()
    }
}

pub fn metrics() -> &'static Metrics {
    Metrics::instance(get_storage_registry()).unwrap()
}
