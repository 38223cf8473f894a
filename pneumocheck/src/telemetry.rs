use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;
use std::collections::HashSet;

pub struct Metrics {
    request_counter: Counter<u64>,
    prediction_duration: Histogram<u64>,
    prediction_outcomes: Counter<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build prometheus exporter: {}", e))?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("pneumocheck");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("api_requests_total")
            .with_description("Total number of API requests")
            .build();

        // Remote inference runs on a shared host: cold starts take seconds.
        let boundaries = generate_boundaries(&[
            (0, 200, 50),
            (200, 1000, 100),
            (1000, 5000, 500),
            (5000, 30000, 5000),
        ]);

        let prediction_duration = meter
            .u64_histogram("prediction_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of remote prediction calls in milliseconds")
            .build();

        let prediction_outcomes = meter
            .u64_counter("prediction_outcomes_total")
            .with_description("Submissions by outcome")
            .build();

        Ok(Metrics {
            request_counter,
            prediction_duration,
            prediction_outcomes,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_prediction_duration(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.prediction_duration.record(duration_ms, &attributes);
    }

    pub fn record_prediction_outcome(&self, outcome: &str) {
        let attributes = vec![KeyValue::new("outcome", outcome.to_string())];
        self.prediction_outcomes.add(1, &attributes);
    }
}

/// Builds histogram bucket bounds from `(start, end, step)` segments,
/// skipping values shared by adjacent segments.
fn generate_boundaries(segments: &[(u32, u32, usize)]) -> Vec<f64> {
    let mut seen = HashSet::new();
    segments
        .iter()
        .flat_map(|&(start, end, step)| (start..=end).step_by(step.max(1)))
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_boundaries() {
        let get = generate_boundaries(&[(0, 100, 50), (100, 300, 100), (300, 1300, 1000)]);
        let expected = vec![0.0, 50.0, 100.0, 200.0, 300.0, 1300.0];

        assert_eq!(get, expected);
    }

    #[test]
    fn recorded_metrics_reach_the_registry() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("predict");
        metrics.record_prediction_outcome("succeeded");

        let names: Vec<String> = metrics
            .registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();

        assert!(names.iter().any(|name| name.starts_with("api_requests")));
        assert!(names.iter().any(|name| name.starts_with("prediction_outcomes")));
    }
}
