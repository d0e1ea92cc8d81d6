use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub offers_total: IntCounterVec,
    pub dispatch_searches_total: IntCounterVec,
    pub dispatch_search_latency_seconds: HistogramVec,
    pub orders_pending: IntGauge,
    pub sweep_runs_total: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let offers_total = IntCounterVec::new(
            Opts::new("offers_total", "Offers by lifecycle outcome"),
            &["outcome"],
        )
        .expect("valid offers_total metric");

        let dispatch_searches_total = IntCounterVec::new(
            Opts::new(
                "dispatch_searches_total",
                "Completed candidate searches by outcome",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_searches_total metric");

        let dispatch_search_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_search_latency_seconds",
                "Wall time from search start to its outcome, including radius waits",
            )
            .buckets(vec![0.001, 0.01, 0.1, 1.0, 10.0, 20.0, 30.0, 60.0]),
            &["outcome"],
        )
        .expect("valid dispatch_search_latency_seconds metric");

        let orders_pending = IntGauge::new("orders_pending", "Orders waiting for a driver")
            .expect("valid orders_pending metric");

        let sweep_runs_total = IntCounter::new("sweep_runs_total", "Timeout sweeps executed")
            .expect("valid sweep_runs_total metric");

        registry
            .register(Box::new(offers_total.clone()))
            .expect("register offers_total");
        registry
            .register(Box::new(dispatch_searches_total.clone()))
            .expect("register dispatch_searches_total");
        registry
            .register(Box::new(dispatch_search_latency_seconds.clone()))
            .expect("register dispatch_search_latency_seconds");
        registry
            .register(Box::new(orders_pending.clone()))
            .expect("register orders_pending");
        registry
            .register(Box::new(sweep_runs_total.clone()))
            .expect("register sweep_runs_total");

        Self {
            registry,
            offers_total,
            dispatch_searches_total,
            dispatch_search_latency_seconds,
            orders_pending,
            sweep_runs_total,
        }
    }

    pub fn offer(&self, outcome: &str) {
        self.offers_total.with_label_values(&[outcome]).inc();
    }

    pub fn search_finished(&self, outcome: &str, elapsed_secs: f64) {
        self.dispatch_searches_total
            .with_label_values(&[outcome])
            .inc();
        self.dispatch_search_latency_seconds
            .with_label_values(&[outcome])
            .observe(elapsed_secs);
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
