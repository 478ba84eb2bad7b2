#[cfg(feature = "metrics")]
mod registry {
    use lazy_static::lazy_static;
    use prometheus::{register_int_counter, Encoder, IntCounter, TextEncoder};

    lazy_static! {
        static ref EXPORTED_DOCUMENTS: IntCounter = register_int_counter!(
            "exported_documents_total",
            "Total number of documents emitted by exporters"
        ).expect("register exported_documents_total");
        static ref TRANSFORM_ERRORS: IntCounter = register_int_counter!(
            "transform_errors_total",
            "Rows that failed the modifier chain or expansion"
        ).expect("register transform_errors_total");
        static ref SOURCE_ERRORS: IntCounter = register_int_counter!(
            "source_errors_total",
            "Errors reported by row sources"
        ).expect("register source_errors_total");
    }

    pub(crate) fn document_exported() {
        EXPORTED_DOCUMENTS.inc();
    }

    pub(crate) fn transform_failed() {
        TRANSFORM_ERRORS.inc();
    }

    pub(crate) fn source_failed() {
        SOURCE_ERRORS.inc();
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn gather_metrics() -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        let metric_families = prometheus::gather();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

#[cfg(not(feature = "metrics"))]
mod registry {
    pub(crate) fn document_exported() {}
    pub(crate) fn transform_failed() {}
    pub(crate) fn source_failed() {}
}

#[cfg(feature = "metrics")]
pub use registry::gather_metrics;
pub(crate) use registry::{document_exported, source_failed, transform_failed};
