//! Log output and optional OTLP trace export for the exter server.
//!
//! Spans (login, verification, provider reconciliation and store queries) go
//! to stdout always and to a collector when `OTEL_EXPORTER_OTLP_ENDPOINT` is
//! set.

use crate::GIT_COMMIT_HASH;
use anyhow::{anyhow, Context, Result};
use base64ct::{Base64, Encoding};
use once_cell::sync::OnceCell;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
    Resource,
};
use std::{collections::BTreeMap, env, time::Duration};
use tonic::metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue};
use tracing::{debug, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;

const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

/// Where and how spans are exported.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Exporter {
    endpoint: String,
    headers: BTreeMap<String, String>,
    instance_id: String,
}

impl Exporter {
    /// Read the standard `OTEL_*` variables through `lookup`. `None` when no
    /// endpoint is configured.
    fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT")?;
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return None;
        }

        if let Some(protocol) = lookup("OTEL_EXPORTER_OTLP_PROTOCOL").filter(|p| p != "grpc") {
            warn!("OTEL_EXPORTER_OTLP_PROTOCOL={protocol} ignored, exter exports over grpc");
        }

        Some(Self {
            endpoint: with_scheme(endpoint),
            headers: lookup("OTEL_EXPORTER_OTLP_HEADERS")
                .map(|h| collector_headers(&h))
                .unwrap_or_default(),
            instance_id: lookup("OTEL_SERVICE_INSTANCE_ID")
                .unwrap_or_else(|| Ulid::new().to_string()),
        })
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes([
                KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new("service.instance.id", self.instance_id.clone()),
                KeyValue::new("vcs.revision", GIT_COMMIT_HASH),
            ])
            .build()
    }

    fn tracer(&self) -> Result<Tracer> {
        let mut builder = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&self.endpoint)
            .with_timeout(EXPORT_TIMEOUT);
        if !self.headers.is_empty() {
            builder = builder.with_metadata(grpc_metadata(&self.headers)?);
        }
        let exporter = builder
            .build()
            .with_context(|| format!("span exporter for {}", self.endpoint))?;

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(self.resource())
            .build();
        let _ = TRACER_PROVIDER.set(provider.clone());

        global::set_tracer_provider(provider.clone());
        global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]));

        Ok(provider.tracer(env!("CARGO_PKG_NAME")))
    }
}

/// `key=value` pairs separated by commas; pairs without a key are dropped.
fn collector_headers(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}

// gRPC wants `-bin` keys as raw bytes, the variable holds them base64 encoded
fn grpc_metadata(headers: &BTreeMap<String, String>) -> Result<MetadataMap> {
    let mut metadata = MetadataMap::with_capacity(headers.len());
    for (name, value) in headers {
        if name.ends_with("-bin") {
            let bytes = Base64::decode_vec(value)
                .map_err(|e| anyhow!("collector header {name} is not base64: {e}"))?;
            let key = MetadataKey::<Binary>::from_bytes(name.as_bytes())
                .map_err(|e| anyhow!("collector header {name}: {e}"))?;
            metadata.insert_bin(key, MetadataValue::from_bytes(&bytes));
        } else {
            let key = MetadataKey::<Ascii>::from_bytes(name.as_bytes())
                .map_err(|e| anyhow!("collector header {name}: {e}"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|e| anyhow!("collector header {name} has a non ASCII value: {e}"))?;
            metadata.insert(key, value);
        }
    }
    Ok(metadata)
}

/// Collectors usually run next to exter without TLS.
fn with_scheme(endpoint: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

fn filter(level: Level) -> Result<EnvFilter> {
    Ok(EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?))
}

/// Install the global subscriber, exporting spans when a collector is
/// configured.
///
/// # Errors
///
/// Returns an error if the exporter or the subscriber cannot be installed.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(false);
    let filter = filter(verbosity_level.unwrap_or(Level::ERROR))?;

    match Exporter::from_lookup(|key| env::var(key).ok()) {
        Some(exporter) => {
            let otel_layer = tracing_opentelemetry::layer().with_tracer(exporter.tracer()?);
            let subscriber = Registry::default()
                .with(fmt_layer)
                .with(otel_layer)
                .with(filter);
            tracing::subscriber::set_global_default(subscriber)?;
            debug!(endpoint = %exporter.endpoint, "exporting spans");
        }
        None => {
            let subscriber = Registry::default().with(fmt_layer).with(filter);
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}

/// Flush pending spans before the server exits.
pub fn shutdown_tracer() {
    let Some(provider) = TRACER_PROVIDER.get() else {
        return;
    };
    if let Err(e) = provider.shutdown() {
        debug!("span flush failed: {e}");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn no_endpoint_means_no_export() {
        assert_eq!(Exporter::from_lookup(lookup(&[])), None);
        assert_eq!(
            Exporter::from_lookup(lookup(&[("OTEL_EXPORTER_OTLP_ENDPOINT", "  ")])),
            None
        );
    }

    #[test]
    fn exporter_from_variables() {
        let exporter = Exporter::from_lookup(lookup(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "collector:4317/"),
            ("OTEL_EXPORTER_OTLP_HEADERS", "Api-Key=abc"),
            ("OTEL_EXPORTER_OTLP_PROTOCOL", "http/protobuf"),
            ("OTEL_SERVICE_INSTANCE_ID", "exter-1"),
        ]))
        .unwrap();
        assert_eq!(exporter.endpoint, "http://collector:4317");
        assert_eq!(exporter.headers.get("api-key").map(String::as_str), Some("abc"));
        assert_eq!(exporter.instance_id, "exter-1");

        let generated = Exporter::from_lookup(lookup(&[(
            "OTEL_EXPORTER_OTLP_ENDPOINT",
            "https://otel.example.com:4317",
        )]))
        .unwrap();
        assert_eq!(generated.endpoint, "https://otel.example.com:4317");
        assert!(Ulid::from_string(&generated.instance_id).is_ok());
    }

    #[test]
    fn header_pairs() {
        assert!(collector_headers("").is_empty());
        let headers = collector_headers("tenant = exter ,broken,=nokey,auth=Basic dXNlcjpwYXNz==");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("tenant").map(String::as_str), Some("exter"));
        assert_eq!(
            headers.get("auth").map(String::as_str),
            Some("Basic dXNlcjpwYXNz==")
        );
    }

    #[test]
    fn binary_headers_are_decoded() {
        let headers = collector_headers("authorization=Bearer t,trace-bin=YmluYXJ5IGRhdGE=");
        let metadata = grpc_metadata(&headers).unwrap();
        assert_eq!(metadata.len(), 2);
        assert!(metadata.get("authorization").is_some());
        let bytes = metadata.get_bin("trace-bin").unwrap().to_bytes().unwrap();
        assert_eq!(&bytes[..], b"binary data");

        let err = grpc_metadata(&collector_headers("trace-bin=not base64!")).unwrap_err();
        assert!(err.to_string().contains("is not base64"));
    }

    #[test]
    fn shutdown_without_exporter() {
        shutdown_tracer();
    }
}
