use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tokio::time::{Duration, sleep};
use tracing_subscriber::EnvFilter;

use beacon_core::dispatch::{
    Channel, Channels, Emergency, EmergencyKind, InMemoryPreferenceStore, Language, Message,
    NotificationDispatcher, PreferenceStore, Preferences, Priority, Recipient, SmsChannel,
};
use beacon_core::metrics::MetricsSummary;
use beacon_core::resilience::{
    BreakerSettings, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerLayer, CircuitState,
    MetricsLayer, RetryConfig, RetryLayer, RetryPolicy, RetrySettings,
};
use beacon_core::{
    HandlerRegistry, PerformanceMetrics, QueueSettings, QueueStats, Router, TaskId, TaskQueue,
    TaskSnapshot,
};

/// SMS gateway that drops the first `failures` deliveries.
struct FlakySms {
    remaining_failures: AtomicU32,
}

impl FlakySms {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Channel for FlakySms {
    fn name(&self) -> &str {
        "sms"
    }

    async fn deliver(&self, message: &Message) -> Result<(), beacon_core::BeaconError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(beacon_core::BeaconError::processing(format!(
                "sms gateway timeout (left={left})"
            )));
        }
        SmsChannel.deliver(message).await
    }
}

#[derive(Serialize)]
struct Report {
    tasks: Vec<TaskSnapshot>,
    stats: QueueStats,
    metrics: MetricsSummary,
    circuits: BTreeMap<String, CircuitState>,
}

fn roster() -> [Recipient; 3] {
    [
        Recipient::new("etudiant1", "Jean Dupont", "jean@univ.fr")
            .with_phone("+33123456789")
            .with_preferred_language("fr"),
        Recipient::new("etudiant2", "Marie Martin", "marie@univ.fr")
            .with_phone("+33698765432")
            .with_preferred_language("fr"),
        Recipient::new("etudiant3", "John Smith", "john@univ.fr")
            .with_language(Language::En)
            .with_phone("+447900123456")
            .with_preferred_language("en"),
    ]
}

fn scenarios() -> Vec<(EmergencyKind, Emergency)> {
    let [jean, marie, john] = roster();
    vec![
        (
            EmergencyKind::Meteo,
            Emergency::new("alerte_meteo", "Tempête prévue ce soir", Priority::Haute)
                .to([jean.clone(), marie.clone()]),
        ),
        (
            EmergencyKind::Securite,
            Emergency::new("alerte_securite", "ÉVACUATION IMMÉDIATE", Priority::Critique)
                .to([jean.clone(), marie.clone(), john.clone()]),
        ),
        (
            EmergencyKind::Sante,
            Emergency::new(
                "alerte_sante",
                "Campagne de vaccination disponible cette semaine.",
                Priority::Normale,
            )
            .to([jean, john.clone()]),
        ),
        (
            EmergencyKind::Infra,
            Emergency::new(
                "alerte_infra",
                "Coupure d'eau prévue demain de 8h à 12h sur le campus nord.",
                Priority::Haute,
            )
            .to([marie, john]),
        ),
    ]
}

/// One processor per kind: breaker -> metrics -> retry -> dispatcher.
fn build_router(
    channels: Arc<Channels>,
    preferences: Arc<dyn PreferenceStore>,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<PerformanceMetrics>,
) -> anyhow::Result<Router> {
    let mut registry = HandlerRegistry::new();
    for kind in EmergencyKind::ALL {
        let dispatcher = NotificationDispatcher::new(kind, channels.clone(), preferences.clone());
        let processor = CircuitBreakerLayer::new(
            MetricsLayer::new(
                RetryLayer::new(dispatcher, retry.clone()),
                metrics.clone(),
                kind.as_str(),
            ),
            breaker.clone(),
            kind.as_str(),
        );
        registry.register(kind.task_type(), processor)?;
    }
    Ok(Router::new(registry))
}

async fn wait_all(queue: &TaskQueue, ids: &[TaskId]) {
    for id in ids {
        loop {
            match queue.get_task(id).await {
                Some(record) if record.status.is_terminal() => break,
                Some(_) => sleep(Duration::from_millis(50)).await,
                None => break,
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("beacon_core=info,beacon_cli=info")),
        )
        .init();

    let settings = QueueSettings::from_env().context("invalid queue settings")?;
    tracing::info!(?settings, "starting emergency broadcast demo");

    // (A) channels と preferences
    let channels = Arc::new(Channels::standard().with(FlakySms::new(1)));
    let preferences = Arc::new(InMemoryPreferenceStore::new());
    preferences.save("etudiant1", Preferences::channel("email"));
    preferences.save("etudiant2", Preferences::channel("sms"));
    preferences.save("etudiant3", Preferences::channel("app"));

    // (B) resilience（live config は実行中でも書き換えられる）
    let retry_config = Arc::new(RetryConfig::new());
    retry_config.set("delay", 0.2);
    let retry = RetryPolicy::new(RetrySettings::default()).with_config(retry_config);
    let breaker = Arc::new(
        CircuitBreaker::new(BreakerSettings::default())
            .with_config(Arc::new(CircuitBreakerConfig::new())),
    );
    let metrics = Arc::new(PerformanceMetrics::new());

    let router = build_router(
        channels,
        preferences,
        retry,
        breaker.clone(),
        metrics.clone(),
    )?;
    tracing::info!(types = ?router.registry().registered_types(), "processors registered");

    // (C) queue を起動して 4 シナリオを投入
    let queue = TaskQueue::with_settings(settings);
    queue.set_processor(router);
    queue.start().await?;

    let mut ids = Vec::new();
    for (kind, emergency) in scenarios() {
        let payload = serde_json::to_value(&emergency)?;
        let id = queue.enqueue(kind.task_type(), payload).await;
        tracing::info!(task_id = %id, kind = %kind, "scenario enqueued");
        ids.push(id);
    }

    // (D) 完了をポーリングで待つ（Ctrl-C で打ち切り）
    tokio::select! {
        _ = wait_all(&queue, &ids) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, shutting down");
        }
    }

    let report = Report {
        tasks: queue.get_all_tasks(ids.len()).await,
        stats: queue.get_stats().await,
        metrics: metrics.summary(),
        circuits: breaker.snapshot(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    // (E) graceful shutdown
    queue.stop(queue.settings().shutdown_timeout).await;
    let swept = queue.clear_expired().await;
    tracing::info!(swept, "demo finished");
    Ok(())
}
