//! Diagnostic provider registry.
//!
//! Holds two independent collections, information collectors and log collectors,
//! each keyed by a human readable title. Titles are the uniqueness key.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::{join_all, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::disposable::Disposable;
use crate::provider::hooks::HookResult;

/// Collects diagnostic information (versions, environment, settings).
#[async_trait]
pub trait InfoCollector: Send + Sync {
    fn title(&self) -> &str;

    async fn collect(&self) -> HookResult<serde_json::Value>;
}

/// Collects log lines for troubleshooting.
#[async_trait]
pub trait LogCollector: Send + Sync {
    fn title(&self) -> &str;

    async fn collect(&self) -> HookResult<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DiagnosticKind {
    #[strum(serialize = "info")]
    Info,
    #[strum(serialize = "logs")]
    Logs,
}

/// Outcome of running one collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport<T> {
    pub title: String,
    pub result: Result<T, String>,
}

#[derive(Error, Debug)]
pub enum DiagnosticError {
    #[error("{kind} provider already registered: {title}")]
    AlreadyRegistered { kind: DiagnosticKind, title: String },
}

pub type DiagnosticResult<T> = Result<T, DiagnosticError>;

#[derive(Default)]
pub struct DiagnosticRegistry {
    info_collectors: Arc<DashMap<String, Arc<dyn InfoCollector>>>,
    log_collectors: Arc<DashMap<String, Arc<dyn LogCollector>>>,
}

impl DiagnosticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(level = "debug", skip(self, collector), fields(title = collector.title()))]
    pub fn register_info_collector(
        &self,
        collector: Arc<dyn InfoCollector>,
    ) -> DiagnosticResult<Disposable> {
        register(
            &self.info_collectors,
            DiagnosticKind::Info,
            collector.title().to_string(),
            collector,
        )
    }

    #[instrument(level = "debug", skip(self, collector), fields(title = collector.title()))]
    pub fn register_log_collector(
        &self,
        collector: Arc<dyn LogCollector>,
    ) -> DiagnosticResult<Disposable> {
        register(
            &self.log_collectors,
            DiagnosticKind::Logs,
            collector.title().to_string(),
            collector,
        )
    }

    pub fn info_titles(&self) -> Vec<String> {
        sorted_titles(&self.info_collectors)
    }

    pub fn log_titles(&self) -> Vec<String> {
        sorted_titles(&self.log_collectors)
    }

    /// Runs every information collector concurrently. A failing collector is reported, not propagated.
    pub async fn collect_info(&self) -> Vec<DiagnosticReport<serde_json::Value>> {
        collect_all(&*self.info_collectors, DiagnosticKind::Info, |collector| {
            async move { collector.collect().await }.boxed()
        })
        .await
    }

    pub async fn collect_logs(&self) -> Vec<DiagnosticReport<Vec<String>>> {
        collect_all(&*self.log_collectors, DiagnosticKind::Logs, |collector| {
            async move { collector.collect().await }.boxed()
        })
        .await
    }
}

/// Runs `collect` on every collector of one collection; reports come back sorted by title.
async fn collect_all<T, C, F>(
    collection: &DashMap<String, Arc<C>>,
    kind: DiagnosticKind,
    collect: F,
) -> Vec<DiagnosticReport<T>>
where
    C: ?Sized + Send + Sync,
    F: Fn(Arc<C>) -> BoxFuture<'static, HookResult<T>>,
{
    let collectors = collection
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect::<Vec<_>>();
    let mut reports = join_all(collectors.into_iter().map(|(title, collector)| {
        let pending = collect(collector);
        async move {
            let result = pending.await.map_err(|e| {
                warn!(%kind, %title, "collector failed: {:#}", e);
                format!("{:#}", e)
            });
            DiagnosticReport { title, result }
        }
    }))
    .await;
    reports.sort_by(|a, b| a.title.cmp(&b.title));
    reports
}

fn register<T: ?Sized + Send + Sync + 'static>(
    collection: &Arc<DashMap<String, Arc<T>>>,
    kind: DiagnosticKind,
    title: String,
    collector: Arc<T>,
) -> DiagnosticResult<Disposable> {
    match collection.entry(title.clone()) {
        Entry::Occupied(_) => {
            return Err(DiagnosticError::AlreadyRegistered { kind, title });
        }
        Entry::Vacant(slot) => {
            slot.insert(collector.clone());
        }
    }
    debug!(%kind, %title, "diagnostic provider registered");

    let collection = collection.clone();
    Ok(Disposable::new(move || {
        // Only remove the entry if it is still the collector this handle registered.
        let removed = collection.remove_if(&title, |_, current| Arc::ptr_eq(current, &collector));
        if removed.is_some() {
            debug!(%kind, %title, "diagnostic provider removed");
        }
    }))
}

fn sorted_titles<T: ?Sized>(collection: &DashMap<String, Arc<T>>) -> Vec<String> {
    let mut titles = collection
        .iter()
        .map(|entry| entry.key().clone())
        .collect::<Vec<_>>();
    titles.sort();
    titles
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct StaticInfo {
        title: String,
        fail: bool,
    }

    #[async_trait]
    impl InfoCollector for StaticInfo {
        fn title(&self) -> &str {
            &self.title
        }

        async fn collect(&self) -> HookResult<serde_json::Value> {
            if self.fail {
                anyhow::bail!("probe unavailable");
            }
            Ok(serde_json::json!({ "title": self.title }))
        }
    }

    struct StaticLogs(&'static str);

    #[async_trait]
    impl LogCollector for StaticLogs {
        fn title(&self) -> &str {
            self.0
        }

        async fn collect(&self) -> HookResult<Vec<String>> {
            Ok(vec![format!("{} started", self.0)])
        }
    }

    fn info(title: &str, fail: bool) -> Arc<dyn InfoCollector> {
        Arc::new(StaticInfo {
            title: title.to_string(),
            fail,
        })
    }

    #[test]
    fn test_duplicate_title_is_rejected() {
        let registry = DiagnosticRegistry::new();
        let _first = registry.register_info_collector(info("system", false)).unwrap();

        let second = registry.register_info_collector(info("system", false));

        assert!(matches!(
            second,
            Err(DiagnosticError::AlreadyRegistered {
                kind: DiagnosticKind::Info,
                ..
            })
        ));
        assert_eq!(registry.info_titles(), vec!["system".to_string()]);
    }

    #[test]
    fn test_kinds_are_independent() {
        let registry = DiagnosticRegistry::new();
        let _info = registry.register_info_collector(info("engine", false)).unwrap();
        let _logs = registry
            .register_log_collector(Arc::new(StaticLogs("engine")))
            .unwrap();

        assert_eq!(registry.info_titles(), vec!["engine".to_string()]);
        assert_eq!(registry.log_titles(), vec!["engine".to_string()]);
    }

    #[test]
    fn test_remove_then_add_same_title() {
        let registry = DiagnosticRegistry::new();
        let first = registry.register_info_collector(info("system", false)).unwrap();
        first.dispose();
        assert!(registry.info_titles().is_empty());

        let second = registry.register_info_collector(info("system", false)).unwrap();
        // A stale handle must not remove the newer registration.
        first.dispose();

        assert_eq!(registry.info_titles(), vec!["system".to_string()]);
        second.dispose();
        second.dispose();
        assert!(registry.info_titles().is_empty());
    }

    #[tokio::test]
    async fn test_collect_info_reports_failures() {
        let registry = DiagnosticRegistry::new();
        let _ok = registry.register_info_collector(info("a", false)).unwrap();
        let _broken = registry.register_info_collector(info("b", true)).unwrap();

        let reports = registry.collect_info().await;

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].title, "a");
        assert!(reports[0].result.is_ok());
        assert_eq!(reports[1].result, Err("probe unavailable".to_string()));
    }

    #[tokio::test]
    async fn test_collect_logs() {
        let registry = DiagnosticRegistry::new();
        let _logs = registry
            .register_log_collector(Arc::new(StaticLogs("tray")))
            .unwrap();

        let reports = registry.collect_logs().await;

        assert_eq!(reports[0].result, Ok(vec!["tray started".to_string()]));
    }

    struct BrokenLogs;

    #[async_trait]
    impl LogCollector for BrokenLogs {
        fn title(&self) -> &str {
            "audit"
        }

        async fn collect(&self) -> HookResult<Vec<String>> {
            anyhow::bail!("log file rotated away")
        }
    }

    #[tokio::test]
    async fn test_collect_logs_keeps_failures_per_title() {
        let registry = DiagnosticRegistry::new();
        let _tray = registry
            .register_log_collector(Arc::new(StaticLogs("tray")))
            .unwrap();
        let _audit = registry.register_log_collector(Arc::new(BrokenLogs)).unwrap();

        let reports = registry.collect_logs().await;

        let titles: Vec<&str> = reports.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["audit", "tray"]);
        assert_eq!(reports[0].result, Err("log file rotated away".to_string()));
        assert!(reports[1].result.is_ok());
    }
}
