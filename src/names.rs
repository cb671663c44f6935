use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::generation::GenerationToken;
use crate::resolver::RemoteResolver;
use crate::session::SessionEvent;

/// Backfills display names for placeholder results with at most
/// `concurrency` lookups outstanding. A finished lookup immediately makes
/// room for the next pending id.
///
/// The limit holds across restarts: every run draws from the same permits,
/// and a cancelled run's lookups keep theirs until they are dropped.
pub struct NameResolutionQueue {
    concurrency: usize,
    permits: Arc<Semaphore>,
    run: u64,
    cancel: Option<CancellationToken>,
    order: Vec<String>,
    queued: HashSet<String>,
}

impl NameResolutionQueue {
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            concurrency,
            permits: Arc::new(Semaphore::new(concurrency)),
            run: 0,
            cancel: None,
            order: Vec::new(),
            queued: HashSet::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.cancel.is_some()
    }

    /// Start resolving `ids` under `token`, replacing any running queue.
    ///
    /// Every lookup result is sent as [`SessionEvent::NameResolved`]; the
    /// driver always ends with one [`SessionEvent::NamesFinished`], also when
    /// cancelled. Returns the run number carried by those events.
    pub fn start(
        &mut self,
        ids: Vec<String>,
        token: &GenerationToken,
        resolver: Arc<RemoteResolver>,
        tx: &UnboundedSender<SessionEvent>,
    ) -> u64 {
        self.cancel();
        self.run += 1;

        let cancel = token.child();
        self.cancel = Some(cancel.clone());
        self.queued = ids.iter().cloned().collect();
        self.order = ids.clone();

        tokio::spawn(drive(
            self.run,
            ids,
            token.clone(),
            cancel,
            resolver,
            self.permits.clone(),
            self.concurrency,
            tx.clone(),
        ));

        self.run
    }

    /// Drop `id` from the outstanding set once its lookup has reported.
    pub fn mark_done(&mut self, id: &str) {
        self.queued.remove(id);
    }

    /// Ids of the running queue that have not reported yet, in queue order.
    pub fn remaining(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.queued.contains(*id))
            .cloned()
            .collect()
    }

    /// Abandon the running queue. Pending ids are dropped and in-flight
    /// lookups are aborted.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.order.clear();
        self.queued.clear();
    }

    /// Called when a driver reports it has finished. True if `run` is the
    /// current queue, which is then marked idle.
    pub fn finish(&mut self, run: u64) -> bool {
        if run != self.run || self.cancel.is_none() {
            return false;
        }
        self.cancel = None;
        self.order.clear();
        self.queued.clear();
        true
    }
}

async fn drive(
    run: u64,
    ids: Vec<String>,
    token: GenerationToken,
    cancel: CancellationToken,
    resolver: Arc<RemoteResolver>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    tx: UnboundedSender<SessionEvent>,
) {
    let total = ids.len();
    let mut lookups = stream::iter(ids)
        .map(|id| {
            let resolver = resolver.clone();
            let permits = permits.clone();
            async move {
                // Held until the lookup completes or is dropped.
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (id, None),
                };
                let name = match resolver.lookup_by_id(&id).await {
                    Ok(record) => Some(record.name),
                    Err(e) => {
                        log::debug!("No name for {}: {}", id, e);
                        None
                    }
                };
                (id, name)
            }
        })
        .buffer_unordered(concurrency);

    let mut done = 0;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!("Name queue {} abandoned after {}/{}", run, done, total);
                break;
            }
            next = lookups.next() => match next {
                Some((id, name)) => {
                    done += 1;
                    let _ = tx.send(SessionEvent::NameResolved {
                        token: token.clone(),
                        id,
                        name,
                    });
                }
                None => break,
            }
        }
    }

    let _ = tx.send(SessionEvent::NamesFinished { token, run });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::generation::QueryGeneration;
    use crate::providers::registry::ProviderChain;
    use crate::providers::{MetadataProvider, MetadataRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Gauge {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    struct Slow {
        gauge: Arc<Gauge>,
        delay: Duration,
    }

    #[async_trait]
    impl MetadataProvider for Slow {
        async fn lookup_by_id(&self, id: &str) -> Result<MetadataRecord> {
            self.gauge.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.gauge.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.gauge.active.fetch_sub(1, Ordering::SeqCst);
            if id.ends_with('7') {
                return Err(Error::NotFound(id.to_string()));
            }
            Ok(MetadataRecord::new(id, format!("Game {}", id)))
        }

        fn source_name(&self) -> &'static str {
            "slow"
        }
    }

    fn resolver(gauge: Arc<Gauge>, delay: Duration) -> Arc<RemoteResolver> {
        Arc::new(RemoteResolver::new(
            ProviderChain::new().with(Arc::new(Slow { gauge, delay })),
        ))
    }

    #[tokio::test]
    async fn test_never_more_than_five_outstanding() {
        let gauge = Arc::new(Gauge::default());
        let mut queue = NameResolutionQueue::new(5);
        let mut generation = QueryGeneration::new();
        let token = generation.new_generation();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let ids: Vec<String> = (0..60).map(|i| i.to_string()).collect();
        let run = queue.start(ids, &token, resolver(gauge.clone(), Duration::from_millis(5)), &tx);

        let mut resolved = 0;
        loop {
            match rx.recv().await.unwrap() {
                SessionEvent::NameResolved { .. } => resolved += 1,
                SessionEvent::NamesFinished { run: r, .. } => {
                    assert_eq!(r, run);
                    break;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }

        assert_eq!(resolved, 60);
        assert_eq!(gauge.calls.load(Ordering::SeqCst), 60);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 5);
        assert!(gauge.peak.load(Ordering::SeqCst) >= 2);
        assert!(queue.finish(run));
        assert!(!queue.is_running());
    }

    #[tokio::test]
    async fn test_new_generation_abandons_queue() {
        let gauge = Arc::new(Gauge::default());
        let mut queue = NameResolutionQueue::new(5);
        let mut generation = QueryGeneration::new();
        let token = generation.new_generation();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let ids: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        queue.start(ids, &token, resolver(gauge.clone(), Duration::from_millis(200)), &tx);
        assert_eq!(queue.remaining().len(), 50);

        generation.new_generation();

        let mut resolved = 0;
        loop {
            match rx.recv().await.unwrap() {
                SessionEvent::NameResolved { .. } => resolved += 1,
                SessionEvent::NamesFinished { .. } => break,
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(resolved, 0);
        assert!(gauge.calls.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn test_restart_supersedes_previous_run() {
        let gauge = Arc::new(Gauge::default());
        let mut queue = NameResolutionQueue::new(5);
        let mut generation = QueryGeneration::new();
        let token = generation.new_generation();
        let (tx, _rx) = mpsc::unbounded_channel();
        let r = resolver(gauge, Duration::from_millis(50));

        let first = queue.start(vec!["1".to_string()], &token, r.clone(), &tx);
        let second = queue.start(vec!["2".to_string()], &token, r, &tx);
        assert!(!queue.finish(first));
        assert_eq!(queue.remaining(), vec!["2".to_string()]);
        queue.mark_done("2");
        assert!(queue.remaining().is_empty());
        assert!(queue.finish(second));
    }

    /// Counts a lookup as outstanding until it finishes or is dropped.
    struct Outstanding(Arc<Gauge>);

    impl Outstanding {
        fn enter(gauge: &Arc<Gauge>) -> Self {
            gauge.calls.fetch_add(1, Ordering::SeqCst);
            let now = gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
            gauge.peak.fetch_max(now, Ordering::SeqCst);
            Self(gauge.clone())
        }
    }

    impl Drop for Outstanding {
        fn drop(&mut self) {
            self.0.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct Guarded {
        gauge: Arc<Gauge>,
    }

    #[async_trait]
    impl MetadataProvider for Guarded {
        async fn lookup_by_id(&self, id: &str) -> Result<MetadataRecord> {
            let _outstanding = Outstanding::enter(&self.gauge);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(MetadataRecord::new(id, format!("Game {}", id)))
        }

        fn source_name(&self) -> &'static str {
            "guarded"
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_restart_mid_flight_keeps_limit() {
        let gauge = Arc::new(Gauge::default());
        let resolver = Arc::new(RemoteResolver::new(
            ProviderChain::new().with(Arc::new(Guarded {
                gauge: gauge.clone(),
            })),
        ));
        let mut queue = NameResolutionQueue::new(5);
        let mut generation = QueryGeneration::new();
        let token = generation.new_generation();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        queue.start(first, &token, resolver.clone(), &tx);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut ids = queue.remaining();
        ids.extend((100..120).map(|i| i.to_string()));
        let second = queue.start(ids, &token, resolver, &tx);

        loop {
            match rx.recv().await.unwrap() {
                SessionEvent::NameResolved { .. } => {}
                SessionEvent::NamesFinished { run, .. } if run == second => break,
                SessionEvent::NamesFinished { .. } => {}
                other => panic!("unexpected event {:?}", other),
            }
        }

        let peak = gauge.peak.load(Ordering::SeqCst);
        assert!(peak <= 5, "peak outstanding was {}", peak);
        assert!(gauge.calls.load(Ordering::SeqCst) >= 40);
        assert_eq!(gauge.active.load(Ordering::SeqCst), 0);
    }
}
