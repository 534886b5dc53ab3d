//! Per-generation metrics and their fan-out to subscribers.
//!
//! The engine publishes one [`GenerationMetrics`] record per completed generation into a
//! bounded channel without ever blocking. A [`MetricsStreamer`] reads that channel on its
//! own thread and copies each record into every subscriber's buffer, again without
//! blocking: a subscriber whose buffer is full loses the record. Subscribers therefore see
//! generation numbers in increasing order, possibly with gaps.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::{DateTime, Utc};
use darwin_genome::{Evolvable as _, Individual};

use crate::cancel::CancellationToken;

/// Buffer size of each subscriber channel.
pub const SUBSCRIBER_CAPACITY: usize = 10;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Summary of one generation.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct GenerationMetrics {
    pub generation: usize,
    /// Wall time of the generation step.
    #[serde(serialize_with = "serialize_seconds")]
    pub duration: Duration,
    pub best: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub population_size: usize,
    pub timestamp: DateTime<Utc>,
    /// Rendering of the fittest individual.
    pub best_description: String,
    /// Mean depth of tree-shaped genomes.
    pub mean_depth: Option<f64>,
    /// Mean node count of tree-shaped genomes.
    pub mean_nodes: Option<f64>,
}

fn serialize_seconds<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

impl GenerationMetrics {
    /// Summarizes `individuals`, which must not be empty.
    #[must_use]
    #[expect(clippy::cast_precision_loss)]
    pub fn compute(generation: usize, duration: Duration, individuals: &[Arc<Individual>]) -> Self {
        let n = individuals.len() as f64;
        let mut best = &individuals[0];
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for individual in individuals {
            let fitness = individual.fitness();
            if fitness > best.fitness() {
                best = individual;
            }
            min = min.min(fitness);
            max = max.max(fitness);
            sum += fitness;
        }

        let structures: Vec<_> = individuals.iter().filter_map(|i| i.structure()).collect();
        let (mean_depth, mean_nodes) = if structures.is_empty() {
            (None, None)
        } else {
            let count = structures.len() as f64;
            (
                Some(structures.iter().map(|s| s.depth as f64).sum::<f64>() / count),
                Some(structures.iter().map(|s| s.nodes as f64).sum::<f64>() / count),
            )
        };

        Self {
            generation,
            duration,
            best: best.fitness(),
            avg: sum / n,
            min,
            max,
            population_size: individuals.len(),
            timestamp: Utc::now(),
            best_description: best.describe(),
            mean_depth,
            mean_nodes,
        }
    }
}

type Subscribers = Arc<Mutex<Vec<SyncSender<GenerationMetrics>>>>;

/// Fans metrics records out to any number of subscribers.
#[derive(Debug)]
pub struct MetricsStreamer {
    source: Option<Receiver<GenerationMetrics>>,
    subscribers: Subscribers,
    done: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl MetricsStreamer {
    #[must_use]
    pub fn new(source: Receiver<GenerationMetrics>) -> Self {
        Self {
            source: Some(source),
            subscribers: Subscribers::default(),
            done: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    /// Registers a subscriber with a buffer of [`SUBSCRIBER_CAPACITY`] records.
    ///
    /// The returned channel is closed by [`stop`](Self::stop).
    #[must_use]
    pub fn subscribe(&self) -> Receiver<GenerationMetrics> {
        let (tx, rx) = mpsc::sync_channel(SUBSCRIBER_CAPACITY);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Starts the reader thread. Calling it again has no effect.
    ///
    /// The reader exits when the source is closed, when `cancel` fires, or on
    /// [`stop`](Self::stop).
    pub fn start(&mut self, cancel: &CancellationToken) {
        let Some(source) = self.source.take() else {
            return;
        };
        let subscribers = Arc::clone(&self.subscribers);
        let done = Arc::clone(&self.done);
        let cancel = cancel.clone();
        self.reader = Some(thread::spawn(move || {
            loop {
                match source.recv_timeout(POLL_INTERVAL) {
                    Ok(metrics) => deliver(&subscribers, &metrics),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                if done.load(Ordering::Acquire) || cancel.is_cancelled() {
                    while let Ok(metrics) = source.try_recv() {
                        deliver(&subscribers, &metrics);
                    }
                    break;
                }
            }
        }));
    }

    /// Delivers records still buffered at the source, waits for the reader, then closes
    /// every subscriber channel. Idempotent.
    pub fn stop(&mut self) {
        self.done.store(true, Ordering::Release);
        if let Some(reader) = self.reader.take()
            && reader.join().is_err()
        {
            log::error!("metrics reader panicked");
        }
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Drop for MetricsStreamer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn deliver(subscribers: &Mutex<Vec<SyncSender<GenerationMetrics>>>, metrics: &GenerationMetrics) {
    let subscribers = subscribers.lock().unwrap_or_else(PoisonError::into_inner);
    for (index, subscriber) in subscribers.iter().enumerate() {
        match subscriber.try_send(metrics.clone()) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => log::debug!(
                "subscriber {index} is full; generation {} dropped",
                metrics.generation
            ),
        }
    }
}
