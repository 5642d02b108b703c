use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, SendError, Sender, unbounded};
use protocol::{
    ApplyCompleter, ApplyError, ApplyResult, ApplyTicket, Snapshot, TextureApplier, Version,
    apply_ticket,
};
use thiserror::Error;

use crate::{Prepared, TextureBackend, TextureSlot, prepare, settle};

#[derive(Debug, Error)]
pub enum ApplierError {
    #[error("worker_count must be at least 1")]
    NoWorkers,
    #[error("failed to spawn texture worker: {0}")]
    Spawn(#[from] std::io::Error),
}

struct UploadJob {
    snapshot: Arc<Snapshot>,
    completer: ApplyCompleter,
}

struct Shared<B: TextureBackend> {
    backend: B,
    slot: Mutex<TextureSlot<B::Resource>>,
    applied: AtomicU64,
}

impl<B: TextureBackend> Shared<B> {
    fn applied_version(&self) -> Version {
        Version::new(self.applied.load(Ordering::Acquire))
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, TextureSlot<B::Resource>> {
        self.slot
            .lock()
            .unwrap_or_else(|_| panic!("texture slot lock poisoned"))
    }

    fn process(&self, snapshot: &Snapshot) -> ApplyResult {
        let version = snapshot.version();
        match prepare(&self.backend, snapshot, self.applied_version())? {
            Prepared::Stale(outcome) => Ok(outcome),
            Prepared::Uploaded(resource) => {
                let mut slot = self.lock_slot();
                let outcome = settle(&self.backend, &mut slot, version, resource);
                self.applied
                    .store(slot.applied_version().get(), Ordering::Release);
                Ok(outcome)
            }
        }
    }
}

/// Uploads on a pool of worker threads.
///
/// Completions can land in any order; the slot's version gate turns late
/// arrivals into [`protocol::ApplyOutcome::Stale`]. Dropping the applier
/// drains queued jobs, joins the workers and disposes the live texture.
pub struct ThreadedTextureApplier<B>
where
    B: TextureBackend + Send + Sync + 'static,
    B::Resource: Send,
{
    shared: Arc<Shared<B>>,
    jobs: Option<Sender<UploadJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl<B> ThreadedTextureApplier<B>
where
    B: TextureBackend + Send + Sync + 'static,
    B::Resource: Send,
{
    pub fn new(backend: B, worker_count: usize) -> Result<Self, ApplierError> {
        if worker_count == 0 {
            return Err(ApplierError::NoWorkers);
        }
        let shared = Arc::new(Shared {
            backend,
            slot: Mutex::new(TextureSlot::new()),
            applied: AtomicU64::new(Version::ZERO.get()),
        });
        let (sender, receiver) = unbounded();
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let shared = Arc::clone(&shared);
            let receiver: Receiver<UploadJob> = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("texture-upload-{index}"))
                .spawn(move || worker_loop(&shared, &receiver))?;
            workers.push(handle);
        }
        tracing::debug!(target: "texture_applier", worker_count, "texture workers started");
        Ok(Self {
            shared,
            jobs: Some(sender),
            workers,
        })
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    pub fn with_live_texture<T>(&self, f: impl FnOnce(Version, &B::Resource) -> T) -> Option<T> {
        let slot = self.shared.lock_slot();
        slot.live().map(|(version, resource)| f(version, resource))
    }
}

fn worker_loop<B: TextureBackend>(shared: &Shared<B>, jobs: &Receiver<UploadJob>) {
    for job in jobs.iter() {
        let result = shared.process(&job.snapshot);
        job.completer.complete(result);
    }
}

impl<B> TextureApplier for ThreadedTextureApplier<B>
where
    B: TextureBackend + Send + Sync + 'static,
    B::Resource: Send,
{
    fn apply(&mut self, snapshot: Arc<Snapshot>) -> ApplyTicket {
        let version = snapshot.version();
        let (completer, ticket) = apply_ticket(version);
        let job = UploadJob {
            snapshot,
            completer,
        };
        let Some(jobs) = self.jobs.as_ref() else {
            job.completer
                .complete(Err(ApplyError::WorkerUnavailable { version }));
            return ticket;
        };
        if let Err(SendError(job)) = jobs.send(job) {
            tracing::warn!(target: "texture_applier", %version, "texture workers are gone");
            job.completer
                .complete(Err(ApplyError::WorkerUnavailable { version }));
        }
        ticket
    }

    fn applied_version(&self) -> Version {
        self.shared.applied_version()
    }
}

impl<B> Drop for ThreadedTextureApplier<B>
where
    B: TextureBackend + Send + Sync + 'static,
    B::Resource: Send,
{
    fn drop(&mut self) {
        drop(self.jobs.take());
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!(target: "texture_applier", "texture worker panicked");
            }
        }
        let live = self.shared.lock_slot().take();
        if let Some((_, resource)) = live {
            self.shared.backend.dispose(resource);
        }
    }
}

impl<B> std::fmt::Debug for ThreadedTextureApplier<B>
where
    B: TextureBackend + Send + Sync + 'static,
    B::Resource: Send,
{
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ThreadedTextureApplier")
            .field("applied_version", &self.shared.applied_version())
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    use crossbeam_channel::bounded;
    use model::{RasterSize, Rgba8};
    use protocol::ApplyOutcome;

    use super::*;
    use crate::{BackendError, CpuTexture, CpuTextureBackend};

    const WAIT: Duration = Duration::from_secs(5);

    fn snapshot(version: u64) -> Arc<Snapshot> {
        let size = RasterSize::new(4, 4).expect("size");
        Arc::new(
            Snapshot::new(
                Version::new(version),
                size,
                vec![Rgba8::BLACK; size.pixel_count()],
                version,
                Instant::now(),
            )
            .expect("snapshot"),
        )
    }

    /// Each upload blocks until the test opens the gate for its version.
    struct GatedBackend {
        inner: CpuTextureBackend,
        gates: Mutex<HashMap<u64, Receiver<()>>>,
    }

    impl GatedBackend {
        fn new(inner: CpuTextureBackend, versions: &[u64]) -> (Self, HashMap<u64, Sender<()>>) {
            let mut gates = HashMap::new();
            let mut keys = HashMap::new();
            for &version in versions {
                let (open, gate) = bounded(1);
                gates.insert(version, gate);
                keys.insert(version, open);
            }
            let backend = Self {
                inner,
                gates: Mutex::new(gates),
            };
            (backend, keys)
        }
    }

    impl TextureBackend for GatedBackend {
        type Resource = CpuTexture;

        fn upload(&self, snapshot: &Snapshot) -> Result<CpuTexture, BackendError> {
            let gate = self
                .gates
                .lock()
                .expect("gates")
                .remove(&snapshot.version().get());
            if let Some(gate) = gate {
                gate.recv_timeout(WAIT).expect("gate opened");
            }
            self.inner.upload(snapshot)
        }

        fn dispose(&self, resource: CpuTexture) {
            self.inner.dispose(resource);
        }
    }

    #[test]
    fn out_of_order_completion_is_discarded() {
        let cpu = CpuTextureBackend::default();
        let (backend, keys) = GatedBackend::new(cpu.clone(), &[1, 2]);
        let mut applier = ThreadedTextureApplier::new(backend, 2).expect("workers");

        let first = applier.apply(snapshot(1));
        let second = applier.apply(snapshot(2));

        keys[&2].send(()).expect("open v2");
        assert_eq!(
            second.wait(WAIT),
            Some(Ok(ApplyOutcome::Applied {
                version: Version::new(2),
                replaced: None
            }))
        );
        keys[&1].send(()).expect("open v1");
        assert_eq!(
            first.wait(WAIT),
            Some(Ok(ApplyOutcome::Stale {
                version: Version::new(1),
                applied: Version::new(2)
            }))
        );

        assert_eq!(applier.applied_version(), Version::new(2));
        assert_eq!(
            applier.with_live_texture(|version, _| version),
            Some(Version::new(2))
        );
        assert_eq!(cpu.live_resources(), 1, "rejected upload must be disposed");

        drop(applier);
        assert_eq!(cpu.live_resources(), 0);
    }

    #[test]
    fn sequential_applies_keep_one_live_texture() {
        let cpu = CpuTextureBackend::default();
        let mut applier = ThreadedTextureApplier::new(cpu.clone(), 1).expect("workers");

        let tickets: Vec<ApplyTicket> = (1..=6).map(|v| applier.apply(snapshot(v))).collect();
        for ticket in &tickets {
            assert!(matches!(ticket.wait(WAIT), Some(Ok(ApplyOutcome::Applied { .. }))));
        }
        assert_eq!(applier.applied_version(), Version::new(6));
        assert_eq!(cpu.live_resources(), 1);

        drop(applier);
        assert_eq!(cpu.live_resources(), 0);
        assert_eq!(cpu.uploads(), 6);
    }

    #[test]
    fn drop_completes_queued_jobs() {
        let cpu = CpuTextureBackend::default();
        let mut applier = ThreadedTextureApplier::new(cpu.clone(), 1).expect("workers");
        let tickets: Vec<ApplyTicket> = (1..=3).map(|v| applier.apply(snapshot(v))).collect();

        drop(applier);

        for ticket in tickets {
            assert!(ticket.try_complete().is_some(), "no ticket left pending");
        }
        assert_eq!(cpu.live_resources(), 0);
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(matches!(
            ThreadedTextureApplier::new(CpuTextureBackend::default(), 0),
            Err(ApplierError::NoWorkers)
        ));
    }
}
