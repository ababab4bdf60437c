use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    Name,
    Credential,
    Context,
}

/// Counts every handle the loopback mechanism hands out and every release of one
#[derive(Debug, Default)]
pub struct Ledger {
    names: Counter,
    credentials: Counter,
    contexts: Counter,
}
impl Ledger {
    fn counter(&self, resource: Resource) -> &Counter {
        match resource {
            Resource::Name => &self.names,
            Resource::Credential => &self.credentials,
            Resource::Context => &self.contexts,
        }
    }
    pub fn created(&self, resource: Resource) -> usize {
        self.counter(resource).created.load(Ordering::SeqCst)
    }
    pub fn released(&self, resource: Resource) -> usize {
        self.counter(resource).released.load(Ordering::SeqCst)
    }
    /// Handles created and not yet released
    pub fn live(&self, resource: Resource) -> usize {
        // Releases never outrun creations, so reading them first keeps the difference positive
        let released = self.released(resource);
        self.created(resource).saturating_sub(released)
    }
    pub fn live_names(&self) -> usize {
        self.live(Resource::Name)
    }
    pub fn live_credentials(&self) -> usize {
        self.live(Resource::Credential)
    }
    pub fn live_contexts(&self) -> usize {
        self.live(Resource::Context)
    }
    pub fn live_total(&self) -> usize {
        self.live_names() + self.live_credentials() + self.live_contexts()
    }
}

#[derive(Debug, Default)]
struct Counter {
    created: AtomicUsize,
    released: AtomicUsize,
}

/// Ledger entry owned by a handle, released with it
#[derive(Debug)]
pub(super) struct Tracked {
    ledger: Arc<Ledger>,
    resource: Resource,
}
impl Tracked {
    pub(super) fn new(ledger: &Arc<Ledger>, resource: Resource) -> Self {
        ledger.counter(resource).created.fetch_add(1, Ordering::SeqCst);
        Self {
            ledger: Arc::clone(ledger),
            resource,
        }
    }
}
impl Drop for Tracked {
    fn drop(&mut self) {
        self.ledger.counter(self.resource).released.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_each_release_once() {
        let ledger = Arc::new(Ledger::default());
        let a = Tracked::new(&ledger, Resource::Name);
        let b = Tracked::new(&ledger, Resource::Context);
        assert_eq!(ledger.live_total(), 2);
        drop(a);
        assert_eq!(ledger.live_names(), 0);
        assert_eq!(ledger.released(Resource::Name), 1);
        drop(b);
        assert_eq!(ledger.live_total(), 0);
        assert_eq!(ledger.created(Resource::Context), ledger.released(Resource::Context));
    }

    #[test]
    fn live_counts_stay_sane_under_churn() {
        let ledger = Arc::new(Ledger::default());
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    while !done.load(Ordering::Relaxed) {
                        drop(Tracked::new(&ledger, Resource::Name));
                    }
                })
            })
            .collect();
        // Reading while other threads create and release must never underflow
        for _ in 0..200_000 {
            std::hint::black_box(ledger.live_names());
        }
        done.store(true, Ordering::Relaxed);
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(ledger.live_names(), 0);
    }
}
