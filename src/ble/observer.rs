/// Owns the active `BleAdapter`, the shared cache/batch pair, and the two
/// threads that drive them: one reading events off the adapter, one flushing
/// batches on a timer.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::cache::{AdvertBatch, AdvertCache, BATCH_CAPACITY};
use super::BleAdapter;
use crate::proto::{encode_raw_advertisements_response, RawAdvertisement, MSG_BLUETOOTH_LE_RAW_ADVERTISEMENTS_RESPONSE};
use crate::server::Server;

/// How often the system-bus adapter's batch is flushed even if not full.
pub const FLUSH_INTERVAL_BLUEZ: Duration = Duration::from_secs(10);
/// How often the raw-HCI-style adapter's batch is flushed — much tighter,
/// since `btleplug` can report bursts of advertisements quickly.
pub const FLUSH_INTERVAL_HCI: Duration = Duration::from_millis(100);

const EVENT_POLL_TIMEOUT: Duration = Duration::from_millis(250);
/// Upper bound on one batcher-thread sleep increment, so `stop()` never
/// waits longer than this to notice `running` went false (§5).
const BATCHER_SLEEP_STEP: Duration = Duration::from_millis(10);

/// The BLE advertisement observer. One instance per process, behind an
/// `Arc` shared between the owning component and the server's shutdown path.
pub struct Observer {
    adapter: Mutex<Box<dyn BleAdapter>>,
    cache: Mutex<AdvertCache>,
    enabled: AtomicBool,
    running: AtomicBool,
    flush_interval: Duration,
    /// Count of observations since the last flush; used to trigger an eager
    /// flush once it reaches `BATCH_CAPACITY`, so a burst of distinct MACs
    /// doesn't sit queued for a full `flush_interval` (§4.4's HCI-adapter
    /// eager-flush behavior, applied uniformly since it never hurts the
    /// slower system-bus cadence).
    pending_since_flush: AtomicUsize,
    threads: Mutex<Vec<JoinHandle<()>>>,
    server: Mutex<Weak<Server>>,
}

impl Observer {
    /// Builds the observer and starts its event and batcher threads
    /// immediately — a single lifetime pair of threads, mirroring the
    /// original's one flush timer created once at init. They idle (the event
    /// thread sleeps, the batcher thread never ticks) while `enabled` is
    /// false, and exit for good once `stop()` flips `running` false.
    pub fn new(adapter: Box<dyn BleAdapter>, flush_interval: Duration) -> Arc<Self> {
        let observer = Arc::new(Observer {
            adapter: Mutex::new(adapter),
            cache: Mutex::new(AdvertCache::new()),
            enabled: AtomicBool::new(false),
            running: AtomicBool::new(true),
            pending_since_flush: AtomicUsize::new(0),
            flush_interval,
            threads: Mutex::new(Vec::new()),
            server: Mutex::new(Weak::new()),
        });

        let event_self = Arc::clone(&observer);
        let event_handle = std::thread::spawn(move || event_self.run_event_loop());
        let batch_self = Arc::clone(&observer);
        let batch_handle = std::thread::spawn(move || batch_self.run_batcher_loop());
        *observer.threads.lock().unwrap() = vec![event_handle, batch_handle];

        observer
    }

    pub fn attach_server(&self, server: Weak<Server>) {
        *self.server.lock().unwrap() = server;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Turns scanning on, starting the adapter. Idempotent. The event and
    /// batcher threads are already running (idle) from construction; they
    /// pick up `enabled` on their next loop iteration.
    pub fn enable(&self) {
        if self.enabled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.adapter.lock().unwrap().start() {
            log::error!("BLE adapter failed to start: {e}");
            self.enabled.store(false, Ordering::SeqCst);
        }
    }

    /// Turns scanning off and stops forwarding batches immediately (§4.4:
    /// unsubscribe stops the scanner, it does not leave the last-known cache
    /// draining out over the staleness window). The event and batcher
    /// threads keep running, idle, until `stop()` joins them.
    pub fn disable(&self) {
        if !self.enabled.swap(false, Ordering::SeqCst) {
            return;
        }
        self.adapter.lock().unwrap().stop();
        self.pending_since_flush.store(0, Ordering::SeqCst);
    }

    fn run_event_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            if !self.enabled.load(Ordering::SeqCst) {
                std::thread::sleep(EVENT_POLL_TIMEOUT);
                continue;
            }
            let event = self.adapter.lock().unwrap().next_event(EVENT_POLL_TIMEOUT);
            let Some(record) = event else { continue };
            self.cache.lock().unwrap().observe(record, Instant::now());
            if self.pending_since_flush.fetch_add(1, Ordering::SeqCst) + 1 >= BATCH_CAPACITY {
                self.tick();
            }
        }
    }

    /// Sleeps in increments no longer than `BATCHER_SLEEP_STEP` rather than
    /// one long `sleep(flush_interval)`, so shutdown latency is bounded
    /// regardless of how long the configured flush interval is (§5).
    fn run_batcher_loop(self: Arc<Self>) {
        let mut elapsed = Duration::ZERO;
        while self.running.load(Ordering::SeqCst) {
            let step = BATCHER_SLEEP_STEP.min(self.flush_interval.saturating_sub(elapsed));
            std::thread::sleep(step);
            elapsed += step;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if elapsed >= self.flush_interval {
                if self.enabled.load(Ordering::SeqCst) {
                    self.tick();
                }
                elapsed = Duration::ZERO;
            }
        }
    }

    /// One flush cycle (§4.4): prune stale entries, then copy every
    /// still-valid cache entry into batches of up to `BATCH_CAPACITY`,
    /// broadcasting each batch as it fills so a tick with more than
    /// `BATCH_CAPACITY` live entries emits multiple batches rather than
    /// truncating.
    fn tick(&self) {
        self.pending_since_flush.store(0, Ordering::SeqCst);
        let records = {
            let mut cache = self.cache.lock().unwrap();
            cache.prune_stale(Instant::now());
            cache.snapshot()
        };
        if records.is_empty() {
            return;
        }

        let mut batch = AdvertBatch::new();
        for record in records {
            if batch.push(record) {
                self.broadcast_batch(batch.drain());
            }
        }
        if !batch.is_empty() {
            self.broadcast_batch(batch.drain());
        }
    }

    /// Encodes one drained batch and broadcasts it as
    /// `BluetoothLERawAdvertisementsResponse`.
    fn broadcast_batch(&self, records: Vec<super::AdvertRecord>) {
        let advs: Vec<RawAdvertisement> = records
            .into_iter()
            .map(|r| RawAdvertisement { address: r.address, rssi: r.rssi, address_type: r.address_type, data: r.data })
            .collect();
        let payload = encode_raw_advertisements_response(&advs);

        if let Some(server) = self.server.lock().unwrap().upgrade() {
            server.broadcast(MSG_BLUETOOTH_LE_RAW_ADVERTISEMENTS_RESPONSE, &payload);
        }
    }

    /// Full shutdown: disables scanning and joins every thread this observer
    /// spawned. Called once from the server's shutdown sequence.
    pub fn stop(&self) {
        self.disable();
        self.running.store(false, Ordering::SeqCst);
        for handle in self.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}
