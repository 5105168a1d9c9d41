//! Fronthaul Engine
//! 
//! Wires the OTA clock, scheduler, codec workers, egress ring and reception
//! validator into the per-symbol loop of the real-time thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;

use common::types::{ChannelKey, Direction, SYMBOLS_PER_SLOT};
use interfaces::{PacketSink, PacketSource, PacketView};
use tracing::{debug, error, info, warn};

use crate::channel::ChannelLayout;
use crate::config::{CompressionConfig, FronthaulConfig};
use crate::delay::DelayMeter;
use crate::receiver::{ReceptionValidator, RxOutcome, SymbolDelivery};
use crate::scheduler::{egress_ring, EgressDispatcher, JobExecutor, TransmissionScheduler, TxJob};
use crate::section::SectionDatabase;
use crate::sequence::SequenceEngine;
use crate::stats::FronthaulStats;
use crate::timing::{OtaClock, OtaPosition, WallClock};
use crate::worker::WorkerPool;
use crate::FronthaulError;

/// Frames handed to the validator per symbol before the loop moves on
const MAX_RX_PER_SYMBOL: usize = 4096;

/// What the upstream producer sees at a slot boundary
pub struct SlotContext<'a> {
    /// Slot whose section contexts should be built now
    pub build_slot: u64,
    /// OTA position of the boundary
    pub position: OtaPosition,
    pub layout: &'a ChannelLayout,
    pub db: &'a SectionDatabase,
    pub compression: &'a CompressionConfig,
}

impl SlotContext<'_> {
    /// Configured flows of one direction
    pub fn channels(&self, direction: Direction) -> impl Iterator<Item = ChannelKey> + '_ {
        self.layout.channels(direction)
    }
}

/// Upstream hooks: the slot build callback and received symbol delivery
pub trait SlotHandler: Send {
    /// Build the section contexts of `ctx.build_slot`
    fn on_slot(&mut self, ctx: SlotContext<'_>) -> Result<(), FronthaulError>;

    /// Every section received for one OTA symbol
    fn on_delivery(&mut self, _delivery: &SymbolDelivery) {}
}

/// Delay messages bypass the egress ring and go out immediately
fn send_delay<S: PacketSink>(sink: &S, stats: &FronthaulStats, frames: Vec<Bytes>) {
    for frame in frames {
        if let Err(e) = sink.transmit(PacketView::from_bytes(frame)) {
            stats.record_egress_error();
            warn!("Delay measurement message not sent: {}", e);
        }
    }
}

/// The per-symbol loop, owned by one thread
pub struct EngineCore<C: WallClock, S: PacketSink, R: PacketSource> {
    config: FronthaulConfig,
    layout: ChannelLayout,
    clock: OtaClock<C>,
    db: Arc<SectionDatabase>,
    scheduler: TransmissionScheduler,
    executor: Arc<JobExecutor>,
    workers: Option<WorkerPool>,
    dispatcher: EgressDispatcher,
    receiver: ReceptionValidator,
    delay: Option<DelayMeter>,
    sink: S,
    source: R,
    handler: Box<dyn SlotHandler>,
    stats: Arc<FronthaulStats>,
    stop: Arc<AtomicBool>,
    lead_slots: u64,
    next_build: Option<u64>,
    jobs: Vec<TxJob>,
    deliveries: Vec<SymbolDelivery>,
}

impl<C: WallClock, S: PacketSink, R: PacketSource> EngineCore<C, S, R> {
    pub fn new(
        config: FronthaulConfig,
        clock: C,
        sink: S,
        source: R,
        handler: Box<dyn SlotHandler>,
    ) -> Result<Self, FronthaulError> {
        config.validate()?;
        let scs = config.subcarrier_spacing()?;
        let layout = ChannelLayout::from_config(&config);
        let clock = OtaClock::new(clock, scs, config.clock.offset_ns(), config.clock.drift_policy);
        let timeline = clock.timeline();

        let db = Arc::new(SectionDatabase::new(
            &layout,
            config.section_db.ring_depth,
            config.section_db.max_sections,
        ));
        let sequences = Arc::new(SequenceEngine::new(&layout));
        let stats = Arc::new(FronthaulStats::new());
        let stop = Arc::new(AtomicBool::new(false));

        let scheduler = TransmissionScheduler::new(&config, &layout, timeline, db.clone(), stats.clone())?;
        let lead_slots = scheduler.budget().lead_slots();
        let horizon = config.section_db.ring_depth * SYMBOLS_PER_SLOT as usize;
        let (producer, dispatcher) = egress_ring(horizon, config.egress.queue_capacity, clock.cursor());
        let executor = Arc::new(JobExecutor::new(
            &config,
            &layout,
            db.clone(),
            sequences.clone(),
            producer,
            stats.clone(),
            scheduler.states(),
        ));
        let workers = if config.workers > 0 {
            Some(WorkerPool::spawn(
                config.workers,
                config.egress.worker_queue_capacity,
                executor.clone(),
                stop.clone(),
            )?)
        } else {
            None
        };
        let receiver = ReceptionValidator::new(&config, &layout, timeline, db.clone(), sequences, stats.clone());
        let delay = config
            .delay_measurement
            .enabled
            .then(|| DelayMeter::new(config.delay_measurement.clone(), stats.clone()));

        info!(
            "Fronthaul engine ready: role {:?}, {} flows, numerology {}, lead {} slots",
            config.role,
            layout.channel_count(),
            scs.numerology(),
            lead_slots
        );
        Ok(Self {
            config,
            layout,
            clock,
            db,
            scheduler,
            executor,
            workers,
            dispatcher,
            receiver,
            delay,
            sink,
            source,
            handler,
            stats,
            stop,
            lead_slots,
            next_build: None,
            jobs: Vec::new(),
            deliveries: Vec::new(),
        })
    }

    pub fn stats(&self) -> Arc<FronthaulStats> {
        self.stats.clone()
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn config(&self) -> &FronthaulConfig {
        &self.config
    }

    pub fn section_db(&self) -> &Arc<SectionDatabase> {
        &self.db
    }

    pub fn delay_meter(&self) -> Option<&DelayMeter> {
        self.delay.as_ref()
    }

    /// Align the clock to the next symbol boundary without waiting for it
    pub fn start(&mut self) -> OtaPosition {
        self.clock.start()
    }

    /// Advance one OTA symbol
    pub fn step(&mut self) -> Result<OtaPosition, FronthaulError> {
        let position = self.clock.tick()?;
        let now = position.abs_symbol;
        self.stats.set_drift(self.clock.missed_symbols(), self.clock.missed_slots());

        self.dispatcher.drain(now, &self.sink, &self.stats);
        self.build_ahead(position);

        self.jobs.clear();
        let planned = self.scheduler.plan(now, &mut self.jobs);
        for job in &self.jobs {
            match &self.workers {
                Some(pool) => {
                    if let Err(e) = pool.submit(*job) {
                        self.stats.record_capacity();
                        warn!("Job for {:?} {:?} not queued: {}", job.key, job.plane, e);
                    }
                }
                None => self.executor.dispatch(job),
            }
        }
        planned?;
        if let Some(fault) = self.executor.take_fault() {
            error!("Transmission fault at symbol {}: {}", now, fault);
            return Err(fault);
        }

        for _ in 0..MAX_RX_PER_SYMBOL {
            let Some(frame) = self.source.poll_receive() else {
                break;
            };
            match self.receiver.process(frame.clone(), now, &mut self.deliveries) {
                Ok(RxOutcome::DelayMeasurement) => self.measure_delay(&frame),
                Ok(_) => {}
                Err(e) if !e.is_corrupt_packet() => warn!("Reception failed at symbol {}: {}", now, e),
                Err(_) => {}
            }
        }
        if let Some(meter) = self.delay.as_mut() {
            let frames = meter.poll(self.clock.wall_clock());
            send_delay(&self.sink, &self.stats, frames);
        }
        self.receiver.poll_deadlines(now, &mut self.deliveries);
        for delivery in self.deliveries.drain(..) {
            self.handler.on_delivery(&delivery);
        }

        if position.symbol_in_second == 0 {
            self.stats.roll_second();
        }
        Ok(position)
    }

    fn measure_delay(&mut self, frame: &[u8]) {
        let Some(meter) = self.delay.as_mut() else {
            debug!("Delay measurement disabled, message ignored");
            return;
        };
        let clock = self.clock.wall_clock();
        match meter.on_message(frame, clock.now_ns(), clock) {
            Ok(replies) => send_delay(&self.sink, &self.stats, replies),
            Err(e) => warn!("Delay measurement message dropped: {}", e),
        }
    }

    /// Call the slot hook for every slot up to `lead_slots` ahead not yet built
    fn build_ahead(&mut self, position: OtaPosition) {
        let current = position.abs_slot();
        let mut next = self.next_build.unwrap_or(current + 1).max(current + 1);
        while next <= current + self.lead_slots {
            let ctx = SlotContext {
                build_slot: next,
                position,
                layout: &self.layout,
                db: &self.db,
                compression: &self.config.compression,
            };
            if let Err(e) = self.handler.on_slot(ctx) {
                if matches!(e, FronthaulError::CapacityExceeded(_)) {
                    self.stats.record_capacity();
                }
                warn!("Slot {} build failed: {}", next, e);
            }
            next += 1;
        }
        self.next_build = Some(next);
    }

    /// Step until the stop flag is raised or a fatal fault occurs
    pub fn run(&mut self) -> Result<(), FronthaulError> {
        let position = self.start();
        debug!("Engine loop entered at symbol {}", position.abs_symbol);
        while !self.stop.load(Ordering::Acquire) {
            self.step()?;
        }
        info!("Engine loop stopped");
        Ok(())
    }

    /// Stop and join the codec workers
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(pool) = self.workers.take() {
            pool.shutdown();
        }
    }
}

/// Validated configuration, ready to start
pub struct FronthaulEngine {
    config: FronthaulConfig,
}

impl FronthaulEngine {
    pub fn new(config: FronthaulConfig) -> Result<Self, FronthaulError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FronthaulConfig {
        &self.config
    }

    /// Run the engine on its own real-time thread
    pub fn start<C, S, R>(
        self,
        clock: C,
        sink: S,
        source: R,
        handler: Box<dyn SlotHandler>,
    ) -> Result<EngineHandle, FronthaulError>
    where
        C: WallClock + 'static,
        S: PacketSink + 'static,
        R: PacketSource + 'static,
    {
        let mut core = EngineCore::new(self.config, clock, sink, source, handler)?;
        let stop = core.stop_flag();
        let stats = core.stats();
        let thread = std::thread::Builder::new()
            .name("fh-ota".into())
            .spawn(move || {
                let result = core.run();
                if let Err(e) = &result {
                    error!("Engine stopped on fault: {}", e);
                }
                core.shutdown();
                result
            })
            .map_err(|e| FronthaulError::InvalidState(format!("failed to spawn OTA thread: {}", e)))?;
        Ok(EngineHandle { stop, stats, thread: Some(thread) })
    }
}

/// Control of a running engine
pub struct EngineHandle {
    stop: Arc<AtomicBool>,
    stats: Arc<FronthaulStats>,
    thread: Option<JoinHandle<Result<(), FronthaulError>>>,
}

impl EngineHandle {
    pub fn stats(&self) -> Arc<FronthaulStats> {
        self.stats.clone()
    }

    /// Whether the real-time thread is still running
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Raise the stop flag and wait for the real-time thread
    pub fn stop(mut self) -> Result<(), FronthaulError> {
        self.stop.store(true, Ordering::Release);
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| FronthaulError::InvalidState("OTA thread panicked".into()))?,
            None => Ok(()),
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
