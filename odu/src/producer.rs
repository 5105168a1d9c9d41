//! Sample Slot Producer
//! 
//! Stands in for the upper PHY: every slot it fills the section database with
//! random downlink IQ, compressed into one shared buffer per antenna, and with
//! full-carrier uplink sections for the PUSCH, PRACH and SRS flows.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use common::types::{ChannelClass, ChannelKey, Direction, SUBCARRIERS_PER_PRB, SYMBOLS_PER_SLOT};
use common::utils::fft_size_for_prbs;
use fronthaul::codec::compression::{compress, CompressionParams};
use fronthaul::config::{CompressionSetting, FronthaulConfig, Role};
use fronthaul::receiver::SymbolDelivery;
use fronthaul::section::{SectionDescriptor, Type3Params};
use fronthaul::{FronthaulError, SlotContext, SlotHandler};
use interfaces::SharedPayload;
use num_complex::Complex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, trace};

/// PRBs of one PRACH occasion
const PRACH_PRBS: u16 = 12;
/// Symbols of one PRACH occasion
const PRACH_SYMBOLS: u8 = 12;

/// Counters shared with the reporting task
#[derive(Debug, Default)]
pub struct ProducerCounters {
    slots_built: AtomicU64,
    sections_built: AtomicU64,
    buffers_released: AtomicU64,
    symbols_complete: AtomicU64,
    symbols_partial: AtomicU64,
    sections_received: AtomicU64,
    iq_bytes_received: AtomicU64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ProducerSnapshot {
    pub slots_built: u64,
    pub sections_built: u64,
    pub buffers_released: u64,
    pub symbols_complete: u64,
    pub symbols_partial: u64,
    pub sections_received: u64,
    pub iq_bytes_received: u64,
}

impl ProducerCounters {
    pub fn snapshot(&self) -> ProducerSnapshot {
        ProducerSnapshot {
            slots_built: self.slots_built.load(Ordering::Relaxed),
            sections_built: self.sections_built.load(Ordering::Relaxed),
            buffers_released: self.buffers_released.load(Ordering::Relaxed),
            symbols_complete: self.symbols_complete.load(Ordering::Relaxed),
            symbols_partial: self.symbols_partial.load(Ordering::Relaxed),
            sections_received: self.sections_received.load(Ordering::Relaxed),
            iq_bytes_received: self.iq_bytes_received.load(Ordering::Relaxed),
        }
    }
}

fn params(setting: CompressionSetting) -> CompressionParams {
    CompressionParams::new(setting.method, setting.iq_width).with_scaler(setting.mod_comp_scaler)
}

/// Slot handler of the sample application
///
/// A DU builds traffic; an RU only consumes what it receives, its uplink sections
/// come from the DU's C-plane.
pub struct SampleProducer {
    role: Role,
    srs_symbol_mask: u16,
    numerology: u8,
    rng: StdRng,
    samples: Vec<Complex<i16>>,
    counters: Arc<ProducerCounters>,
}

impl SampleProducer {
    pub fn new(config: &FronthaulConfig, seed: u64) -> Result<Self, FronthaulError> {
        Ok(Self {
            role: config.role,
            srs_symbol_mask: config.srs.symbol_mask,
            numerology: config.subcarrier_spacing()?.numerology(),
            rng: StdRng::seed_from_u64(seed),
            samples: Vec::new(),
            counters: Arc::new(ProducerCounters::default()),
        })
    }

    pub fn counters(&self) -> Arc<ProducerCounters> {
        self.counters.clone()
    }

    /// Random samples at roughly a quarter of full scale
    fn fill_samples(&mut self, prbs: u16) {
        let count = prbs as usize * SUBCARRIERS_PER_PRB;
        self.samples.clear();
        for _ in 0..count {
            self.samples.push(Complex::new(
                self.rng.gen_range(-8192..=8192),
                self.rng.gen_range(-8192..=8192),
            ));
        }
    }

    fn build_downlink(&mut self, ctx: &SlotContext<'_>, key: ChannelKey) -> Result<usize, FronthaulError> {
        let prbs = ctx
            .layout
            .prbs(Direction::Downlink, key.carrier)
            .ok_or_else(|| FronthaulError::InvalidState(format!("no carrier {}", key.carrier)))?;
        let params = params(ctx.compression.pdsch);
        let mut iq = BytesMut::with_capacity(params.payload_len(prbs) * SYMBOLS_PER_SLOT as usize);
        let mut section = SectionDescriptor::new(1, Direction::Downlink, 0, prbs, 0, SYMBOLS_PER_SLOT as u8)
            .with_compression(params);
        for symbol in 0..SYMBOLS_PER_SLOT as u8 {
            self.fill_samples(prbs);
            let offset = iq.len();
            compress(&params, &self.samples, &mut iq)?;
            section = section.with_symbol_payload(symbol, offset, iq.len() - offset);
        }

        let counters = self.counters.clone();
        let payload = SharedPayload::with_completion(iq.freeze(), move || {
            counters.buffers_released.fetch_add(1, Ordering::Relaxed);
        });
        let mut builder = ctx.db.build(key, ctx.build_slot)?;
        builder.attach_payload(payload);
        builder.add_section(section)?;
        Ok(builder.len())
    }

    fn build_uplink(&self, ctx: &SlotContext<'_>, key: ChannelKey) -> Result<usize, FronthaulError> {
        let prbs = ctx
            .layout
            .prbs(Direction::Uplink, key.carrier)
            .ok_or_else(|| FronthaulError::InvalidState(format!("no carrier {}", key.carrier)))?;
        let mut builder = ctx.db.build(key, ctx.build_slot)?;
        match ctx.layout.channel_class(key) {
            ChannelClass::Prach => {
                let count = PRACH_PRBS.min(prbs);
                let type3 = Type3Params {
                    time_offset: 0,
                    fft_size: fft_size_for_prbs(prbs),
                    numerology: self.numerology,
                    cp_length: 0,
                };
                // Occasion centred on the carrier, in half subcarriers from its centre
                let freq_offset = -(count as i32 * SUBCARRIERS_PER_PRB as i32);
                let start = (prbs - count) / 2;
                builder.add_section(
                    SectionDescriptor::new(1, Direction::Uplink, start, count, 0, PRACH_SYMBOLS)
                        .with_compression(params(ctx.compression.prach))
                        .with_prach(type3, freq_offset),
                )?;
            }
            ChannelClass::Srs => {
                for symbol in 0..SYMBOLS_PER_SLOT as u8 {
                    if self.srs_symbol_mask & (1 << symbol) != 0 {
                        builder.add_section(
                            SectionDescriptor::new(symbol as u16 + 1, Direction::Uplink, 0, prbs, symbol, 1)
                                .with_compression(params(ctx.compression.srs)),
                        )?;
                    }
                }
            }
            _ => {
                builder.add_section(
                    SectionDescriptor::new(1, Direction::Uplink, 0, prbs, 0, SYMBOLS_PER_SLOT as u8)
                        .with_compression(params(ctx.compression.pusch)),
                )?;
            }
        }
        Ok(builder.len())
    }
}

impl SlotHandler for SampleProducer {
    fn on_slot(&mut self, ctx: SlotContext<'_>) -> Result<(), FronthaulError> {
        if self.role == Role::Ru {
            return Ok(());
        }
        let mut sections = 0;
        for key in ctx.channels(Direction::Downlink) {
            sections += self.build_downlink(&ctx, key)?;
        }
        for key in ctx.channels(Direction::Uplink) {
            sections += self.build_uplink(&ctx, key)?;
        }
        self.counters.slots_built.fetch_add(1, Ordering::Relaxed);
        self.counters.sections_built.fetch_add(sections as u64, Ordering::Relaxed);
        trace!("Slot {} built with {} sections", ctx.build_slot, sections);
        Ok(())
    }

    fn on_delivery(&mut self, delivery: &SymbolDelivery) {
        let counter = if delivery.complete {
            &self.counters.symbols_complete
        } else {
            &self.counters.symbols_partial
        };
        counter.fetch_add(1, Ordering::Relaxed);
        let bytes: usize = delivery.sections.iter().map(|s| s.iq.len()).sum();
        self.counters
            .sections_received
            .fetch_add(delivery.sections.len() as u64, Ordering::Relaxed);
        self.counters.iq_bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        if !delivery.complete {
            debug!(
                "{:?} symbol {} incomplete: {} of {} sections",
                delivery.direction,
                delivery.position.abs_symbol,
                delivery.sections.len(),
                delivery.expected
            );
        }
    }
}
