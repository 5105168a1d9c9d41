//! One-Way Delay Measurement
//! 
//! Runs eCPRI delay measurement exchanges with the peer node. The initiator opens
//! one exchange at a time with the configured method; both ends answer whatever
//! the peer sends and record a sample for every completed exchange:
//! 
//! `td = (t2 - tcv2) - (t1 + tcv1)`
//! 
//! where `t1`/`tcv1` belong to the request sender and `t2`/`tcv2` to the receiver.
//! Once enough samples are collected the first two are dropped and the rest are
//! averaged.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::codec::{ActionType, DelayMessage};
use crate::config::{DelayMeasurementConfig, MeasurementMethod};
use crate::stats::FronthaulStats;
use crate::timing::WallClock;
use crate::FronthaulError;

/// Samples left out of the average
const WARMUP_SAMPLES: usize = 2;

/// An unanswered exchange is abandoned after this long
const RESPONSE_TIMEOUT_NS: u64 = 100_000_000;

/// Progress of the current exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterState {
    /// Free to open the next exchange
    Ready,
    /// Request sent, waiting for the response
    AwaitResponse,
    /// Request with follow-up sent, follow-up goes out on the next poll
    FollowUpDue,
    /// Remote request sent, waiting for the peer's request
    AwaitRequest,
    /// Every sample collected
    Done,
}

/// Timestamps of a request this end sent
#[derive(Debug, Clone, Copy, Default)]
struct Origin {
    t1: u64,
    tcv1: u64,
}

/// Delay measurement state of one node
pub struct DelayMeter {
    settings: DelayMeasurementConfig,
    stats: Arc<FronthaulStats>,
    state: MeterState,
    measurement_id: u8,
    origin: Origin,
    /// Send time of the open exchange
    opened_ns: u64,
    /// Measurement id and arrival time of a request whose follow-up is pending
    follow_up: Option<(u8, u64)>,
    samples: Vec<i64>,
    average_ns: Option<i64>,
}

fn one_way_delay(origin: Origin, t2: u64, tcv2: u64) -> i64 {
    (t2 as i64 - tcv2 as i64) - (origin.t1 as i64 + origin.tcv1 as i64)
}

fn average(samples: &[i64]) -> i64 {
    let kept = if samples.len() > WARMUP_SAMPLES { &samples[WARMUP_SAMPLES..] } else { samples };
    if kept.is_empty() {
        return 0;
    }
    kept.iter().sum::<i64>() / kept.len() as i64
}

impl DelayMeter {
    pub fn new(settings: DelayMeasurementConfig, stats: Arc<FronthaulStats>) -> Self {
        let samples = Vec::with_capacity(settings.samples as usize);
        Self {
            measurement_id: settings.first_measurement_id,
            settings,
            stats,
            state: MeterState::Ready,
            origin: Origin::default(),
            opened_ns: 0,
            follow_up: None,
            samples,
            average_ns: None,
        }
    }

    pub fn state(&self) -> MeterState {
        self.state
    }

    /// Averaged delay once every sample is in
    pub fn average_ns(&self) -> Option<i64> {
        self.average_ns
    }

    pub fn samples(&self) -> &[i64] {
        &self.samples
    }

    fn encode(&self, message: DelayMessage) -> Bytes {
        self.stats.record_delay_tx();
        message.encode(self.settings.padding)
    }

    /// Messages the initiator sends at this point; nothing on the other end
    pub fn poll(&mut self, clock: &dyn WallClock) -> Vec<Bytes> {
        if !self.settings.initiator {
            return Vec::new();
        }
        let now = clock.now_ns();
        let id = self.measurement_id;
        match self.state {
            MeterState::Ready => {
                self.opened_ns = now;
                let (action, next) = match self.settings.method {
                    MeasurementMethod::Request => (ActionType::Request, MeterState::AwaitResponse),
                    MeasurementMethod::RequestWithFollowUp => {
                        (ActionType::RequestWithFollowUp, MeterState::FollowUpDue)
                    }
                    MeasurementMethod::RemoteRequest => (ActionType::RemoteRequest, MeterState::AwaitRequest),
                    MeasurementMethod::RemoteRequestWithFollowUp => {
                        (ActionType::RemoteRequestWithFollowUp, MeterState::AwaitRequest)
                    }
                };
                let mut message = DelayMessage::new(id, action);
                if action == ActionType::Request {
                    self.origin = Origin { t1: now, tcv1: clock.now_ns().saturating_sub(now) };
                    message = message.with_timestamp(self.origin.t1).with_compensation(self.origin.tcv1);
                } else if action == ActionType::RequestWithFollowUp {
                    self.origin = Origin { t1: now, tcv1: 0 };
                }
                let frame = self.encode(message);
                if action == ActionType::RequestWithFollowUp {
                    self.origin.tcv1 = clock.now_ns().saturating_sub(now);
                }
                self.state = next;
                debug!("Delay measurement {} opened with {:?}", id, action);
                vec![frame]
            }
            MeterState::FollowUpDue => {
                self.state = MeterState::AwaitResponse;
                let message = DelayMessage::new(id, ActionType::FollowUp)
                    .with_timestamp(self.origin.t1)
                    .with_compensation(self.origin.tcv1);
                vec![self.encode(message)]
            }
            MeterState::AwaitResponse | MeterState::AwaitRequest => {
                if now.saturating_sub(self.opened_ns) > RESPONSE_TIMEOUT_NS {
                    warn!("Delay measurement {} unanswered, starting over", id);
                    self.next_exchange();
                }
                Vec::new()
            }
            MeterState::Done => Vec::new(),
        }
    }

    /// Handle one received delay message and return the replies to send
    ///
    /// `rx_ns` is the wall-clock time the frame was taken off the wire.
    pub fn on_message(
        &mut self,
        frame: &[u8],
        rx_ns: u64,
        clock: &dyn WallClock,
    ) -> Result<Vec<Bytes>, FronthaulError> {
        let message = DelayMessage::decode(frame)?;
        self.stats.record_delay_rx();
        let id = message.measurement_id;
        let origin = Origin { t1: message.timestamp.as_ns(), tcv1: message.compensation_ns };

        match message.action {
            ActionType::Request => {
                let t2 = clock.now_ns();
                let tcv2 = t2.saturating_sub(rx_ns);
                let reply = self.respond(id, t2, tcv2);
                self.record(one_way_delay(origin, t2, tcv2));
                self.finish_remote();
                Ok(vec![reply])
            }
            ActionType::RequestWithFollowUp => {
                self.follow_up = Some((id, rx_ns));
                Ok(Vec::new())
            }
            ActionType::FollowUp => {
                let tr = match self.follow_up.take() {
                    Some((pending, tr)) if pending == id => tr,
                    _ => {
                        return Err(FronthaulError::InvalidState(format!(
                            "follow-up {} without a matching request",
                            id
                        )))
                    }
                };
                let t2 = clock.now_ns();
                let tcv2 = t2.saturating_sub(tr);
                let reply = self.respond(id, t2, tcv2);
                self.record(one_way_delay(origin, t2, tcv2));
                self.finish_remote();
                Ok(vec![reply])
            }
            ActionType::Response => {
                if self.state == MeterState::Done {
                    return Ok(Vec::new());
                }
                if self.state != MeterState::AwaitResponse || id != self.measurement_id {
                    return Err(FronthaulError::InvalidState(format!(
                        "response {} while {:?} on measurement {}",
                        id, self.state, self.measurement_id
                    )));
                }
                self.record(one_way_delay(self.origin, message.timestamp.as_ns(), message.compensation_ns));
                self.next_exchange();
                Ok(Vec::new())
            }
            ActionType::RemoteRequest => {
                let tcv1 = clock.now_ns().saturating_sub(rx_ns);
                self.open_for_peer(id, rx_ns, tcv1);
                let request = DelayMessage::new(id, ActionType::Request)
                    .with_timestamp(rx_ns)
                    .with_compensation(tcv1);
                Ok(vec![self.encode(request)])
            }
            ActionType::RemoteRequestWithFollowUp => {
                let request = self.encode(DelayMessage::new(id, ActionType::RequestWithFollowUp));
                let tcv1 = clock.now_ns().saturating_sub(rx_ns);
                self.open_for_peer(id, rx_ns, tcv1);
                let follow_up = DelayMessage::new(id, ActionType::FollowUp)
                    .with_timestamp(rx_ns)
                    .with_compensation(tcv1);
                Ok(vec![request, self.encode(follow_up)])
            }
        }
    }

    fn respond(&self, id: u8, t2: u64, tcv2: u64) -> Bytes {
        self.encode(DelayMessage::new(id, ActionType::Response).with_timestamp(t2).with_compensation(tcv2))
    }

    /// The peer asked for a request; this end waits for the response to it
    fn open_for_peer(&mut self, id: u8, t1: u64, tcv1: u64) {
        self.measurement_id = id;
        self.origin = Origin { t1, tcv1 };
        self.opened_ns = t1;
        if self.state != MeterState::Done {
            self.state = MeterState::AwaitResponse;
        }
    }

    /// A remote-request exchange this end opened is complete once it answered
    fn finish_remote(&mut self) {
        if self.state == MeterState::AwaitRequest {
            self.next_exchange();
        }
    }

    fn next_exchange(&mut self) {
        if self.state == MeterState::Done {
            return;
        }
        self.state = MeterState::Ready;
        if self.settings.initiator {
            self.measurement_id = self.measurement_id.wrapping_add(1);
        }
    }

    fn record(&mut self, sample: i64) {
        if self.state == MeterState::Done {
            return;
        }
        self.stats.record_delay_sample();
        self.samples.push(sample);
        debug!("Delay sample {}: {} ns", self.samples.len(), sample);
        if self.samples.len() >= self.settings.samples as usize {
            let avg = average(&self.samples);
            self.average_ns = Some(avg);
            self.stats.set_delay_average(avg);
            self.state = MeterState::Done;
            info!(
                "One-way delay {} ns over {} samples ({:?})",
                avg,
                self.samples.len().saturating_sub(WARMUP_SAMPLES),
                self.settings.method
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::ManualClock;

    const T0: u64 = 1_700_000_000 * 1_000_000_000;
    const LINK_NS: u64 = 5_000;
    const DWELL_NS: u64 = 300;

    fn meter(method: MeasurementMethod, initiator: bool, samples: u16) -> DelayMeter {
        let settings = DelayMeasurementConfig {
            enabled: true,
            initiator,
            method,
            samples,
            padding: 40,
            first_measurement_id: 0,
        };
        DelayMeter::new(settings, Arc::new(FronthaulStats::new()))
    }

    /// Carry frames over the link; each one sits `DWELL_NS` at the receiver
    fn carry(to: &mut DelayMeter, frames: Vec<Bytes>, clock: &ManualClock) -> Vec<Bytes> {
        let mut replies = Vec::new();
        for frame in frames {
            clock.advance(LINK_NS);
            let rx = clock.now_ns();
            clock.advance(DWELL_NS);
            replies.extend(to.on_message(&frame, rx, clock).unwrap());
        }
        replies
    }

    fn run(method: MeasurementMethod) -> (DelayMeter, DelayMeter) {
        let clock = ManualClock::new(T0);
        let mut du = meter(method, true, 10);
        let mut ru = meter(method, false, 10);
        for _ in 0..100 {
            let mut frames = du.poll(&clock);
            let mut toward_ru = true;
            while !frames.is_empty() {
                frames = if toward_ru { carry(&mut ru, frames, &clock) } else { carry(&mut du, frames, &clock) };
                toward_ru = !toward_ru;
            }
            clock.advance(1_000);
            if du.state() == MeterState::Done {
                break;
            }
        }
        (du, ru)
    }

    #[test]
    fn test_every_method_measures_link() {
        for method in [
            MeasurementMethod::Request,
            MeasurementMethod::RequestWithFollowUp,
            MeasurementMethod::RemoteRequest,
            MeasurementMethod::RemoteRequestWithFollowUp,
        ] {
            let (du, ru) = run(method);
            assert_eq!(du.state(), MeterState::Done, "{:?}", method);
            assert_eq!(du.average_ns(), Some(LINK_NS as i64), "{:?}", method);
            assert!(du.samples().iter().all(|s| *s == LINK_NS as i64), "{:?}", method);
            // The other end samples the same exchanges
            assert_eq!(ru.samples().len(), 10, "{:?}", method);
            assert_eq!(ru.average_ns(), Some(LINK_NS as i64), "{:?}", method);
        }
    }

    #[test]
    fn test_measurement_id_advances() {
        let clock = ManualClock::new(T0);
        let mut du = meter(MeasurementMethod::Request, true, 10);
        let mut ru = meter(MeasurementMethod::Request, false, 10);
        for expected in 0..3u8 {
            let frames = du.poll(&clock);
            assert_eq!(DelayMessage::decode(&frames[0]).unwrap().measurement_id, expected);
            let replies = carry(&mut ru, frames, &clock);
            assert!(carry(&mut du, replies, &clock).is_empty());
        }
        assert_eq!(du.stats.snapshot().delay_tx, 3);
        assert_eq!(du.stats.snapshot().delay_rx, 3);
        assert_eq!(du.stats.snapshot().delay_samples, 3);
    }

    #[test]
    fn test_average_skips_warmup() {
        assert_eq!(average(&[900, 800, 100, 200, 300]), 200);
        assert_eq!(average(&[10, 20]), 15);
        assert_eq!(average(&[]), 0);
    }

    #[test]
    fn test_stray_messages_rejected() {
        let clock = ManualClock::new(T0);
        let mut du = meter(MeasurementMethod::Request, true, 10);
        let response = DelayMessage::new(0, ActionType::Response).with_timestamp(T0).encode(40);
        // Nothing is outstanding yet
        assert!(du.on_message(&response, T0, &clock).is_err());

        du.poll(&clock);
        assert_eq!(du.state(), MeterState::AwaitResponse);
        let wrong = DelayMessage::new(9, ActionType::Response).with_timestamp(T0).encode(40);
        assert!(matches!(du.on_message(&wrong, T0, &clock), Err(FronthaulError::InvalidState(_))));
        assert_eq!(du.state(), MeterState::AwaitResponse);
        assert!(du.samples().is_empty());

        let mut ru = meter(MeasurementMethod::Request, false, 10);
        let follow_up = DelayMessage::new(4, ActionType::FollowUp).encode(40);
        assert!(ru.on_message(&follow_up, T0, &clock).is_err());
    }

    #[test]
    fn test_unanswered_exchange_restarts() {
        let clock = ManualClock::new(T0);
        let mut du = meter(MeasurementMethod::Request, true, 10);
        assert_eq!(du.poll(&clock).len(), 1);
        assert!(du.poll(&clock).is_empty());
        clock.advance(RESPONSE_TIMEOUT_NS + 1);
        assert!(du.poll(&clock).is_empty());
        assert_eq!(du.state(), MeterState::Ready);

        let frames = du.poll(&clock);
        assert_eq!(DelayMessage::decode(&frames[0]).unwrap().measurement_id, 1);
    }

    #[test]
    fn test_recipient_never_opens() {
        let clock = ManualClock::new(T0);
        let mut ru = meter(MeasurementMethod::RemoteRequest, false, 10);
        assert!(ru.poll(&clock).is_empty());
        assert_eq!(ru.state(), MeterState::Ready);
    }
}
