//! Mux scan scheduling.
//!
//! Every adapter gets a periodic tick that decides what its tuner should be
//! doing when nobody is subscribed.
//!
//! # How It Works
//!
//! On each tick, in order:
//! 1. No muxes at all: power off the frontend.
//! 2. Services with subscribers are attached: leave the tuner alone.
//! 3. A mux waits for its initial scan: tune it.
//! 4. An EPG dwell just ran: end it. Otherwise, if the EPG grabber wants a
//!    mux, tune it and stretch the next tick to the dwell time.
//! 5. Idle scanning is enabled: tune the head of the next non-empty scan
//!    bucket, round-robin.
//! 6. Nothing to do: release the current mux and stop the hardware.

use std::fmt;
use std::time::Duration;

use log::debug;

use crate::adapter::{Adapter, MuxId};
use crate::collaborators::Collaborators;

/// Tick period when nothing asks for longer.
pub const DEFAULT_SCAN_PERIOD: Duration = Duration::from_secs(20);

/// Delay before the first tick after startup.
pub const FIRST_SCAN_DELAY: Duration = Duration::from_secs(1);

/// Why a mux got tuned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanReason {
    InitialScan,
    Epg,
    Autoscan,
}

impl ScanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanReason::InitialScan => "Initial autoscan",
            ScanReason::Epg => "EPG scan",
            ScanReason::Autoscan => "Autoscan",
        }
    }
}

impl fmt::Display for ScanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanAction {
    /// Placeholder adapter; the timer ends.
    NoHardware,
    /// The adapter has no muxes.
    PoweredOff,
    /// Subscribers hold the tuner.
    InUse,
    Tuned { mux: MuxId, reason: ScanReason },
    /// The mux was unknown or the tuner refused it.
    TuneFailed { mux: MuxId, reason: ScanReason },
    /// The current mux was released and the hardware stopped.
    Stopped(MuxId),
    Idle,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    /// Delay until the next tick; `None` ends the timer.
    pub rearm: Option<Duration>,
    pub action: ScanAction,
}

/// Run one scheduling tick for `adapter`.
///
/// The caller holds the registry control lock.
pub fn tick(adapter: &mut Adapter, collab: &Collaborators, period: Duration) -> TickOutcome {
    if !adapter.is_present() {
        return TickOutcome {
            rearm: None,
            action: ScanAction::NoHardware,
        };
    }

    let mut rearm = period;
    let action = decide(adapter, collab, period, &mut rearm);
    debug!("Adapter \"{}\": scan tick: {:?}", adapter.display_name(), action);

    TickOutcome {
        rearm: Some(rearm),
        action,
    }
}

fn decide(
    adapter: &mut Adapter,
    collab: &Collaborators,
    period: Duration,
    rearm: &mut Duration,
) -> ScanAction {
    if adapter.muxes.is_empty() {
        adapter.power_off();
        return ScanAction::PoweredOff;
    }

    if adapter.subscription_weight() > 0 {
        return ScanAction::InUse;
    }

    if let Some(id) = adapter.queues.initial_head().cloned() {
        return tune(adapter, id, ScanReason::InitialScan, collab);
    }

    if let Some(epg) = adapter.epg_mux.take() {
        collab.epg.stop_mux(&epg, true);
    } else if let Some(id) = collab.epg.next_mux(adapter) {
        let action = tune(adapter, id.clone(), ScanReason::Epg, collab);
        if let ScanAction::Tuned { .. } = action {
            let dwell = collab.epg.period(&id);
            if dwell > period {
                *rearm = dwell;
            }
            adapter.epg_mux = Some(id);
        }
        return action;
    }

    if adapter.config.idlescan {
        if let Some(id) = adapter.queues.next_round_robin() {
            return tune(adapter, id, ScanReason::Autoscan, collab);
        }
    }

    match adapter.current_mux() {
        Some(current) => {
            adapter.stop_mux(&current, false, collab);
            ScanAction::Stopped(current)
        }
        None => ScanAction::Idle,
    }
}

fn tune(adapter: &mut Adapter, id: MuxId, reason: ScanReason, collab: &Collaborators) -> ScanAction {
    if adapter.tune(&id, reason.as_str(), collab) {
        ScanAction::Tuned { mux: id, reason }
    } else {
        ScanAction::TuneFailed { mux: id, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::*;
    use crate::adapter::{Mux, QueueSlot};
    use crate::collaborators::{EpgGrabber, MuxTuner, Service};
    use std::io;
    use dvbadapter_protocol::{DeliverySystem, TuningParams};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const SCAN_BUCKETS: usize = crate::adapter::SCAN_QUEUE_COUNT;

    struct Watched {
        mux: MuxId,
        weight: u32,
    }

    impl Service for Watched {
        fn name(&self) -> &str {
            "watched"
        }

        fn mux(&self) -> &MuxId {
            &self.mux
        }

        fn weight(&self) -> u32 {
            self.weight
        }

        fn recv_packet(&self, _packet: &[u8]) {}
    }

    /// Hands out one queued mux per call.
    #[derive(Default)]
    struct QueuedEpg {
        queue: Mutex<Vec<MuxId>>,
        dwell: Duration,
        stopped: Mutex<Vec<(MuxId, bool)>>,
        asked: AtomicUsize,
    }

    impl EpgGrabber for QueuedEpg {
        fn next_mux(&self, _adapter: &Adapter) -> Option<MuxId> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.queue.lock().unwrap().pop()
        }

        fn period(&self, _mux: &MuxId) -> Duration {
            self.dwell
        }

        fn stop_mux(&self, mux: &MuxId, timeout: bool) {
            self.stopped.lock().unwrap().push((mux.clone(), timeout));
        }
    }

    struct RefusingTuner;

    impl MuxTuner for RefusingTuner {
        fn tune(&self, _adapter: &Adapter, _mux: &Mux, _reason: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "no signal"))
        }
    }

    fn add(a: &mut Adapter, freq: u32, initial: bool) -> MuxId {
        let mux = Mux::new(&a.identifier, TuningParams::new(freq));
        let id = mux.id.clone();
        a.insert_mux(mux, initial);
        id
    }

    #[test]
    fn test_placeholder_ends_timer() {
        let hw = FakeHardware::new();
        let mut a = Adapter::placeholder("gone", DeliverySystem::Ofdm, hw);
        let out = tick(&mut a, &Collaborators::default(), DEFAULT_SCAN_PERIOD);
        assert_eq!(out.rearm, None);
        assert_eq!(out.action, ScanAction::NoHardware);
    }

    #[test]
    fn test_no_muxes_powers_off() {
        let hw = FakeHardware::new();
        let mut a = adapter(&hw, DeliverySystem::Qpsk);
        a.config.poweroff = true;
        a.start();

        let out = tick(&mut a, &Collaborators::default(), DEFAULT_SCAN_PERIOD);
        assert_eq!(out.action, ScanAction::PoweredOff);
        assert_eq!(out.rearm, Some(DEFAULT_SCAN_PERIOD));
        assert_eq!(hw.voltage_offs.load(Ordering::SeqCst), 1);
        a.stop();
    }

    #[test]
    fn test_subscribers_short_circuit() {
        let hw = FakeHardware::new();
        let mut a = adapter(&hw, DeliverySystem::Ofdm);
        let m1 = add(&mut a, 506_000_000, true);
        a.attach_service(Arc::new(Watched {
            mux: m1.clone(),
            weight: 100,
        }));
        let epg = Arc::new(QueuedEpg::default());
        let collab = Collaborators {
            epg: epg.clone(),
            ..Collaborators::default()
        };

        let out = tick(&mut a, &collab, DEFAULT_SCAN_PERIOD);
        assert_eq!(out.action, ScanAction::InUse);
        assert_eq!(out.rearm, Some(DEFAULT_SCAN_PERIOD));
        // Nothing was touched.
        assert_eq!(a.queues.slot_of(&m1), Some(QueueSlot::Initial));
        assert_eq!(a.current_mux(), None);
        assert_eq!(epg.asked.load(Ordering::SeqCst), 0);
        assert!(!a.is_started());
    }

    #[test]
    fn test_priority_order() {
        let hw = FakeHardware::new();
        let mut a = adapter(&hw, DeliverySystem::Ofdm);
        let initial = add(&mut a, 506_000_000, true);
        let idle = add(&mut a, 514_000_000, false);
        let for_epg = add(&mut a, 522_000_000, false);

        let epg = Arc::new(QueuedEpg {
            queue: Mutex::new(vec![for_epg.clone()]),
            dwell: Duration::from_secs(60),
            ..Default::default()
        });
        let collab = Collaborators {
            epg: epg.clone(),
            ..Collaborators::default()
        };

        // Initial scan wins over EPG and idle scan.
        let out = tick(&mut a, &collab, DEFAULT_SCAN_PERIOD);
        assert_eq!(
            out.action,
            ScanAction::Tuned {
                mux: initial.clone(),
                reason: ScanReason::InitialScan
            }
        );
        assert_eq!(epg.asked.load(Ordering::SeqCst), 0);

        // EPG next, with its longer dwell.
        let out = tick(&mut a, &collab, DEFAULT_SCAN_PERIOD);
        assert_eq!(
            out.action,
            ScanAction::Tuned {
                mux: for_epg.clone(),
                reason: ScanReason::Epg
            }
        );
        assert_eq!(out.rearm, Some(Duration::from_secs(60)));
        assert_eq!(a.epg_mux(), Some(&for_epg));

        // The EPG dwell ends and the same tick falls through to idle scan.
        let out = tick(&mut a, &collab, DEFAULT_SCAN_PERIOD);
        assert_eq!(*epg.stopped.lock().unwrap(), vec![(for_epg.clone(), true)]);
        assert_eq!(a.epg_mux(), None);
        assert_eq!(
            out.action,
            ScanAction::Tuned {
                mux: idle,
                reason: ScanReason::Autoscan
            }
        );
        assert_eq!(out.rearm, Some(DEFAULT_SCAN_PERIOD));
        a.stop();
    }

    #[test]
    fn test_short_epg_dwell_keeps_period() {
        let hw = FakeHardware::new();
        let mut a = adapter(&hw, DeliverySystem::Ofdm);
        let m1 = add(&mut a, 506_000_000, false);
        let epg = Arc::new(QueuedEpg {
            queue: Mutex::new(vec![m1]),
            dwell: Duration::from_secs(5),
            ..Default::default()
        });
        let collab = Collaborators {
            epg,
            ..Collaborators::default()
        };
        let out = tick(&mut a, &collab, DEFAULT_SCAN_PERIOD);
        assert_eq!(out.rearm, Some(DEFAULT_SCAN_PERIOD));
        a.stop();
    }

    #[test]
    fn test_idle_scan_round_robin() {
        let hw = FakeHardware::new();
        let mut a = adapter(&hw, DeliverySystem::Ofdm);
        let collab = Collaborators::default();

        // Two muxes in each bucket.
        let mut bucket_of = HashMap::new();
        for (i, freq) in [506u32, 514, 522, 530].iter().enumerate() {
            let mut mux = Mux::new(&a.identifier, TuningParams::new(freq * 1_000_000));
            let bucket = i % 2;
            mux.quality = if bucket == 0 { 100 } else { 50 };
            bucket_of.insert(mux.id.clone(), bucket);
            a.insert_mux(mux, false);
        }

        let start = a.queues.selector();
        let visited: Vec<usize> = (0..SCAN_BUCKETS)
            .map(|_| match tick(&mut a, &collab, DEFAULT_SCAN_PERIOD).action {
                ScanAction::Tuned {
                    mux,
                    reason: ScanReason::Autoscan,
                } => bucket_of[&mux],
                other => panic!("unexpected {:?}", other),
            })
            .collect();

        let expected: Vec<usize> = (1..=SCAN_BUCKETS).map(|i| (start + i) % SCAN_BUCKETS).collect();
        assert_eq!(visited, expected);
        a.stop();
    }

    #[test]
    fn test_idle_scan_disabled_releases_tuner() {
        let hw = FakeHardware::new();
        let mut a = adapter(&hw, DeliverySystem::Ofdm);
        a.config.idlescan = false;
        let m1 = add(&mut a, 506_000_000, true);
        let collab = Collaborators::default();

        let first = tick(&mut a, &collab, DEFAULT_SCAN_PERIOD);
        assert_eq!(
            first.action,
            ScanAction::Tuned {
                mux: m1.clone(),
                reason: ScanReason::InitialScan
            }
        );
        assert_eq!(a.current_mux(), Some(m1.clone()));
        assert!(a.is_started());

        let second = tick(&mut a, &collab, DEFAULT_SCAN_PERIOD);
        assert_eq!(second.action, ScanAction::Stopped(m1));
        assert_eq!(a.current_mux(), None);
        assert!(!a.is_started());

        let third = tick(&mut a, &collab, DEFAULT_SCAN_PERIOD);
        assert_eq!(third.action, ScanAction::Idle);
    }

    #[test]
    fn test_subscription_weight_saturates() {
        let hw = FakeHardware::new();
        let mut a = adapter(&hw, DeliverySystem::Ofdm);
        let m1 = add(&mut a, 506_000_000, true);
        for _ in 0..2 {
            a.attach_service(Arc::new(Watched {
                mux: m1.clone(),
                weight: u32::MAX / 2 + 1,
            }));
        }

        assert_eq!(a.subscription_weight(), u32::MAX);
        let out = tick(&mut a, &Collaborators::default(), DEFAULT_SCAN_PERIOD);
        assert_eq!(out.action, ScanAction::InUse);
        assert_eq!(out.rearm, Some(DEFAULT_SCAN_PERIOD));
    }

    #[test]
    fn test_failed_tune_is_reported() {
        let hw = FakeHardware::new();
        let mut a = adapter(&hw, DeliverySystem::Ofdm);
        let m1 = add(&mut a, 506_000_000, true);
        let collab = Collaborators {
            tuner: Arc::new(RefusingTuner),
            ..Collaborators::default()
        };

        let out = tick(&mut a, &collab, DEFAULT_SCAN_PERIOD);
        assert_eq!(
            out.action,
            ScanAction::TuneFailed {
                mux: m1.clone(),
                reason: ScanReason::InitialScan
            }
        );
        assert_eq!(a.current_mux(), None);
        assert_eq!(a.queues.slot_of(&m1), Some(QueueSlot::Bucket(0)));
        a.stop();
    }

    #[test]
    fn test_epg_mux_of_another_adapter_is_not_marked() {
        let hw = FakeHardware::new();
        let mut a = adapter(&hw, DeliverySystem::Ofdm);
        add(&mut a, 506_000_000, false);
        let foreign = MuxId::new("elsewhere_522000000");
        let epg = Arc::new(QueuedEpg {
            queue: Mutex::new(vec![foreign.clone()]),
            dwell: Duration::from_secs(60),
            ..Default::default()
        });
        let collab = Collaborators {
            epg: epg.clone(),
            ..Collaborators::default()
        };

        let out = tick(&mut a, &collab, DEFAULT_SCAN_PERIOD);
        assert_eq!(
            out.action,
            ScanAction::TuneFailed {
                mux: foreign,
                reason: ScanReason::Epg
            }
        );
        assert_eq!(out.rearm, Some(DEFAULT_SCAN_PERIOD));
        assert_eq!(a.epg_mux(), None);
        assert!(epg.stopped.lock().unwrap().is_empty());
    }
}
