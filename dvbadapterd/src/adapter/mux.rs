//! Muxes and the per-adapter scan queues.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

use dvbadapter_protocol::{MuxRecord, TuningParams};

/// Number of round-robin scan buckets per adapter.
pub const SCAN_QUEUE_COUNT: usize = 2;

/// Quality figure of a mux that tunes and demuxes without errors.
pub const QUALITY_GOOD: u8 = 100;

/// Identifier of a mux, unique within its adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MuxId(String);

impl MuxId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MuxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One tuning configuration owned by an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mux {
    pub id: MuxId,
    pub tuning: TuningParams,
    /// 0..=100, lowered by the quality monitor on errors.
    pub quality: u8,
    pub network: Option<String>,
    /// Service ids discovered on this mux.
    pub services: BTreeSet<u16>,
}

impl Mux {
    /// Create a mux for `adapter` with an identifier derived from its
    /// tuning parameters.
    pub fn new(adapter: &str, tuning: TuningParams) -> Self {
        Self {
            id: Self::derive_id(adapter, &tuning),
            tuning,
            quality: QUALITY_GOOD,
            network: None,
            services: BTreeSet::new(),
        }
    }

    /// `<adapter>_<frequency>[<polarisation>]`
    pub fn derive_id(adapter: &str, tuning: &TuningParams) -> MuxId {
        let mut id = format!("{}_{}", adapter, tuning.frequency);
        if let Some(pol) = tuning.polarisation {
            id.push(pol.code());
        }
        MuxId(id)
    }

    pub fn from_record(id: MuxId, record: MuxRecord) -> Self {
        Self {
            id,
            tuning: record.tuning,
            quality: record.quality.min(QUALITY_GOOD),
            network: record.network,
            services: record.services.into_iter().collect(),
        }
    }

    pub fn to_record(&self) -> MuxRecord {
        MuxRecord {
            tuning: self.tuning.clone(),
            quality: self.quality,
            network: self.network.clone(),
            services: self.services.iter().copied().collect(),
        }
    }

    /// Human readable name, as shown in status records.
    pub fn nice_name(&self, satellite: bool) -> String {
        let freq = if satellite {
            let mut s = format!("{} kHz", self.tuning.frequency);
            if let Some(pol) = self.tuning.polarisation {
                s.push(' ');
                s.push(pol.code());
            }
            s
        } else {
            format!("{:.3} MHz", self.tuning.frequency as f64 / 1_000_000.0)
        };

        match &self.network {
            Some(network) => format!("{}: {}", network, freq),
            None => freq,
        }
    }

    /// Scan bucket a stopped mux goes back into.
    pub fn requeue_bucket(&self, buckets: usize) -> usize {
        if self.quality >= QUALITY_GOOD || buckets < 2 {
            0
        } else {
            1
        }
    }
}

/// Which queue a mux currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSlot {
    Initial,
    Bucket(usize),
}

/// Per-adapter scan queues: one initial-scan FIFO plus N round-robin
/// buckets. A mux sits in at most one of them.
#[derive(Debug)]
pub struct ScanQueueSet {
    initial: VecDeque<MuxId>,
    buckets: Vec<VecDeque<MuxId>>,
    membership: HashMap<MuxId, QueueSlot>,
    selector: usize,
}

impl Default for ScanQueueSet {
    fn default() -> Self {
        Self::new(SCAN_QUEUE_COUNT)
    }
}

impl ScanQueueSet {
    pub fn new(buckets: usize) -> Self {
        let buckets = buckets.max(1);
        Self {
            initial: VecDeque::new(),
            buckets: (0..buckets).map(|_| VecDeque::new()).collect(),
            membership: HashMap::new(),
            selector: 0,
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Append to the initial-scan queue, leaving any previous queue.
    pub fn push_initial(&mut self, id: MuxId) {
        self.remove(&id);
        self.membership.insert(id.clone(), QueueSlot::Initial);
        self.initial.push_back(id);
    }

    /// Append to scan bucket `bucket` (taken modulo the bucket count),
    /// leaving any previous queue.
    pub fn push_bucket(&mut self, id: MuxId, bucket: usize) {
        let bucket = bucket % self.buckets.len();
        self.remove(&id);
        self.membership.insert(id.clone(), QueueSlot::Bucket(bucket));
        self.buckets[bucket].push_back(id);
    }

    /// Take a mux out of whatever queue holds it.
    pub fn remove(&mut self, id: &MuxId) -> Option<QueueSlot> {
        let slot = self.membership.remove(id)?;
        let queue = match slot {
            QueueSlot::Initial => &mut self.initial,
            QueueSlot::Bucket(b) => &mut self.buckets[b],
        };
        queue.retain(|m| m != id);
        Some(slot)
    }

    pub fn slot_of(&self, id: &MuxId) -> Option<QueueSlot> {
        self.membership.get(id).copied()
    }

    pub fn initial_head(&self) -> Option<&MuxId> {
        self.initial.front()
    }

    pub fn initial_len(&self) -> usize {
        self.initial.len()
    }

    pub fn bucket_len(&self, bucket: usize) -> usize {
        self.buckets.get(bucket).map_or(0, VecDeque::len)
    }

    /// Persisted round-robin cursor.
    pub fn selector(&self) -> usize {
        self.selector
    }

    pub fn set_selector(&mut self, selector: usize) {
        self.selector = selector % self.buckets.len();
    }

    /// Advance the cursor through the buckets and return the head of the
    /// first non-empty one. The cursor moves once per bucket inspected.
    pub fn next_round_robin(&mut self) -> Option<MuxId> {
        let n = self.buckets.len();
        for _ in 0..n {
            self.selector = (self.selector + 1) % n;
            if let Some(head) = self.buckets[self.selector].front() {
                return Some(head.clone());
            }
        }
        None
    }

    pub fn clear(&mut self) {
        self.initial.clear();
        self.buckets.iter_mut().for_each(VecDeque::clear);
        self.membership.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvbadapter_protocol::Polarisation;

    fn id(s: &str) -> MuxId {
        MuxId::new(s)
    }

    #[test]
    fn test_mux_identity_and_names() {
        let sat = Mux::new(
            "a0",
            TuningParams::new(12188000).with_polarisation(Polarisation::Horizontal),
        );
        assert_eq!(sat.id.as_str(), "a0_12188000H");
        assert_eq!(sat.nice_name(true), "12188000 kHz H");

        let mut terr = Mux::new("a0", TuningParams::new(506000000));
        assert_eq!(terr.id.as_str(), "a0_506000000");
        assert_eq!(terr.nice_name(false), "506.000 MHz");
        terr.network = Some("Freeview".to_string());
        assert_eq!(terr.nice_name(false), "Freeview: 506.000 MHz");
    }

    #[test]
    fn test_record_conversion_keeps_fields() {
        let mut mux = Mux::new("a0", TuningParams::new(474000000).with_symbol_rate(6900000));
        mux.quality = 80;
        mux.services.insert(0x1001);
        let back = Mux::from_record(mux.id.clone(), mux.to_record());
        assert_eq!(back, mux);
        assert_eq!(back.requeue_bucket(SCAN_QUEUE_COUNT), 1);
    }

    #[test]
    fn test_single_membership() {
        let mut q = ScanQueueSet::new(2);
        q.push_initial(id("m1"));
        assert_eq!(q.slot_of(&id("m1")), Some(QueueSlot::Initial));

        q.push_bucket(id("m1"), 1);
        assert_eq!(q.slot_of(&id("m1")), Some(QueueSlot::Bucket(1)));
        assert_eq!(q.initial_len(), 0);
        assert_eq!(q.bucket_len(1), 1);

        q.push_bucket(id("m1"), 0);
        assert_eq!(q.bucket_len(0), 1);
        assert_eq!(q.bucket_len(1), 0);

        assert_eq!(q.remove(&id("m1")), Some(QueueSlot::Bucket(0)));
        assert_eq!(q.remove(&id("m1")), None);
        assert_eq!(q.bucket_len(0), 0);
    }

    #[test]
    fn test_round_robin_visits_every_bucket() {
        for k in 1..=5 {
            for start in 0..k {
                let mut q = ScanQueueSet::new(k);
                for b in 0..k {
                    q.push_bucket(id(&format!("m{}", b)), b);
                }
                q.set_selector(start);

                let visited: Vec<_> = (0..k)
                    .map(|_| match q.next_round_robin().map(|m| q.slot_of(&m)) {
                        Some(Some(QueueSlot::Bucket(b))) => b,
                        other => panic!("unexpected {:?}", other),
                    })
                    .collect();

                let expected: Vec<_> = (1..=k).map(|i| (start + i) % k).collect();
                assert_eq!(visited, expected, "k={} start={}", k, start);
            }
        }
    }

    #[test]
    fn test_round_robin_skips_empty_buckets() {
        let mut q = ScanQueueSet::new(4);
        q.push_bucket(id("m2"), 2);
        assert_eq!(q.next_round_robin(), Some(id("m2")));
        assert_eq!(q.selector(), 2);

        q.clear();
        assert_eq!(q.next_round_robin(), None);
        // A full cycle leaves the cursor where it started.
        assert_eq!(q.selector(), 2);
    }
}
