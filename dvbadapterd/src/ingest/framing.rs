//! Transport stream packet framing.
//!
//! Turns a raw byte stream into 188-byte packets aligned on the `0x47`
//! sync byte, re-establishing alignment after corruption. Nothing in here
//! performs I/O or takes locks.

/// TS packet size.
pub const TS_PACKET_SIZE: usize = 188;
/// TS sync byte.
pub const SYNC_BYTE: u8 = 0x47;

/// Number of sync bytes, spaced one packet apart, that must line up
/// before a resync position is accepted.
const RESYNC_MARKERS: usize = 3;

/// Framing state carried between passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncState {
    /// The byte at the cursor starts a packet.
    #[default]
    Synced,
    /// Alignment was lost; the cursor is not known to start a packet.
    Lost,
}

/// Result of one framing pass over a buffer.
#[derive(Debug)]
pub struct Framed<'a> {
    /// Packets in wire order.
    pub packets: Vec<&'a [u8]>,
    /// Bytes at the front of the buffer that are done with (emitted or
    /// discarded as corrupt).
    pub consumed: usize,
    /// State to resume with on the bytes after `consumed`.
    pub state: SyncState,
    /// Number of Synced -> Lost transitions in this pass.
    pub sync_lost: usize,
    /// Number of Lost -> Synced transitions in this pass.
    pub sync_found: usize,
}

/// Frame as many packets as possible out of `buf`, starting in `state`.
///
/// While synced, every 188-byte block starting with the sync byte is
/// emitted. A missing sync byte switches to `Lost`, which searches for a
/// position where sync bytes line up one packet apart (see [`find_sync`]).
/// When the buffered bytes are too short to confirm a position, the pass
/// stops and the unconfirmed tail is left for the next pass.
pub fn frame(buf: &[u8], state: SyncState) -> Framed<'_> {
    let mut packets = Vec::with_capacity(buf.len() / TS_PACKET_SIZE);
    let mut cursor = 0;
    let mut state = state;
    let mut sync_lost = 0;
    let mut sync_found = 0;

    while buf.len() - cursor >= TS_PACKET_SIZE {
        match state {
            SyncState::Synced => {
                if buf[cursor] == SYNC_BYTE {
                    packets.push(&buf[cursor..cursor + TS_PACKET_SIZE]);
                    cursor += TS_PACKET_SIZE;
                } else {
                    state = SyncState::Lost;
                    sync_lost += 1;
                }
            }
            SyncState::Lost => match find_sync(buf, cursor) {
                Ok(pos) => {
                    cursor = pos;
                    state = SyncState::Synced;
                    sync_found += 1;
                }
                Err(pos) => {
                    cursor = pos;
                    break;
                }
            },
        }
    }

    Framed {
        packets,
        consumed: cursor,
        state,
        sync_lost,
        sync_found,
    }
}

/// Search for a packet boundary at or after `from`.
///
/// A position is confirmed when [`RESYNC_MARKERS`] sync bytes line up one
/// packet apart. Near the end of the buffer, where not all of them fit, the
/// markers that do fit must all agree and there must be at least two.
///
/// Returns `Ok(pos)` for a confirmed boundary, or `Err(pos)` with the
/// first position that could not be checked against the buffered bytes.
/// Everything before `Err(pos)` was checked and rejected.
fn find_sync(buf: &[u8], from: usize) -> Result<usize, usize> {
    let mut pos = from;
    while pos + TS_PACKET_SIZE < buf.len() {
        let confirmed = (0..RESYNC_MARKERS)
            .map(|k| pos + k * TS_PACKET_SIZE)
            .take_while(|&at| at < buf.len())
            .all(|at| buf[at] == SYNC_BYTE);
        if confirmed {
            return Ok(pos);
        }
        pos += 1;
    }
    Err(pos)
}

/// Counters for one [`PacketBuffer::drain_packets`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub packets: usize,
    pub discarded: usize,
    pub sync_lost: usize,
    pub sync_found: usize,
}

/// Fixed-capacity accumulation buffer feeding [`frame`].
///
/// New reads are appended after leftover bytes; after each pass the
/// leftovers are moved to the front.
#[derive(Debug)]
pub struct PacketBuffer {
    data: Vec<u8>,
    filled: usize,
    state: SyncState,
}

impl PacketBuffer {
    /// Create a buffer holding `packets` TS packets.
    pub fn new(packets: usize) -> Self {
        Self {
            data: vec![0u8; packets.max(RESYNC_MARKERS + 1) * TS_PACKET_SIZE],
            filled: 0,
            state: SyncState::Synced,
        }
    }

    /// Free space to read into.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.filled..]
    }

    /// Mark `n` bytes of the spare space as filled.
    pub fn commit(&mut self, n: usize) {
        self.filled = (self.filled + n).min(self.data.len());
    }

    /// Bytes currently buffered.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    /// Whether at least one packet's worth of bytes is buffered.
    pub fn has_packet(&self) -> bool {
        self.filled >= TS_PACKET_SIZE
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Frame the buffered bytes, hand each packet to `sink` in order, then
    /// compact the leftovers to the front.
    pub fn drain_packets<F>(&mut self, mut sink: F) -> PassStats
    where
        F: FnMut(&[u8]),
    {
        let framed = frame(&self.data[..self.filled], self.state);
        for packet in &framed.packets {
            sink(packet);
        }
        let stats = PassStats {
            packets: framed.packets.len(),
            discarded: framed.consumed - framed.packets.len() * TS_PACKET_SIZE,
            sync_lost: framed.sync_lost,
            sync_found: framed.sync_found,
        };
        let consumed = framed.consumed;
        self.state = framed.state;

        self.data.copy_within(consumed..self.filled, 0);
        self.filled -= consumed;
        stats
    }
}
