//! Transport stream ingestion: framing, the delivery state and the
//! per-adapter reader thread.

pub mod delivery;
pub mod framing;
mod ingestor;

pub use delivery::{Delivery, DeliveryLock};
pub use framing::{frame, PacketBuffer, PassStats, SyncState, SYNC_BYTE, TS_PACKET_SIZE};
pub use ingestor::{IngestError, IngestHandle};
