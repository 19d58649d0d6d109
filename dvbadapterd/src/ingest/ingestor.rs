//! Per-adapter ingestion thread.
//!
//! The thread blocks on the dvr device and a cancellation pipe at the same
//! time. Every read is appended to a [`PacketBuffer`]; once a packet's worth
//! of bytes is buffered the delivery lock is taken, the fresh bytes go to the
//! dump sink and framed packets go to the service on the current mux.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, warn};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use thiserror::Error;

use super::delivery::DeliveryLock;
use super::framing::PacketBuffer;

/// Errors raised while setting up an ingestion thread.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unable to create cancellation pipe: {0}")]
    CancelPipe(#[from] Errno),

    #[error("Unable to spawn dvr thread: {0}")]
    Thread(#[from] io::Error),
}

/// Read buffer size in TS packets.
const READ_PACKETS: usize = 10;

/// Handle to a running ingestion thread.
///
/// Dropping the handle without calling [`IngestHandle::stop`] closes the
/// cancellation pipe, which also ends the thread.
pub struct IngestHandle {
    identifier: String,
    cancel_tx: File,
    /// Kept open here so that signalling never hits a closed pipe.
    _cancel_rx: Arc<OwnedFd>,
    thread: JoinHandle<()>,
}

impl IngestHandle {
    /// Spawn the ingestion thread for adapter `identifier`.
    ///
    /// `open_dvr` runs on the new thread. If it fails the error is logged and
    /// the thread ends without delivering anything.
    pub fn spawn<F>(
        identifier: impl Into<String>,
        open_dvr: F,
        delivery: Arc<DeliveryLock>,
    ) -> Result<Self, IngestError>
    where
        F: FnOnce() -> io::Result<File> + Send + 'static,
    {
        let identifier = identifier.into();
        let (rx, tx) = nix::unistd::pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)?;
        let rx = Arc::new(rx);

        let thread_rx = Arc::clone(&rx);
        let thread_id = identifier.clone();
        let thread = thread::Builder::new()
            .name(format!("dvr-{}", identifier))
            .spawn(move || {
                let dvr = match open_dvr() {
                    Ok(dvr) => dvr,
                    Err(e) => {
                        error!("{}: Unable to open dvr device: {}", thread_id, e);
                        return;
                    }
                };
                run(&thread_id, dvr, &thread_rx, &delivery);
                debug!("{}: dvr thread exiting", thread_id);
            })?;

        Ok(Self {
            identifier,
            cancel_tx: File::from(tx),
            _cancel_rx: rx,
            thread,
        })
    }

    /// Whether the thread has already exited on its own.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Signal cancellation and wait for the thread to exit.
    pub fn stop(self) {
        let IngestHandle {
            identifier,
            mut cancel_tx,
            _cancel_rx,
            thread,
        } = self;

        if let Err(e) = cancel_tx.write_all(&[0]) {
            warn!("{}: Unable to signal dvr thread: {}", identifier, e);
        }
        if thread.join().is_err() {
            error!("{}: dvr thread panicked", identifier);
        }
    }
}

fn is_ready(fd: &PollFd<'_>) -> bool {
    fd.revents().map_or(false, |r| {
        r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
    })
}

fn run(identifier: &str, mut dvr: File, cancel: &OwnedFd, delivery: &DeliveryLock) {
    let mut buffer = PacketBuffer::new(READ_PACKETS);
    // Bytes at the end of the buffer that have not been dumped yet.
    let mut undumped = 0usize;

    loop {
        let (data_ready, cancelled) = {
            let mut fds = [
                PollFd::new(dvr.as_fd(), PollFlags::POLLIN),
                PollFd::new(cancel.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    error!("{}: poll failed: {}", identifier, e);
                    return;
                }
            }
            (is_ready(&fds[0]), is_ready(&fds[1]))
        };

        if cancelled {
            return;
        }
        if !data_ready {
            continue;
        }

        match dvr.read(buffer.spare_mut()) {
            Ok(0) => {
                warn!("{}: dvr device reached end of stream", identifier);
                return;
            }
            Ok(n) => {
                buffer.commit(n);
                undumped += n;
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                continue
            }
            Err(e) => {
                error!("{}: read failed on dvr device: {}", identifier, e);
                return;
            }
        }

        if !buffer.has_packet() {
            continue;
        }

        let mut state = delivery.lock();

        let fresh = buffer.filled();
        let dump_failed = match state.dump.as_mut() {
            Some(dump) => dump.write_all(&fresh[fresh.len() - undumped..]).err(),
            None => None,
        };
        if let Some(e) = dump_failed {
            error!("{}: write to dump file failed, dump disabled: {}", identifier, e);
            state.dump = None;
        }
        undumped = 0;

        let target = state.target();
        let stats = buffer.drain_packets(|packet| {
            if let Some(service) = &target {
                service.recv_packet(packet);
            }
        });

        if stats.sync_lost > 0 {
            debug!("{}: lost TS sync", identifier);
        }
        if stats.sync_found > 0 {
            debug!(
                "{}: TS sync found after skipping {} bytes",
                identifier, stats.discarded
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MuxId;
    use crate::collaborators::Service;
    use crate::ingest::framing::{SYNC_BYTE, TS_PACKET_SIZE};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct Recorder {
        mux: MuxId,
        packets: Mutex<Vec<Vec<u8>>>,
    }

    impl Recorder {
        fn new(mux: &str) -> Arc<Self> {
            Arc::new(Self {
                mux: MuxId::new(mux),
                packets: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.packets.lock().unwrap().len()
        }
    }

    impl Service for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn mux(&self) -> &MuxId {
            &self.mux
        }

        fn weight(&self) -> u32 {
            0
        }

        fn recv_packet(&self, packet: &[u8]) {
            self.packets.lock().unwrap().push(packet.to_vec());
        }
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn packet(seq: u8) -> Vec<u8> {
        let mut p = vec![SYNC_BYTE];
        p.extend(std::iter::repeat(seq & 0x3f).take(TS_PACKET_SIZE - 1));
        p
    }

    fn dvr_pipe() -> (File, File) {
        let (rx, tx) = nix::unistd::pipe().unwrap();
        (File::from(rx), File::from(tx))
    }

    fn wait_for(what: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !what() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_delivers_to_current_mux_service() {
        let delivery = DeliveryLock::new();
        let on_mux = Recorder::new("m1");
        let elsewhere = Recorder::new("m2");
        {
            let mut d = delivery.lock();
            d.current_mux = Some(MuxId::new("m1"));
            d.services.push(elsewhere.clone());
            d.services.push(on_mux.clone());
        }

        let (rx, mut tx) = dvr_pipe();
        let handle = IngestHandle::spawn("a0", move || Ok(rx), Arc::clone(&delivery)).unwrap();

        let mut stream = Vec::new();
        for seq in 0..12 {
            stream.extend(packet(seq));
        }
        // Split mid-packet so the thread sees a partial tail.
        tx.write_all(&stream[..1000]).unwrap();
        tx.write_all(&stream[1000..]).unwrap();

        wait_for(|| on_mux.count() == 12);
        handle.stop();

        let got = on_mux.packets.lock().unwrap().clone();
        let expected: Vec<Vec<u8>> = (0..12).map(packet).collect();
        assert_eq!(got, expected);
        assert_eq!(elsewhere.count(), 0);
    }

    #[test]
    fn test_no_current_mux_discards_packets() {
        let delivery = DeliveryLock::new();
        let sink = SharedSink::default();
        let service = Recorder::new("m1");
        {
            let mut d = delivery.lock();
            d.services.push(service.clone());
            d.dump = Some(Box::new(sink.clone()));
        }

        let (rx, mut tx) = dvr_pipe();
        let handle = IngestHandle::spawn("a0", move || Ok(rx), Arc::clone(&delivery)).unwrap();

        let mut stream = Vec::new();
        for seq in 0..3 {
            stream.extend(packet(seq));
        }
        tx.write_all(&stream).unwrap();

        // The dump sees every byte even though nobody receives packets.
        wait_for(|| sink.0.lock().unwrap().len() == stream.len());
        handle.stop();
        assert_eq!(*sink.0.lock().unwrap(), stream);
        assert_eq!(service.count(), 0);
    }

    #[test]
    fn test_dump_failure_disables_sink() {
        let delivery = DeliveryLock::new();
        let service = Recorder::new("m1");
        {
            let mut d = delivery.lock();
            d.current_mux = Some(MuxId::new("m1"));
            d.services.push(service.clone());
            d.dump = Some(Box::new(BrokenSink));
        }

        let (rx, mut tx) = dvr_pipe();
        let handle = IngestHandle::spawn("a0", move || Ok(rx), Arc::clone(&delivery)).unwrap();
        tx.write_all(&packet(1)).unwrap();

        wait_for(|| service.count() == 1);
        assert!(delivery.lock().dump.is_none());
        handle.stop();
    }

    #[test]
    fn test_stop_while_idle() {
        let delivery = DeliveryLock::new();
        let (rx, _tx) = dvr_pipe();
        let handle = IngestHandle::spawn("a0", move || Ok(rx), delivery).unwrap();
        assert!(!handle.is_finished());

        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_open_failure_ends_thread() {
        let delivery = DeliveryLock::new();
        let handle = IngestHandle::spawn(
            "a0",
            || Err(io::Error::from(io::ErrorKind::PermissionDenied)),
            delivery,
        )
        .unwrap();
        wait_for(|| handle.is_finished());
        handle.stop();
    }
}
