//! Half-duplex transport for the bike's internal serial bus.
//!
//! One pair of wires, one transaction at a time. A transaction is:
//!
//! 1. assert driver-enable and let the transceiver settle
//! 2. transmit the stuffed frame
//! 3. wait (bounded) for the tx-complete signal, release driver-enable
//! 4. wait (bounded) for a decoded reply from the receive path
//!
//! The receive path is interrupt-shaped: whoever owns the UART feeds raw
//! bytes into [`BusTransport::feed_rx`] and signals completion with
//! [`BusTransport::complete_tx`]. The accumulator tolerates line garbage
//! by searching backwards for the latest start marker when a terminator
//! arrives.
//!
//! [`RxAccumulator`] and the error types are `no_std`; the condvar-based
//! [`BusTransport`] needs `std`.

use core::fmt;

use crate::modbus::{self, CodecError, Reply, FRAME_START};

/// Capacity of the receive accumulator. Generous next to the 17-byte
/// frames so bursts of line noise do not force a reset.
pub const RX_BUFFER_LEN: usize = 200;

/// Transaction-level failures, as opposed to frame-level [`CodecError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The tx-complete signal never arrived.
    TxTimeout,
    /// No reply frame arrived in time.
    RxTimeout,
    /// The serial driver refused the frame.
    TxRejected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::TxTimeout => write!(f, "timed out waiting for transmit completion"),
            TransportError::RxTimeout => write!(f, "timed out waiting for reply"),
            TransportError::TxRejected => write!(f, "serial driver rejected transmit"),
        }
    }
}

/// Any way a bus transaction can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The reply arrived but did not decode.
    Codec(CodecError),
    /// The transaction itself failed.
    Transport(TransportError),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Codec(e) => write!(f, "reply decode failed: {e}"),
            BusError::Transport(e) => write!(f, "{e}"),
        }
    }
}

impl From<CodecError> for BusError {
    fn from(e: CodecError) -> Self {
        BusError::Codec(e)
    }
}

impl From<TransportError> for BusError {
    fn from(e: TransportError) -> Self {
        BusError::Transport(e)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TransportError {}
#[cfg(feature = "std")]
impl std::error::Error for BusError {}

/// Byte-at-a-time reply assembler for the receive interrupt path.
///
/// Bytes are unstuffed as they arrive. On a `\n` terminator the buffer is
/// scanned backwards for the most recent start marker, so garbage before
/// the frame (bus turnaround glitches, our own echoed transmit on some
/// transceivers) is discarded rather than poisoning the decode.
#[derive(Debug, Default)]
pub struct RxAccumulator {
    buf: heapless::Vec<u8, RX_BUFFER_LEN>,
}

impl RxAccumulator {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Feed one raw byte from the wire.
    ///
    /// Returns the decode outcome when this byte completed a frame.
    pub fn push_byte(&mut self, raw: u8) -> Option<Result<Reply, CodecError>> {
        let byte = raw & 0x7F;
        if byte == b'\n' {
            return self.take_frame();
        }
        if self.buf.push(byte).is_err() {
            log::warn!("rx accumulator overflow, dropping {} bytes", self.buf.len());
            self.buf.clear();
            // The dropped bytes may have held the frame start; keep the
            // terminator-triggered scan honest by starting clean.
            let _ = self.buf.push(byte);
        }
        None
    }

    fn take_frame(&mut self) -> Option<Result<Reply, CodecError>> {
        let start = self.buf.iter().rposition(|&b| b == FRAME_START);
        let result = match start {
            Some(pos) => {
                if pos != 0 {
                    log::warn!("data thrown out: {pos} bytes before frame start");
                }
                Some(modbus::decode_reply(&self.buf[pos..]))
            }
            None => {
                if !self.buf.is_empty() {
                    log::warn!("data thrown out: {} bytes with no frame start", self.buf.len());
                }
                None
            }
        };
        self.buf.clear();
        result
    }
}

#[cfg(feature = "std")]
pub use bus::BusTransport;

#[cfg(feature = "std")]
mod bus {
    use std::sync::{Condvar, Mutex, MutexGuard};
    use std::time::Duration;

    use super::{BusError, RxAccumulator, TransportError};
    use crate::config::BusConfig;
    use crate::modbus::{self, CommandFrame, Reply};
    use crate::traits::{BusDirection, SerialTx, Transport};

    /// The production bus transport: serializes transactions, drives the
    /// driver-enable pin, and parks the caller on condvars until the
    /// interrupt path signals progress.
    ///
    /// Shared as `Arc<BusTransport<_, _>>`: the control loop calls
    /// [`send_and_await`](Self::send_and_await) while the UART glue calls
    /// [`complete_tx`](Self::complete_tx) and [`feed_rx`](Self::feed_rx)
    /// from its own context.
    pub struct BusTransport<S: SerialTx, D: BusDirection> {
        io: Mutex<Io<S, D>>,
        shared: Mutex<RxState>,
        tx_done: Condvar,
        rx_done: Condvar,
        /// Held for the whole transaction so overlapping callers queue up.
        transaction: Mutex<()>,
        config: BusConfig,
    }

    struct Io<S, D> {
        serial: S,
        direction: D,
    }

    struct RxState {
        tx_complete: bool,
        reply: Option<Result<Reply, BusError>>,
        accumulator: RxAccumulator,
    }

    impl<S: SerialTx, D: BusDirection> BusTransport<S, D> {
        /// Transport over the given serial driver and direction pin.
        pub fn new(serial: S, direction: D, config: BusConfig) -> Self {
            Self {
                io: Mutex::new(Io { serial, direction }),
                shared: Mutex::new(RxState {
                    tx_complete: false,
                    reply: None,
                    accumulator: RxAccumulator::new(),
                }),
                tx_done: Condvar::new(),
                rx_done: Condvar::new(),
                transaction: Mutex::new(()),
                config,
            }
        }

        /// Run one complete transaction. Blocks until the reply arrives
        /// or one of the bounded waits expires.
        pub fn send_and_await(&self, frame: &CommandFrame) -> Result<Reply, BusError> {
            let _txn = lock(&self.transaction);

            {
                let mut shared = lock(&self.shared);
                shared.tx_complete = false;
                shared.reply = None;
            }

            {
                let mut io = lock(&self.io);
                io.direction.set_transmit(true);
                std::thread::sleep(Duration::from_millis(self.config.settle_ms));
                let mut bytes = frame.encode();
                modbus::stuff_7n2(&mut bytes);
                if let Err(err) = io.serial.write_frame(&bytes) {
                    log::error!("serial write failed: {err:?}");
                    io.direction.set_transmit(false);
                    return Err(TransportError::TxRejected.into());
                }
            }

            let tx_timed_out = {
                let shared = lock(&self.shared);
                let (_guard, timeout) = self
                    .tx_done
                    .wait_timeout_while(
                        shared,
                        Duration::from_millis(self.config.tx_timeout_ms),
                        |s| !s.tx_complete,
                    )
                    .unwrap_or_else(|p| p.into_inner());
                timeout.timed_out()
            };

            // Release the bus whether or not the transmit finished, or no
            // node can ever answer.
            lock(&self.io).direction.set_transmit(false);

            if tx_timed_out {
                return Err(TransportError::TxTimeout.into());
            }

            let shared = lock(&self.shared);
            let (mut shared, timeout) = self
                .rx_done
                .wait_timeout_while(
                    shared,
                    Duration::from_millis(self.config.rx_timeout_ms),
                    |s| s.reply.is_none(),
                )
                .unwrap_or_else(|p| p.into_inner());
            match shared.reply.take() {
                Some(result) => result,
                None => {
                    debug_assert!(timeout.timed_out());
                    Err(TransportError::RxTimeout.into())
                }
            }
        }

        /// Signal from the UART driver that the frame left the wire.
        pub fn complete_tx(&self) {
            lock(&self.shared).tx_complete = true;
            self.tx_done.notify_one();
        }

        /// Feed received bytes from the UART driver.
        ///
        /// Frames completed here are decoded immediately. If no
        /// transaction is waiting the outcome is simply overwritten by
        /// the next one; late replies are parsed and dropped.
        pub fn feed_rx(&self, bytes: &[u8]) {
            let mut shared = lock(&self.shared);
            for &raw in bytes {
                if let Some(result) = shared.accumulator.push_byte(raw) {
                    if let Err(err) = &result {
                        log::warn!("discarding undecodable reply: {err}");
                    }
                    shared.reply = Some(result.map_err(BusError::from));
                    self.rx_done.notify_one();
                }
            }
        }
    }

    impl<S: SerialTx, D: BusDirection> Transport for std::sync::Arc<BusTransport<S, D>> {
        fn send_and_await(&mut self, frame: &CommandFrame) -> Result<Reply, BusError> {
            BusTransport::send_and_await(self, frame)
        }

        fn pause_ms(&mut self, ms: u32) {
            std::thread::sleep(Duration::from_millis(u64::from(ms)));
        }
    }

    /// Lock, shrugging off poisoning: the protected state stays coherent
    /// through a panicking feeder thread.
    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|p| p.into_inner())
    }
}


#[cfg(all(test, feature = "std"))]
mod bus_tests {
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::config::BusConfig;
    use crate::modbus::{CommandFrame, NodeAddress};
    use crate::traits::{BusDirection, SerialTx, Transport};

    struct ChannelSerial {
        tx: mpsc::Sender<Vec<u8>>,
    }

    impl SerialTx for ChannelSerial {
        type Error = mpsc::SendError<Vec<u8>>;

        fn write_frame(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
            self.tx.send(bytes.to_vec())
        }
    }

    #[derive(Default)]
    struct NullDirection;

    impl BusDirection for NullDirection {
        fn set_transmit(&mut self, _enabled: bool) {}
    }

    fn fast_config() -> BusConfig {
        BusConfig {
            settle_ms: 0,
            tx_timeout_ms: 200,
            rx_timeout_ms: 200,
            ..BusConfig::default()
        }
    }

    #[test]
    fn transaction_completes_against_echoing_peer() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let bus = Arc::new(BusTransport::new(
            ChannelSerial { tx },
            NullDirection,
            fast_config(),
        ));

        // Peer: acknowledge the transmit and echo the frame back, the way
        // a motor board answers a write.
        let peer_bus = Arc::clone(&bus);
        let peer = thread::spawn(move || {
            let frame = rx.recv().unwrap();
            peer_bus.complete_tx();
            peer_bus.feed_rx(&frame);
        });

        let mut transport = Arc::clone(&bus);
        let frame = CommandFrame::write_holding(NodeAddress::Resistance, 0x0005, 0x003A);
        let reply = transport.send_and_await(&frame);
        peer.join().unwrap();

        assert_eq!(
            reply,
            Ok(Reply::WriteAck {
                node: NodeAddress::Resistance
            })
        );
    }

    #[test]
    fn silent_peer_times_out_on_tx() {
        let (tx, _rx) = mpsc::channel::<Vec<u8>>();
        let bus = Arc::new(BusTransport::new(
            ChannelSerial { tx },
            NullDirection,
            BusConfig {
                settle_ms: 0,
                tx_timeout_ms: 10,
                rx_timeout_ms: 10,
                ..BusConfig::default()
            },
        ));

        let mut transport = Arc::clone(&bus);
        let frame = CommandFrame::read_holding(NodeAddress::Rpm, 0x0002);
        assert_eq!(
            transport.send_and_await(&frame),
            Err(BusError::Transport(TransportError::TxTimeout))
        );
    }

    #[test]
    fn acked_but_unanswered_times_out_on_rx() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let bus = Arc::new(BusTransport::new(
            ChannelSerial { tx },
            NullDirection,
            BusConfig {
                settle_ms: 0,
                tx_timeout_ms: 200,
                rx_timeout_ms: 20,
                ..BusConfig::default()
            },
        ));

        let peer_bus = Arc::clone(&bus);
        let peer = thread::spawn(move || {
            let _frame = rx.recv().unwrap();
            peer_bus.complete_tx();
            // Never answer.
        });

        let mut transport = Arc::clone(&bus);
        let frame = CommandFrame::read_holding(NodeAddress::Incline, 0x0002);
        assert_eq!(
            transport.send_and_await(&frame),
            Err(BusError::Transport(TransportError::RxTimeout))
        );
        peer.join().unwrap();
    }

    #[test]
    fn retry_wrapper_counts_attempts() {
        let (tx, _rx) = mpsc::channel::<Vec<u8>>();
        let bus = Arc::new(BusTransport::new(
            ChannelSerial { tx },
            NullDirection,
            BusConfig {
                settle_ms: 0,
                tx_timeout_ms: 1,
                rx_timeout_ms: 1,
                ..BusConfig::default()
            },
        ));

        let mut transport = Arc::clone(&bus);
        let frame = CommandFrame::read_holding(NodeAddress::Rpm, 0x0002);
        assert_eq!(transport.send_with_retries(&frame, 3, 0), None);
    }
}
