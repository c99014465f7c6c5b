//! Single-exchange two-way ranging
//!
//! A ranging round consists of two messages. A node broadcasts a
//! measurement advertisement whose payload is the exact instant the
//! radio will transmit the frame; the transmission is scheduled for that
//! same instant, so every receiver learns the sender's transmit time
//! purely from the payload (deferred transmission). A peer that receives
//! the advertisement answers with a unicast reply carrying three
//! timestamps: the advertised transmit time, its own receive time, and
//! the scheduled transmit time of the reply itself, again honored
//! exactly by the radio.
//!
//! After one round the advertiser holds four timestamps (the three from
//! the reply, plus its own receive time for the reply), which is enough
//! to estimate the time of flight. See [`compute_distance_mm`].
//!
//! The handler is symmetric: any node can both originate advertisements
//! and answer them. It holds no per-exchange state, so every incoming
//! frame is processed as an independent transaction. Retransmitted or
//! concurrent advertisements are not disambiguated.

use core::num::Wrapping;

use crate::{
    mac::{self, DecodeError, EncodeError, Header, PanId, ShortAddress, BROADCAST_ADDRESS},
    time::{Duration, Instant, TIMESTAMP_LEN},
};

/// The transmission delay
///
/// The number of clock ticks reserved between reading the clock (or
/// measuring a frame's arrival) and the scheduled transmission of the
/// corresponding frame. This should be enough to finish building the
/// frame and hand it to the radio, even if we're running with
/// unoptimized code.
pub const TX_DELAY: Duration = match Duration::new(1_000) {
    Some(delay) => delay,
    None => unreachable!(),
};

/// Payload length of a measurement advertisement, in bytes
pub const ADVERTISEMENT_LEN: usize = TIMESTAMP_LEN;

/// Payload length of a measurement reply, in bytes
pub const REPLY_LEN: usize = 3 * TIMESTAMP_LEN;

/// Sequence number carried by every measurement reply
const REPLY_SEQ: u8 = 1;

/// The capabilities the protocol needs from the surrounding radio driver
///
/// The handler never touches hardware itself. It reads the radio's clock
/// and hands off fully assembled frames together with the instant at
/// which the radio must transmit them; honoring that instant exactly is
/// the radio layer's contract.
pub trait Radio {
    /// The error type returned by the radio layer
    type Error;

    /// Reads the radio's current 40-bit system time
    fn sys_time(&mut self) -> Result<Instant, Self::Error>;

    /// Hands a frame to the radio for transmission at exactly `tx_time`
    ///
    /// Fire and forget: the handler performs no retry, acknowledgment
    /// wait, or timeout around this call.
    fn send_delayed(&mut self, tx_time: Instant, frame: &[u8]) -> Result<(), Self::Error>;
}

/// An error that can occur while originating or answering ranging frames
#[derive(Debug)]
pub enum Error<E> {
    /// Error surfaced by the injected radio capability
    Radio(E),

    /// A frame could not be encoded
    Encode(EncodeError),

    /// A received frame could not be decoded
    Frame(DecodeError),
}

impl<E> From<EncodeError> for Error<E> {
    fn from(error: EncodeError) -> Self {
        Error::Encode(error)
    }
}

impl<E> From<DecodeError> for Error<E> {
    fn from(error: DecodeError) -> Self {
        Error::Frame(error)
    }
}

/// Per-node ranging protocol state
///
/// Holds the node's identity and its transmit sequence counter. A
/// handler is meant to be owned and driven by a single execution
/// context; calls into it are not internally synchronized.
pub struct RangingHandler {
    pan_id: PanId,
    address: ShortAddress,
    seq: Wrapping<u8>,
}

impl RangingHandler {
    /// Creates a handler for the node with the given identity
    ///
    /// The sequence counter starts at zero.
    pub fn new(pan_id: PanId, address: ShortAddress) -> Self {
        RangingHandler {
            pan_id,
            address,
            seq: Wrapping(0),
        }
    }

    /// The PAN this node belongs to
    pub fn pan_id(&self) -> PanId {
        self.pan_id
    }

    /// This node's short address
    pub fn address(&self) -> ShortAddress {
        self.address
    }

    /// Builds a measurement advertisement frame into `buffer`
    ///
    /// The payload is the scheduled transmit time, encoded big-endian.
    /// The frame is addressed to the broadcast address and carries the
    /// handler's current sequence number. Pure builder: nothing is
    /// transmitted. Returns the frame length.
    pub fn prepare_measurement_advertisement(
        &self,
        tx_time: Instant,
        buffer: &mut [u8],
    ) -> Result<usize, EncodeError> {
        let required_len = mac::frame_len(ADVERTISEMENT_LEN);
        if buffer.len() < required_len {
            return Err(EncodeError::BufferTooSmall { required_len });
        }

        buffer[..TIMESTAMP_LEN].copy_from_slice(&tx_time.to_be_bytes());

        let header = Header {
            seq: self.seq.0,
            pan_id: self.pan_id,
            destination: BROADCAST_ADDRESS,
            source: self.address,
        };
        mac::encapsulate(&header, buffer, ADVERTISEMENT_LEN)
    }

    /// Broadcasts a measurement advertisement
    ///
    /// Reads the clock once and schedules the transmission [`TX_DELAY`]
    /// ticks in the future. That same instant is embedded in the
    /// payload before the frame is handed to the radio, so receivers
    /// learn the true transmit time from the payload alone.
    pub fn send_measurement_advertisement<R>(
        &mut self,
        radio: &mut R,
        buffer: &mut [u8],
    ) -> Result<(), Error<R::Error>>
    where
        R: Radio,
    {
        let now = radio.sys_time().map_err(Error::Radio)?;
        let tx_time = now + TX_DELAY;

        let frame_len = self.prepare_measurement_advertisement(tx_time, buffer)?;
        radio.send_delayed(tx_time, &buffer[..frame_len]).map_err(Error::Radio)
    }

    /// Processes a received frame, answering valid advertisements
    ///
    /// `buffer` holds the raw frame in its first `frame_len` bytes and
    /// is reused to assemble the reply, so it must be able to hold a
    /// full reply frame. `rx_time` is the hardware receive timestamp of
    /// the frame.
    ///
    /// Frames with a foreign PAN id, a non-broadcast destination, or a
    /// payload that isn't advertisement-shaped are dropped without a
    /// reply; on a shared channel those are routine, not errors. A
    /// malformed frame is surfaced as [`Error::Frame`].
    ///
    /// The reply is scheduled at `rx_time + `[`TX_DELAY`], with no
    /// fresh clock read, and carries the advertised transmit time, the
    /// receive time, and its own scheduled transmit time.
    pub fn process_incoming_frame<R>(
        &mut self,
        radio: &mut R,
        buffer: &mut [u8],
        frame_len: usize,
        rx_time: Instant,
    ) -> Result<(), Error<R::Error>>
    where
        R: Radio,
    {
        let (header, payload_len) = mac::decapsulate(buffer, frame_len)?;

        if header.pan_id != self.pan_id {
            return Ok(());
        }
        if header.destination != BROADCAST_ADDRESS {
            return Ok(());
        }
        if payload_len != ADVERTISEMENT_LEN {
            return Ok(());
        }

        let mut timestamp = [0; TIMESTAMP_LEN];
        timestamp.copy_from_slice(&buffer[..TIMESTAMP_LEN]);
        let advertisement_tx_time = Instant::from_be_bytes(timestamp);

        let reply_tx_time = rx_time + TX_DELAY;

        buffer[..TIMESTAMP_LEN].copy_from_slice(&advertisement_tx_time.to_be_bytes());
        buffer[TIMESTAMP_LEN..2 * TIMESTAMP_LEN].copy_from_slice(&rx_time.to_be_bytes());
        buffer[2 * TIMESTAMP_LEN..REPLY_LEN].copy_from_slice(&reply_tx_time.to_be_bytes());

        let reply_header = Header {
            seq: REPLY_SEQ,
            pan_id: self.pan_id,
            destination: header.source,
            source: self.address,
        };
        let frame_len = mac::encapsulate(&reply_header, buffer, REPLY_LEN)?;
        radio
            .send_delayed(reply_tx_time, &buffer[..frame_len])
            .map_err(Error::Radio)
    }
}

/// Computes the distance between two nodes from a completed exchange
///
/// Takes the four timestamps of one advertisement/reply round: the
/// advertised transmit time and the reply's three payload timestamps are
/// known to the advertiser once it has received the reply; the fourth is
/// the advertiser's own receive timestamp for that reply. The first two
/// arguments are in the advertiser's clock, the middle two in the
/// responder's clock; only differences within the same clock are used.
pub fn compute_distance_mm(
    advertisement_tx_time: Instant,
    advertisement_rx_time: Instant,
    reply_tx_time: Instant,
    reply_rx_time: Instant,
) -> Result<u64, ComputeDistanceError> {
    let round_trip_time = reply_rx_time.duration_since(advertisement_tx_time).value();
    let reply_delay = reply_tx_time.duration_since(advertisement_rx_time).value();

    let time_of_flight = round_trip_time
        .checked_sub(reply_delay)
        .ok_or(ComputeDistanceError::ReplyDelayTooLarge)?
        / 2;

    // Nominally, all time units are based on a 64 GHz clock, meaning each
    // time unit is 1/64 ns.
    const SPEED_OF_LIGHT: u64 = 299_792_458; // m/s or nm/ns

    let distance_nm_times_64 = SPEED_OF_LIGHT
        .checked_mul(time_of_flight)
        .ok_or(ComputeDistanceError::TimeOfFlightTooLarge)?;

    Ok(distance_nm_times_64 / 64 / 1_000_000)
}

/// Returned from [`compute_distance_mm`] in case of an error
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ComputeDistanceError {
    /// The reply was scheduled later than the measured round trip allows
    ReplyDelayTooLarge,

    /// The time of flight is so large, the distance calculation would overflow
    TimeOfFlightTooLarge,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TIME_MAX;

    struct MockRadio {
        now: u64,
        sent: Vec<(Instant, Vec<u8>)>,
    }

    impl MockRadio {
        fn new(now: u64) -> Self {
            MockRadio {
                now,
                sent: Vec::new(),
            }
        }
    }

    impl Radio for MockRadio {
        type Error = ();

        fn sys_time(&mut self) -> Result<Instant, ()> {
            Ok(Instant::new(self.now).unwrap())
        }

        fn send_delayed(&mut self, tx_time: Instant, frame: &[u8]) -> Result<(), ()> {
            self.sent.push((tx_time, frame.to_vec()));
            Ok(())
        }
    }

    fn instant(value: u64) -> Instant {
        Instant::new(value).unwrap()
    }

    fn responder() -> RangingHandler {
        RangingHandler::new(PanId(0xaabb), ShortAddress(0xccdd))
    }

    fn read_timestamp(payload: &[u8]) -> Instant {
        let mut bytes = [0; TIMESTAMP_LEN];
        bytes.copy_from_slice(&payload[..TIMESTAMP_LEN]);
        Instant::from_be_bytes(bytes)
    }

    #[test]
    fn advertisement_has_expected_shape() {
        let handler = responder();
        let mut frame = [0; 128];

        let size = handler
            .prepare_measurement_advertisement(instant(1600), &mut frame)
            .unwrap();

        let (header, payload_len) = mac::decapsulate(&mut frame, size).unwrap();

        assert_eq!(payload_len, ADVERTISEMENT_LEN);
        assert_eq!(header.pan_id, handler.pan_id());
        assert_eq!(header.source, handler.address());
        assert_eq!(header.destination, BROADCAST_ADDRESS);
        assert_eq!(header.seq, 0);
        assert_eq!(read_timestamp(&frame), instant(1600));
    }

    #[test]
    fn advertisement_is_scheduled_at_its_embedded_time() {
        let mut handler = responder();
        let mut radio = MockRadio::new(600);
        let mut buffer = [0; 128];

        handler
            .send_measurement_advertisement(&mut radio, &mut buffer)
            .unwrap();

        assert_eq!(radio.sent.len(), 1);
        let (tx_time, mut frame) = radio.sent.remove(0);
        assert_eq!(tx_time, instant(1600));

        let frame_len = frame.len();
        let (_, payload_len) = mac::decapsulate(&mut frame, frame_len).unwrap();
        assert_eq!(payload_len, ADVERTISEMENT_LEN);
        assert_eq!(read_timestamp(&frame), instant(1600));
    }

    #[test]
    fn advertisement_sequence_number_stays_at_zero() {
        // The sequence counter is assigned but never advanced by the
        // advertisement path. Pins the current behavior.
        let mut handler = responder();
        let mut radio = MockRadio::new(600);
        let mut buffer = [0; 128];

        for _ in 0..2 {
            handler
                .send_measurement_advertisement(&mut radio, &mut buffer)
                .unwrap();
        }

        for (_, mut frame) in radio.sent.drain(..) {
            let frame_len = frame.len();
            let (header, _) = mac::decapsulate(&mut frame, frame_len).unwrap();
            assert_eq!(header.seq, 0);
        }
    }

    #[test]
    fn valid_advertisement_is_answered_with_three_timestamps() {
        let advertiser = RangingHandler::new(PanId(0xaabb), ShortAddress(0xcafe));
        let mut handler = responder();
        let mut radio = MockRadio::new(0);

        let mut buffer = [0; 32];
        let frame_len = advertiser
            .prepare_measurement_advertisement(instant(600), &mut buffer)
            .unwrap();

        handler
            .process_incoming_frame(&mut radio, &mut buffer, frame_len, instant(1400))
            .unwrap();

        assert_eq!(radio.sent.len(), 1);
        let (tx_time, mut reply) = radio.sent.remove(0);
        assert_eq!(tx_time, instant(2400));

        let reply_len = reply.len();
        let (header, payload_len) = mac::decapsulate(&mut reply, reply_len).unwrap();

        assert_eq!(header.pan_id, PanId(0xaabb));
        assert_eq!(header.destination, ShortAddress(0xcafe));
        assert_eq!(header.source, handler.address());
        assert_eq!(header.seq, 1);
        assert_eq!(payload_len, REPLY_LEN);

        assert_eq!(read_timestamp(&reply[..5]), instant(600));
        assert_eq!(read_timestamp(&reply[5..10]), instant(1400));
        assert_eq!(read_timestamp(&reply[10..15]), instant(2400));
    }

    #[test]
    fn mismatched_pan_id_is_dropped() {
        let advertiser = RangingHandler::new(PanId(0xbabc), ShortAddress(0xcafe));
        let mut handler = RangingHandler::new(PanId(0xcafe), ShortAddress(0xccdd));
        let mut radio = MockRadio::new(0);

        let mut buffer = [0; 32];
        let frame_len = advertiser
            .prepare_measurement_advertisement(instant(600), &mut buffer)
            .unwrap();

        handler
            .process_incoming_frame(&mut radio, &mut buffer, frame_len, instant(600))
            .unwrap();

        assert!(radio.sent.is_empty());
    }

    #[test]
    fn non_broadcast_destination_is_dropped() {
        let advertiser = RangingHandler::new(PanId(0xaabb), ShortAddress(0xcafe));
        let mut handler = responder();
        let mut radio = MockRadio::new(0);

        let mut buffer = [0; 32];
        let frame_len = advertiser
            .prepare_measurement_advertisement(instant(600), &mut buffer)
            .unwrap();

        // Rewrite the destination from broadcast to a foreign unicast
        // address.
        buffer[5] = 0x00;
        buffer[6] = 0x00;

        handler
            .process_incoming_frame(&mut radio, &mut buffer, frame_len, instant(600))
            .unwrap();

        assert!(radio.sent.is_empty());
    }

    #[test]
    fn unicast_to_own_address_is_dropped() {
        // Only broadcast advertisements are acted upon, even when the
        // unicast destination matches the handler's own address.
        let advertiser = RangingHandler::new(PanId(0xaabb), ShortAddress(0xcafe));
        let mut handler = responder();
        let mut radio = MockRadio::new(0);

        let mut buffer = [0; 32];
        let frame_len = advertiser
            .prepare_measurement_advertisement(instant(600), &mut buffer)
            .unwrap();

        buffer[5] = 0xdd;
        buffer[6] = 0xcc;

        handler
            .process_incoming_frame(&mut radio, &mut buffer, frame_len, instant(600))
            .unwrap();

        assert!(radio.sent.is_empty());
    }

    #[test]
    fn unexpected_payload_length_is_dropped() {
        let mut handler = responder();
        let mut radio = MockRadio::new(0);

        let mut buffer = [0; 32];
        let header = Header {
            seq: 0,
            pan_id: handler.pan_id(),
            destination: BROADCAST_ADDRESS,
            source: ShortAddress(0xcafe),
        };
        let frame_len = mac::encapsulate(&header, &mut buffer, 4).unwrap();

        handler
            .process_incoming_frame(&mut radio, &mut buffer, frame_len, instant(600))
            .unwrap();

        assert!(radio.sent.is_empty());
    }

    #[test]
    fn malformed_frame_is_surfaced() {
        let mut handler = responder();
        let mut radio = MockRadio::new(0);
        let mut buffer = [0; 8];

        let result = handler.process_incoming_frame(&mut radio, &mut buffer, 8, instant(600));

        assert!(matches!(
            result,
            Err(Error::Frame(DecodeError::NotEnoughBytes))
        ));
        assert!(radio.sent.is_empty());
    }

    #[test]
    fn reply_scheduling_wraps_at_40_bits() {
        let advertiser = RangingHandler::new(PanId(0xaabb), ShortAddress(0xcafe));
        let mut handler = responder();
        let mut radio = MockRadio::new(0);

        let mut buffer = [0; 32];
        let frame_len = advertiser
            .prepare_measurement_advertisement(instant(600), &mut buffer)
            .unwrap();

        let rx_time = instant(TIME_MAX - 99);
        handler
            .process_incoming_frame(&mut radio, &mut buffer, frame_len, rx_time)
            .unwrap();

        let (tx_time, mut reply) = radio.sent.remove(0);
        assert_eq!(tx_time, instant(900));

        let reply_len = reply.len();
        mac::decapsulate(&mut reply, reply_len).unwrap();
        assert_eq!(read_timestamp(&reply[10..15]), instant(900));
    }

    #[test]
    fn advertisement_builder_checks_buffer_capacity() {
        let handler = responder();
        let mut buffer = [0; 15];

        let result = handler.prepare_measurement_advertisement(instant(600), &mut buffer);

        assert_eq!(result, Err(EncodeError::BufferTooSmall { required_len: 16 }));
    }

    #[test]
    fn distance_is_computed_from_four_timestamps() {
        // Round trip of 14800 ticks minus a 2000 tick reply delay
        // leaves a one-way time of flight of 6400 ticks, i.e. 100 ns.
        let distance = compute_distance_mm(
            instant(1_000),
            instant(5_000),
            instant(7_000),
            instant(15_800),
        );

        assert_eq!(distance, Ok(29_979));
    }

    #[test]
    fn distance_computation_rejects_impossible_reply_delay() {
        let result = compute_distance_mm(instant(0), instant(0), instant(5_000), instant(4_000));

        assert_eq!(result, Err(ComputeDistanceError::ReplyDelayTooLarge));
    }
}
