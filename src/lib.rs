//! Two-way UWB ranging over an IEEE 802.15.4 style radio link
//!
//! This crate implements the wire protocol for two-node distance
//! ranging: a compact MAC frame codec ([`mac`]) and a ranging message
//! exchange ([`ranging`]) that embeds hardware transmit and receive
//! timestamps in frame payloads, so that two independent radio clocks
//! can later be reconciled into a time-of-flight distance estimate.
//!
//! The protocol relies on deferred transmission: a frame's payload
//! contains the exact future instant at which the radio is scheduled to
//! transmit it. The radio driver itself is not part of this crate; its
//! clock-read and precise-timestamp transmit primitives are injected
//! through the [`ranging::Radio`] trait.
//!
//! The crate is `no_std` and performs no allocation; all frames are
//! built and decoded in place in caller-supplied buffers.

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]

pub mod mac;
pub mod ranging;
pub mod time;

pub use crate::{
    mac::{DecodeError, EncodeError, Header, PanId, ShortAddress, BROADCAST_ADDRESS},
    ranging::{compute_distance_mm, ComputeDistanceError, Error, Radio, RangingHandler, TX_DELAY},
    time::{Duration, Instant, TIME_MAX},
};
