//! Time-related types based on the radio's 40-bit system time

use core::ops::Add;
use serde::{Deserialize, Serialize};

/// The maximum value of 40-bit system time stamps.
pub const TIME_MAX: u64 = 0xffffffffff;

/// The length of a timestamp in its payload encoding, in bytes
pub const TIMESTAMP_LEN: usize = 5;

/// Represents an instant in radio system time
///
/// Internally uses the same 40-bit timestamps that the radio's clock
/// produces. Inside ranging payloads, instants are carried as 5 bytes,
/// most-significant byte first (see [`Instant::to_be_bytes`]). This is
/// distinct from MAC header fields, which are little-endian.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[repr(C)]
pub struct Instant(u64);

impl Instant {
    /// Creates a new instance of `Instant`
    ///
    /// The given value must fit in a 40-bit timestamp, so:
    /// 0 <= `value` <= 2^40 - 1
    ///
    /// Returns `Some(...)`, if `value` is within the valid range, `None` if it
    /// isn't.
    ///
    /// # Example
    ///
    /// ``` rust
    /// use uwb_ranging::time::{Instant, TIME_MAX};
    ///
    /// let valid_instant   = Instant::new(TIME_MAX);
    /// let invalid_instant = Instant::new(TIME_MAX + 1);
    ///
    /// assert!(valid_instant.is_some());
    /// assert!(invalid_instant.is_none());
    /// ```
    pub const fn new(value: u64) -> Option<Self> {
        if value <= TIME_MAX {
            Some(Instant(value))
        } else {
            None
        }
    }

    /// Returns the raw 40-bit timestamp
    ///
    /// The returned value is guaranteed to be in the following range:
    /// 0 <= `value` <= 2^40 - 1
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Encodes this instant as 5 bytes, most-significant byte first
    ///
    /// # Example
    ///
    /// ``` rust
    /// use uwb_ranging::time::Instant;
    ///
    /// let instant = Instant::new(0xf_deca_cafe).unwrap();
    /// assert_eq!(instant.to_be_bytes(), [0x0f, 0xde, 0xca, 0xca, 0xfe]);
    /// ```
    pub fn to_be_bytes(self) -> [u8; TIMESTAMP_LEN] {
        [
            (self.0 >> 32) as u8,
            (self.0 >> 24) as u8,
            (self.0 >> 16) as u8,
            (self.0 >> 8) as u8,
            self.0 as u8,
        ]
    }

    /// Decodes an instant from 5 bytes, most-significant byte first
    ///
    /// Any 5-byte value fits in 40 bits, so this conversion is total.
    ///
    /// # Example
    ///
    /// ``` rust
    /// use uwb_ranging::time::Instant;
    ///
    /// let instant = Instant::from_be_bytes([0x0f, 0xde, 0xca, 0xca, 0xfe]);
    /// assert_eq!(instant.value(), 0xf_deca_cafe);
    /// ```
    pub fn from_be_bytes(bytes: [u8; TIMESTAMP_LEN]) -> Self {
        let mut value = 0;
        for &byte in bytes.iter() {
            value = value << 8 | byte as u64;
        }
        Instant(value)
    }

    /// Returns the amount of time passed between the two `Instant`s
    ///
    /// Assumes that `&self` represents a later time than the argument
    /// `earlier`. Please make sure that this is the case, as this method has no
    /// way of knowing (40-bit timestamps can overflow, so comparing the
    /// numerical value of the timestamp doesn't tell anything about order).
    ///
    /// # Example
    ///
    /// ``` rust
    /// use uwb_ranging::time::{Instant, TIME_MAX};
    ///
    /// // `unwrap`ing here is okay, since we're passing constants that we know
    /// // are in the valid range.
    /// let instant_1 = Instant::new(TIME_MAX - 50).unwrap();
    /// let instant_2 = Instant::new(TIME_MAX).unwrap();
    /// let instant_3 = Instant::new(49).unwrap();
    ///
    /// // Works as expected, if the later timestamp is larger than the earlier
    /// // one.
    /// let duration = instant_2.duration_since(instant_1);
    /// assert_eq!(duration.value(), 50);
    ///
    /// // Still works as expected, if the later timestamp is the numerically
    /// // smaller value.
    /// let duration = instant_3.duration_since(instant_2);
    /// assert_eq!(duration.value(), 50);
    /// ```
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        if self.value() >= earlier.value() {
            Duration(self.value() - earlier.value())
        } else {
            Duration(TIME_MAX - earlier.value() + self.value() + 1)
        }
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Self::Output {
        // Both `Instant` and `Duration` are guaranteed to contain 40-bit
        // numbers, so this addition will never overflow.
        let value = (self.value() + rhs.value()) % (TIME_MAX + 1);

        // We made sure to keep the result of the addition within `TIME_MAX`,
        // so the following will never panic.
        Instant::new(value).unwrap()
    }
}

/// A duration between two instants in radio system time
///
/// Internally uses the same 40-bit format as [`Instant`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[repr(C)]
pub struct Duration(u64);

impl Duration {
    /// Creates a new instance of `Duration`
    ///
    /// The given value must fit in a 40-bit timestamp, so:
    /// 0 <= `value` <= 2^40 - 1
    ///
    /// Returns `Some(...)`, if `value` is within the valid range, `None` if it
    /// isn't.
    pub const fn new(value: u64) -> Option<Self> {
        if value <= TIME_MAX {
            Some(Duration(value))
        } else {
            None
        }
    }

    /// Returns the raw 40-bit tick count
    ///
    /// The returned value is guaranteed to be in the following range:
    /// 0 <= `value` <= 2^40 - 1
    pub const fn value(&self) -> u64 {
        self.0
    }
}
