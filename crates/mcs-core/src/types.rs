//! Core types for the MCS client
//!
//! This module defines the fundamental types used throughout the client,
//! using newtype patterns for semantic validation and type safety.

use core::fmt;
use core::ops::{Add, Sub};
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Stream Identifier
// ----------------------------------------------------------------------------

/// Per-direction sequence number of a frame within one connection generation
pub type StreamId = u32;

// ----------------------------------------------------------------------------
// Persistent Identifier
// ----------------------------------------------------------------------------

/// Width of a generated persistent id; zero padding keeps string order equal
/// to numeric order.
const PERSISTENT_ID_WIDTH: usize = 20;

/// Durable identifier of a message that must survive reconnects and crashes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PersistentId(String);

impl PersistentId {
    /// Wrap an existing identifier (e.g. one assigned by the server)
    pub fn new<T: Into<String>>(id: T) -> Self {
        Self(id.into())
    }

    /// Build the identifier for a locally generated timestamp
    pub fn from_timestamp(micros: u64) -> Self {
        Self(format!("{:0width$}", micros, width = PERSISTENT_ID_WIDTH))
    }

    /// Parse the timestamp back out of a locally generated identifier
    pub fn as_timestamp(&self) -> Option<u64> {
        self.0.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PersistentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PersistentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PersistentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Generates strictly increasing, wall-clock derived persistent ids
///
/// Two ids generated within the same microsecond (or after the clock stepped
/// backwards) still come out strictly ordered.
#[derive(Debug, Clone, Default)]
pub struct PersistentIdGenerator {
    last_micros: u64,
}

impl PersistentIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next id for the current time
    pub fn next_id(&mut self, now: Timestamp) -> PersistentId {
        let candidate = now.as_micros();
        let micros = if candidate > self.last_micros {
            candidate
        } else {
            self.last_micros + 1
        };
        self.last_micros = micros;
        PersistentId::from_timestamp(micros)
    }

    /// Make sure future ids sort after an id restored from the store
    pub fn observe(&mut self, micros: u64) {
        self.last_micros = self.last_micros.max(micros);
    }
}

// ----------------------------------------------------------------------------
// Device Credentials
// ----------------------------------------------------------------------------

/// Checked-in device identity used to log in to the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCredentials {
    pub android_id: u64,
    pub security_token: u64,
}

impl DeviceCredentials {
    pub fn new(android_id: u64, security_token: u64) -> Self {
        Self {
            android_id,
            security_token,
        }
    }

    /// A zero android id means the device never checked in
    pub fn is_new_client(&self) -> bool {
        self.android_id == 0
    }

    pub fn is_complete(&self) -> bool {
        self.android_id != 0 && self.security_token != 0
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, millis: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(millis))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Create a timestamp from whole seconds since the epoch
    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Get current wall-clock timestamp
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_secs(&self) -> u64 {
        self.0 / 1000
    }

    pub fn as_micros(&self) -> u64 {
        self.0.saturating_mul(1000)
    }

    /// Add a duration to this timestamp
    pub fn saturating_add(&self, duration: core::time::Duration) -> Self {
        Self(self.0.saturating_add(duration.as_millis() as u64))
    }

    /// Get duration since another timestamp
    pub fn duration_since(&self, other: Self) -> core::time::Duration {
        core::time::Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Trait for providing timestamps
///
/// The client never reads the clock directly; tests substitute a controllable
/// implementation.
pub trait TimeSource {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Standard library implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
