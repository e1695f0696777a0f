//! Shared configuration for the bus, control loop, and broadcast adapters.
//!
//! Uses `heapless::String` for `no_std` compatibility while remaining
//! ergonomic to use on desktop with `std`.
//!
//! # Example
//!
//! ```rust
//! use rs_bikez::config::{BusConfig, Config, ControlConfig};
//!
//! // Use defaults
//! let config = Config::default();
//!
//! // Or customize
//! let config = Config::default()
//!     .with_bus(BusConfig::default().with_rx_timeout_ms(100))
//!     .with_control(ControlConfig::default().with_cycle_ms(1000));
//! ```

use heapless::String as HString;

/// Maximum length for short config strings (device names)
pub const MAX_SHORT_STRING: usize = 64;

/// Type alias for short config strings
pub type ShortString = HString<MAX_SHORT_STRING>;

/// Create a ShortString from a &str, truncating if too long
pub fn short_string(s: &str) -> ShortString {
    let mut hs = ShortString::new();
    let take = s.len().min(MAX_SHORT_STRING);
    // Find valid UTF-8 boundary
    let valid_end = s
        .char_indices()
        .take_while(|(i, _)| *i < take)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let _ = hs.push_str(&s[..valid_end]);
    hs
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete application configuration
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Internal serial bus timing
    pub bus: BusConfig,
    /// Control loop timing
    pub control: ControlConfig,
    /// FE-C broadcast configuration
    pub broadcast: BroadcastConfig,
    /// Device identification
    pub device: DeviceConfig,
}

impl Config {
    /// Set bus configuration
    pub fn with_bus(mut self, bus: BusConfig) -> Self {
        self.bus = bus;
        self
    }

    /// Set control loop configuration
    pub fn with_control(mut self, control: ControlConfig) -> Self {
        self.control = control;
        self
    }

    /// Set broadcast configuration
    pub fn with_broadcast(mut self, broadcast: BroadcastConfig) -> Self {
        self.broadcast = broadcast;
        self
    }

    /// Set device configuration
    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }
}

// ============================================================================
// Bus Config
// ============================================================================

/// Timing for the half-duplex internal serial bus.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BusConfig {
    /// UART baud rate (the bike's boards are fixed at 38400)
    pub baud: u32,
    /// Settle time after asserting driver-enable, before transmitting
    pub settle_ms: u64,
    /// Bounded wait for transmit completion
    pub tx_timeout_ms: u64,
    /// Bounded wait for the reply frame
    pub rx_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            baud: 38_400,
            settle_ms: 5,
            tx_timeout_ms: 50,
            rx_timeout_ms: 50,
        }
    }
}

impl BusConfig {
    /// Set the transceiver settle time
    pub fn with_settle_ms(mut self, ms: u64) -> Self {
        self.settle_ms = ms;
        self
    }

    /// Set the transmit-completion timeout
    pub fn with_tx_timeout_ms(mut self, ms: u64) -> Self {
        self.tx_timeout_ms = ms;
        self
    }

    /// Set the reply timeout
    pub fn with_rx_timeout_ms(mut self, ms: u64) -> Self {
        self.rx_timeout_ms = ms;
        self
    }
}

// ============================================================================
// Control Config
// ============================================================================

/// Control loop timing.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControlConfig {
    /// Poll/adjust cycle period in milliseconds
    pub cycle_ms: u64,
    /// Wait before calibration, while the boards boot
    pub startup_settle_ms: u32,
    /// Bounded wait when contending for the shared bike state
    pub state_lock_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            cycle_ms: 500,
            startup_settle_ms: 3000,
            state_lock_timeout_ms: 50,
        }
    }
}

impl ControlConfig {
    /// Set the cycle period
    pub fn with_cycle_ms(mut self, ms: u64) -> Self {
        self.cycle_ms = ms;
        self
    }

    /// Set the startup settle time
    pub fn with_startup_settle_ms(mut self, ms: u32) -> Self {
        self.startup_settle_ms = ms;
        self
    }

    /// Set the shared-state lock timeout
    pub fn with_state_lock_timeout_ms(mut self, ms: u64) -> Self {
        self.state_lock_timeout_ms = ms;
        self
    }
}

// ============================================================================
// Broadcast Config
// ============================================================================

/// FE-C broadcast pacing and channel assignment.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BroadcastConfig {
    /// Minimum spacing between broadcast messages in milliseconds
    pub pacing_ms: u64,
    /// ANT channel number carried in every message header
    pub channel: u8,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            pacing_ms: 250,
            channel: 5,
        }
    }
}

impl BroadcastConfig {
    /// Set the message pacing
    pub fn with_pacing_ms(mut self, ms: u64) -> Self {
        self.pacing_ms = ms;
        self
    }

    /// Set the ANT channel number
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }
}

// ============================================================================
// Device Config
// ============================================================================

/// Device identity advertised on the FE-C information pages.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceConfig {
    /// Advertised device name
    pub name: ShortString,
    /// Manufacturer identifier
    pub manufacturer_id: u16,
    /// Model number
    pub model: u16,
    /// Hardware revision
    pub hardware_rev: u8,
    /// Software revision
    pub software_rev: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: short_string("rs-bikez"),
            manufacturer_id: 0x00FF,
            model: 1,
            hardware_rev: 1,
            software_rev: 1,
        }
    }
}

impl DeviceConfig {
    /// Set the device name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = short_string(name);
        self
    }

    /// Set the manufacturer identifier
    pub fn with_manufacturer_id(mut self, id: u16) -> Self {
        self.manufacturer_id = id;
        self
    }

    /// Set the model number
    pub fn with_model(mut self, model: u16) -> Self {
        self.model = model;
        self
    }
}
