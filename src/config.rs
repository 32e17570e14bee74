//! Configuration surface (§6.4): recognised keys, the tagged value
//! variant, and the two samplerate tables. String parsing of raw
//! config values is explicitly out of scope (§1) — this module only
//! carries the already-parsed, tagged representation.

extern crate alloc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    Conn,
    DeviceMode,
    Samplerate,
    LimitSamples,
    ExternalClock,
    TestMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    UInt64(u64),
    Int32(i32),
    Str(alloc::string::String),
    Bool(bool),
    UInt64Pair(u64, u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    LogicAnalyzer,
    Oscilloscope,
    DataAcquisition,
}

impl DeviceMode {
    pub fn name(self) -> &'static str {
        match self {
            DeviceMode::LogicAnalyzer => "Logic Analyzer",
            DeviceMode::Oscilloscope => "Oscilloscope",
            DeviceMode::DataAcquisition => "Data Acquisition",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestMode {
    None,
    Internal,
    External,
    DramLoopback,
}

impl TestMode {
    pub fn name(self) -> &'static str {
        match self {
            TestMode::None => "None",
            TestMode::Internal => "Internal Test",
            TestMode::External => "External Test",
            TestMode::DramLoopback => "DRAM Loopback Test",
        }
    }
}

pub const BASE_SAMPLERATES_HZ: &[u64] = &[
    20_000, 25_000, 50_000, 100_000, 200_000, 250_000, 500_000, 1_000_000, 2_000_000, 3_000_000,
    4_000_000, 6_000_000, 8_000_000, 12_000_000, 16_000_000, 24_000_000,
];

pub const DSLOGIC_SAMPLERATES_HZ: &[u64] = &[
    10_000,
    20_000,
    50_000,
    100_000,
    200_000,
    500_000,
    1_000_000,
    2_000_000,
    5_000_000,
    10_000_000,
    20_000_000,
    25_000_000,
    50_000_000,
    100_000_000,
    200_000_000,
    400_000_000,
];

/// Fixed trigger-type string recognised in `config_list` (§6.4).
pub const TRIGGER_TYPES: &str = "01";

#[cfg(test)]
#[path = "tests/config.rs"]
mod tests;
