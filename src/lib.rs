//! Read the pulse counters of a S0PCM-2 or S0PCM-5 over a serial port and
//! publish the total and daily counters to MQTT, for home automation
//! consumers like Home Assistant.
//!
//! The reader is not aware of liters vs m3: it counts pulses, the unit is
//! whatever one pulse means on your meter.

pub mod config;
pub mod exchange;
pub mod measurement;
pub mod mqtt;
pub mod s0pcm;
pub mod serial;

// Re-export the types main wires together
pub use config::Config;
pub use exchange::SnapshotExchange;
pub use measurement::store::MeasurementStore;
pub use measurement::Measurement;
pub use mqtt::MqttManager;
pub use serial::SerialManager;

/// The local calendar date, which is what the daily counters roll over on.
pub fn today() -> chrono::NaiveDate {
    return chrono::Local::now().date_naive();
}
