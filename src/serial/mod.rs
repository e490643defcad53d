use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};

use crate::config::SerialConfig;
use crate::exchange::SnapshotExchange;
use crate::measurement::store::MeasurementStore;
use crate::measurement::Measurement;
use crate::s0pcm;
use crate::today;

fn parity_from(value: &str) -> Parity {
    return match value.to_lowercase().as_str() {
        "none" => Parity::None,
        "odd" => Parity::Odd,
        "even" => Parity::Even,
        other => {
            warn!("Unknown parity '{other}', using 'even'");
            Parity::Even
        }
    };
}

fn stop_bits_from(value: u8) -> StopBits {
    return match value {
        1 => StopBits::One,
        2 => StopBits::Two,
        other => {
            warn!("Unknown stopbits '{other}', using 1");
            StopBits::One
        }
    };
}

fn data_bits_from(value: u8) -> DataBits {
    return match value {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        8 => DataBits::Eight,
        other => {
            warn!("Unknown bytesize '{other}', using 7");
            DataBits::Seven
        }
    };
}

/// Ingestion worker. Owns the serial connection and the live counter state:
/// every accepted telegram runs through the parser and the accumulator, is
/// persisted when it changed anything, and always ends up as a fresh
/// snapshot for the MQTT side.
pub struct SerialManager {
    config: SerialConfig,
    store: MeasurementStore,
    measurement: Measurement,
    exchange: Arc<SnapshotExchange>,
    stop: Arc<AtomicBool>,
}

impl SerialManager {
    pub fn new(config: SerialConfig, store: MeasurementStore, measurement: Measurement,
               exchange: Arc<SnapshotExchange>, stop: Arc<AtomicBool>) -> Self {
        return SerialManager { config, store, measurement, exchange, stop };
    }

    pub async fn start_thread(&mut self) {
        info!("Starting S0PCM serial thread");

        if let Err(e) = self.read_serial().await {
            error!("Serial thread failed: '{e}'");
            self.stop.store(true, Ordering::SeqCst);
        }
    }

    /// Connect loop around a read loop. Open failures and read errors are
    /// never fatal, the port is simply reopened after `connect_retry`
    /// seconds, for as long as the process lives.
    async fn read_serial(&mut self) -> std::io::Result<()> {
        while !self.stop.load(Ordering::SeqCst) {
            debug!("Opening serialport '{}'", self.config.port);

            let builder = tokio_serial::new(self.config.port.clone(), self.config.baudrate)
                .parity(parity_from(&self.config.parity))
                .stop_bits(stop_bits_from(self.config.stopbits))
                .data_bits(data_bits_from(self.config.bytesize));

            let port = match SerialStream::open(&builder) {
                Ok(port) => port,
                Err(e) => {
                    error!("Serialport connection failed: '{e}'");
                    error!("Retry in {} seconds", self.config.connect_retry);
                    sleep(Duration::from_secs(self.config.connect_retry)).await;
                    continue;
                }
            };

            let mut reader = BufReader::new(port);
            let mut buffer: Vec<u8> = Vec::new();

            /* Read lines while the port stays open, any error drops back
               into the connect loop */
            while !self.stop.load(Ordering::SeqCst) {
                buffer.clear();

                let read = match self.config.timeout {
                    Some(secs) => {
                        match tokio::time::timeout(Duration::from_secs(secs), reader.read_until(b'\n', &mut buffer)).await {
                            Ok(read) => read,
                            Err(_) => {
                                debug!("Failed to read data (nothing received)");
                                continue;
                            }
                        }
                    }
                    None => reader.read_until(b'\n', &mut buffer).await,
                };

                match read {
                    Ok(0) => {
                        error!("Serialport closed while reading");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Serialport read error: '{e}'");
                        break;
                    }
                }

                let line = match std::str::from_utf8(&buffer) {
                    Ok(line) => line.trim_end_matches(['\r', '\n']),
                    Err(_) => {
                        error!("Failed to decode '{:?}'", buffer);
                        continue;
                    }
                };

                self.process_line(line).await?;
            }
        }

        return Ok(());
    }

    /// Parser, accumulator, persistence and snapshot hand-off for one line.
    /// Only a failure to write the measurement file escapes, everything
    /// else is logged and survived.
    async fn process_line(&mut self, line: &str) -> std::io::Result<()> {
        let reading = match s0pcm::parse_telegram(line) {
            Ok(Some(reading)) => reading,
            Ok(None) => return Ok(()),
            Err(e) => {
                error!("{e}");
                return Ok(());
            }
        };

        debug!("Telegram from s0pcm '{}' with {} channels", reading.device_id, reading.channels.len());

        if self.measurement.apply(&reading, today()) {
            self.store.save(&self.measurement)?;
        } else {
            debug!("No change to the measurement file (no write)");
        }

        /* Hand the new state to the MQTT side whether or not it was worth
           persisting: the publisher applies its own change filter */
        self.exchange.publish(self.measurement.clone()).await;

        return Ok(());
    }
}
