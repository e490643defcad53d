use clap::Parser;
use log::info;
use s0pcm2mqtt::{today, Config, Measurement, MeasurementStore, MqttManager, SerialManager, SnapshotExchange};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Parser)]
#[command(name = "s0pcm2mqtt", about = "S0 Pulse Counter Module reader")]
struct Args {
    /// Directory where the configuration and measurement files reside
    #[arg(short, long, default_value = "./")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging
    let default_filter = std::env::var("S0PCM_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let args = Args::parse();

    let config = Config::load(&args.config)?;

    let store = MeasurementStore::new(&args.config);
    let measurement = store.load();

    /* The one value both workers share, plus the process wide stop flag */
    let exchange = Arc::new(SnapshotExchange::new(Measurement::new(today())));
    let stop = Arc::new(AtomicBool::new(false));

    let mut threads: Vec<JoinHandle<()>> = Vec::new();

    // Start the serial reader
    let mut serial = SerialManager::new(config.serial.clone(), store, measurement, exchange.clone(), stop.clone());
    threads.push(tokio::spawn(async move {
        serial.start_thread().await;
    }));

    // Start the MQTT publisher
    let mut mqtt = MqttManager::new(config, exchange, stop.clone());
    threads.push(tokio::spawn(async move {
        mqtt.start_thread().await;
    }));

    info!("All modules started, now waiting for a signal to exit");
    loop {
        tokio::time::sleep(Duration::from_secs(10)).await;

        let mut kill_all_tasks = stop.load(Ordering::SeqCst);
        for task in threads.iter() {
            if task.is_finished() {
                kill_all_tasks = true;
            }
        }

        /* One worker went down, wind down the rest and leave */
        if kill_all_tasks == true {
            for task in threads.iter_mut() {
                task.abort();
            }
            break;
        }
    }

    Ok(())
}
