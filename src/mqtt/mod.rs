use log::{debug, error, info};
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::Config;
use crate::exchange::SnapshotExchange;
use crate::measurement::Measurement;

/// One message ready to go out.
pub struct PublishData {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

fn status_topic(base_topic: &str) -> String {
    return format!("{base_topic}/status");
}

/// Publication worker. Owns the broker connection and the publish policy:
/// waits for a snapshot trigger (or a fixed interval), filters out values
/// the broker already has, and publishes the rest.
pub struct MqttManager {
    client: AsyncClient,
    config: Config,
    connected: Arc<AtomicBool>,
    exchange: Arc<SnapshotExchange>,
    stop: Arc<AtomicBool>,
    /// Per channel/field values of the last published cycle. Starts empty
    /// so the first cycle publishes everything.
    previous: HashMap<(u8, &'static str), u64>,
}

impl MqttManager {
    pub fn new(config: Config, exchange: Arc<SnapshotExchange>, stop: Arc<AtomicBool>) -> Self {
        let mqtt = &config.mqtt;
        info!("MQTT connection to '{}:{}' starting up", mqtt.host, mqtt.port);

        let mut mqttoptions = MqttOptions::new(mqtt.client_id.clone(), mqtt.host.clone(), mqtt.port);
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        mqttoptions.set_last_will(LastWill::new(status_topic(&mqtt.base_topic), "offline", QoS::AtLeastOnce, true));
        if let (Some(username), Some(password)) = (&mqtt.username, &mqtt.password) {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

        /* The eventloop task owns the connection state: it flips the
           connected flag and keeps the status topic current, nothing more.
           Polling again after an error is what reconnects. */
        let connected = Arc::new(AtomicBool::new(false));
        let connected_c = connected.clone();
        let status_c = client.clone();
        let status = status_topic(&mqtt.base_topic);
        let connect_retry = mqtt.connect_retry;
        let stop_c = stop.clone();

        tokio::spawn(async move {
            info!("MQTT eventloop started");
            while !stop_c.load(Ordering::SeqCst) {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to the MQTT broker");
                        connected_c.store(true, Ordering::SeqCst);

                        let client = status_c.clone();
                        let topic = status.clone();
                        tokio::spawn(async move {
                            let _ = client.publish(topic, QoS::AtLeastOnce, true, "online").await;
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        connected_c.store(false, Ordering::SeqCst);
                        error!("MQTT connection failed: '{e}'");
                        error!("Retry in {connect_retry} seconds");
                        sleep(Duration::from_secs(connect_retry)).await;
                    }
                }
            }
        });

        return MqttManager {
            client,
            config,
            connected,
            exchange,
            stop,
            previous: HashMap::new(),
        };
    }

    pub async fn start_thread(&mut self) {
        info!("Starting MQTT publish thread");

        while !self.stop.load(Ordering::SeqCst) {
            /* With a fixed interval we poll, without one we wait for the
               serial side to hand over a snapshot. The trigger is cleared
               by consuming it, so a burst wakes us only once. */
            match self.config.mqtt.publish_interval {
                Some(secs) => sleep(Duration::from_secs(secs)).await,
                None => self.exchange.wait().await,
            }

            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            let snapshot = self.exchange.take().await;

            /* No buffering while the broker is away: this cycle is simply
               skipped and the baseline stays put, so everything that
               changed meanwhile goes out after the reconnect. */
            if !self.connected.load(Ordering::SeqCst) {
                debug!("Not connected to the MQTT broker");
                continue;
            }

            for publish in self.collect_publications(&snapshot) {
                debug!("MQTT publish of topic '{}' and value '{}'", publish.topic, publish.payload);

                if let Err(e) = self.client.publish(publish.topic, QoS::AtLeastOnce, publish.retain, publish.payload).await {
                    error!("MQTT publish failed: '{e}'");
                }
            }
        }

        info!("MQTT publish thread stopped");
    }

    /// Decide which channel/field values go out this cycle and move the
    /// baseline forward to this snapshot.
    fn collect_publications(&mut self, snapshot: &Measurement) -> Vec<PublishData> {
        let mqtt = &self.config.mqtt;
        let mut publications = Vec::new();
        let mut baseline = HashMap::new();

        for (channel, counter) in &snapshot.channels {
            let name = self.config.channel_name(*channel);

            for (field, value) in [("total", counter.total), ("today", counter.today)] {
                baseline.insert((*channel, field), value);

                if !self.config.channel_enabled(*channel) {
                    continue;
                }

                if mqtt.publish_onchange && self.previous.get(&(*channel, field)) == Some(&value) {
                    continue;
                }

                publications.push(PublishData {
                    topic: format!("{}/{}/{}", mqtt.base_topic, name, field),
                    payload: value.to_string(),
                    retain: mqtt.retain,
                });
            }
        }

        self.previous = baseline;
        return publications;
    }
}
