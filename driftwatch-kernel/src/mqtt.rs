use crate::config::MqttConf;
use crate::engine::ReconciliationEngine;
use crate::health::HealthTracker;
use crate::models::HeartbeatPayload;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tracing::{debug, error, info, warn};

pub fn spawn_mqtt_listener(conf: MqttConf, engine: Arc<ReconciliationEngine>, health: HealthTracker) {
    task::spawn(async move {
        health.mark_mqtt_connecting();
        let mut opts = MqttOptions::new("driftwatch-kernel", conf.host.clone(), conf.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 10);
        if let Err(e) = client.subscribe(conf.topic.clone(), QoS::AtLeastOnce).await {
            error!(topic = %conf.topic, error = ?e, "MQTT subscribe failed");
            return;
        }
        info!(host = %conf.host, port = conf.port, topic = %conf.topic, "MQTT listener started");

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    // rumqttc ne rejoue pas les abonnements après reconnexion
                    if let Err(e) = client.subscribe(conf.topic.clone(), QoS::AtLeastOnce).await {
                        warn!(error = ?e, "MQTT resubscribe failed");
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == conf.topic => {
                    let hb = match serde_json::from_slice::<HeartbeatPayload>(&p.payload) {
                        Ok(hb) => hb,
                        Err(e) => {
                            warn!(error = %e, "invalid heartbeat JSON on MQTT");
                            continue;
                        }
                    };
                    // un heartbeat lent ne bloque pas la boucle d'événements
                    let engine = engine.clone();
                    task::spawn(async move {
                        match engine.process_heartbeat(&hb).await {
                            Ok(instance) => {
                                debug!(instance = %instance.id, status = ?instance.status, "MQTT heartbeat processed")
                            }
                            Err(e) => warn!(
                                service = %hb.service_name,
                                instance_id = %hb.instance_id,
                                error = %e,
                                "MQTT heartbeat rejected"
                            ),
                        }
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = ?e, "MQTT error");
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}
