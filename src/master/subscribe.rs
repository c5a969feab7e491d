//! Subscriber plumbing: scheduler connections, operator event streams,
//! heartbeating, and event fan-out.

use super::{read_only, Framework, Master};
use crate::auth::{Action, AuthObject, ObjectApprovers};
use crate::pipe::PipeWriter;
use crate::recordio::encode_record;
use crate::wire::{
    self, ContentType, FrameworkId, MasterEvent, SchedulerEvent, StreamId, Subscribe,
};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// One live subscription: a shared pipe writer, the negotiated message
/// encoding, and the stream identity the subscriber must echo.
#[derive(Clone)]
pub struct HttpConnection {
    pub writer: PipeWriter,
    pub content_type: ContentType,
    pub stream_id: StreamId,
}

impl HttpConnection {
    pub fn new(writer: PipeWriter, content_type: ContentType, stream_id: StreamId) -> Self {
        HttpConnection {
            writer,
            content_type,
            stream_id,
        }
    }

    /// Writes one framed record. Returns false once the subscriber is
    /// gone (disconnected or hopelessly backlogged).
    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        match wire::serialize(self.content_type, message) {
            Ok(bytes) => self.writer.write(encode_record(&bytes)).is_ok(),
            Err(err) => {
                warn!("event=subscriber_encode_failed stream={} error={err}", self.stream_id);
                false
            }
        }
    }

    pub fn send_scheduler_event(&self, event: &SchedulerEvent) -> bool {
        self.send(event)
    }

    pub fn close(&self) {
        self.writer.close();
    }
}

/// An operator API event-stream subscriber with its approval snapshot.
pub struct Subscriber {
    pub connection: HttpConnection,
    pub approvers: Arc<ObjectApprovers>,
}

impl Subscriber {
    fn wants(&self, event: &MasterEvent) -> bool {
        match event {
            MasterEvent::TaskAdded { .. } | MasterEvent::TaskUpdated { .. } => self
                .approvers
                .approved(Action::ViewTask, &AuthObject::any()),
            MasterEvent::FrameworkAdded { framework }
            | MasterEvent::FrameworkUpdated { framework } => self.approvers.approved(
                Action::ViewFramework,
                &AuthObject {
                    framework_info: Some(framework.framework_info.clone()),
                    ..AuthObject::default()
                },
            ),
            MasterEvent::FrameworkRemoved { framework_info } => self.approvers.approved(
                Action::ViewFramework,
                &AuthObject {
                    framework_info: Some(framework_info.clone()),
                    ..AuthObject::default()
                },
            ),
            _ => true,
        }
    }
}

impl Master {
    /// Fans an event out to every operator subscriber whose approvers
    /// allow it. Subscribers whose pipe has failed are dropped.
    pub(crate) fn broadcast(&mut self, event: &MasterEvent) {
        let mut disconnected = Vec::new();
        for (stream_id, subscriber) in &self.subscribers {
            if !subscriber.wants(event) {
                continue;
            }
            if !subscriber.connection.send(event) {
                disconnected.push(*stream_id);
            }
        }
        for stream_id in disconnected {
            info!("event=subscriber_disconnected stream={stream_id}");
            self.subscribers.remove(&stream_id);
        }
    }

    /// Registers a scheduler subscription on the actor thread: creates
    /// or revives the framework record, replaces any prior connection
    /// (closing its pipe and invalidating its stream id), sends
    /// SUBSCRIBED, and starts the heartbeater.
    pub(crate) fn subscribe_framework(
        &mut self,
        subscribe: Subscribe,
        connection: HttpConnection,
    ) -> FrameworkId {
        let framework_id = subscribe
            .framework_info
            .id
            .clone()
            .unwrap_or_else(|| self.mint_framework_id());

        let mut info = subscribe.framework_info;
        info.id = Some(framework_id.clone());

        let known = self.frameworks.contains_key(&framework_id);
        let (summary, previous) = {
            let framework = self
                .frameworks
                .entry(framework_id.clone())
                .or_insert_with(|| Framework::new(framework_id.clone(), info.clone()));
            framework.info = info;
            framework.active = true;
            framework.connected = true;
            framework.recovered = false;
            let previous = framework.connection.replace(connection.clone());
            (framework.summary(), previous)
        };

        if let Some(previous) = previous {
            info!(
                "event=framework_connection_replaced framework={framework_id} \
                 old_stream={} new_stream={}",
                previous.stream_id, connection.stream_id
            );
            previous.close();
        } else {
            info!(
                "event=framework_subscribed framework={framework_id} stream={}",
                connection.stream_id
            );
        }

        connection.send_scheduler_event(&SchedulerEvent::Subscribed {
            framework_id: framework_id.clone(),
            heartbeat_interval_seconds: self.config.heartbeat_interval.as_secs_f64(),
            master_info: self.config.info.clone(),
        });
        connection.send_scheduler_event(&SchedulerEvent::Heartbeat);

        self.start_heartbeater(&connection, &SchedulerEvent::Heartbeat);

        let event = if known {
            MasterEvent::FrameworkUpdated { framework: summary }
        } else {
            MasterEvent::FrameworkAdded { framework: summary }
        };
        self.broadcast(&event);

        framework_id
    }

    /// Registers an operator API subscriber. The snapshot, SUBSCRIBED,
    /// and the first HEARTBEAT are produced inside this single actor
    /// turn; pipe writes are buffer appends, so no later event can be
    /// ordered before them on the stream.
    pub(crate) fn subscribe_operator(
        &mut self,
        connection: HttpConnection,
        approvers: Arc<ObjectApprovers>,
    ) {
        let snapshot = read_only::get_state(self, &approvers);
        connection.send(&MasterEvent::Subscribed {
            get_state: Box::new(snapshot),
            heartbeat_interval_seconds: self.config.heartbeat_interval.as_secs_f64(),
        });
        connection.send(&MasterEvent::Heartbeat);

        info!("event=operator_subscribed stream={}", connection.stream_id);
        self.start_heartbeater(&connection, &MasterEvent::Heartbeat);
        self.subscribers.insert(
            connection.stream_id,
            Subscriber {
                connection,
                approvers,
            },
        );
    }

    /// Spawns a timer that writes HEARTBEAT records until the pipe
    /// goes away. The event is serialized once up front.
    fn start_heartbeater<T: Serialize>(&self, connection: &HttpConnection, heartbeat: &T) {
        let Some(runtime) = self.runtime.clone() else {
            return;
        };
        let Ok(bytes) = wire::serialize(connection.content_type, heartbeat) else {
            return;
        };
        let writer = connection.writer.clone();
        let stream_id = connection.stream_id;
        let interval = self.config.heartbeat_interval;
        runtime.spawn(heartbeat_loop(writer, bytes, interval, stream_id));
    }
}

async fn heartbeat_loop(
    writer: PipeWriter,
    heartbeat: Vec<u8>,
    interval: Duration,
    stream_id: StreamId,
) {
    let mut timer = tokio::time::interval(interval);
    // The subscription path already sent the first HEARTBEAT.
    timer.tick().await;
    loop {
        timer.tick().await;
        if writer.is_closed() {
            break;
        }
        if writer.write(encode_record(&heartbeat)).is_err() {
            info!("event=heartbeat_stopped stream={stream_id}");
            break;
        }
    }
}

