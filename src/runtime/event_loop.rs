//! The runtime driving one [`MqttModule`] over one broker session.

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::client::{MqttClient, MqttEvent, MqttOptions};
use crate::error::{MqttError, ProtocolError};
use crate::transport::MqttTransport;

use super::registry::TopicRegistry;
use super::traits::MqttModule;

/// Signal used to ask a running [`MqttRuntime`] to disconnect.
///
/// Typically a `static`, signalled from any task with `SHUTDOWN.signal(())`.
pub type ShutdownSignal = Signal<CriticalSectionRawMutex, ()>;

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stopped {
    /// The shutdown signal fired; DISCONNECT was sent.
    Shutdown,
    /// The broker closed the connection.
    ConnectionClosed,
}

/// Drives a module over broker sessions.
///
/// Each call to [`run`](Self::run) is one session: handshake, subscription of
/// every registered topic, then message dispatch until shutdown or
/// disconnection. Calling `run` again with a fresh transport reconnects and
/// re-subscribes; the runtime itself never retries.
///
/// # Type Parameters
///
/// - `MAX_TOPICS`: Maximum number of topics the module may register
/// - `BUF_SIZE`: Client buffer size; bounds the largest receivable message
pub struct MqttRuntime<'a, M, const MAX_TOPICS: usize, const BUF_SIZE: usize>
where
    M: MqttModule,
{
    options: MqttOptions<'a>,
    module: M,
    shutdown: &'a ShutdownSignal,
}

impl<'a, M, const MAX_TOPICS: usize, const BUF_SIZE: usize> MqttRuntime<'a, M, MAX_TOPICS, BUF_SIZE>
where
    M: MqttModule,
{
    pub fn new(options: MqttOptions<'a>, module: M, shutdown: &'a ShutdownSignal) -> Self {
        Self {
            options,
            module,
            shutdown,
        }
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut M {
        &mut self.module
    }

    /// Runs one session over `transport`.
    ///
    /// A refused handshake is reported to the module, logged and returned as
    /// `MqttError::ConnectionRefused` without any SUBSCRIBE being sent. On
    /// shutdown the client sends DISCONNECT and closes the transport; on every
    /// other exit the transport is only dropped.
    pub async fn run<T>(&mut self, transport: T) -> Result<Stopped, MqttError<T::Error>>
    where
        T: MqttTransport,
    {
        let mut client = MqttClient::<T, MAX_TOPICS, BUF_SIZE>::new(transport, self.options);

        match client.connect().await {
            Ok(code) => {
                info!(
                    "Connected to {}:{}",
                    self.options.host(),
                    self.options.port()
                );
                self.module.on_connect(code);
            }
            Err(MqttError::ConnectionRefused(code)) => {
                error!("Connection failed with code {}", code.code());
                self.module.on_connect(code);
                return Err(MqttError::ConnectionRefused(code));
            }
            Err(e) => return Err(e),
        }

        self.subscribe_all(&mut client).await?;

        loop {
            let event = match select(self.shutdown.wait(), client.poll()).await {
                Either::First(()) => None,
                Either::Second(Ok(event)) => Some(event),
                Either::Second(Err(MqttError::Protocol(ProtocolError::ConnectionClosed))) => {
                    warn!("Broker closed the connection");
                    return Ok(Stopped::ConnectionClosed);
                }
                Either::Second(Err(e)) => return Err(e),
            };

            let Some(event) = event else {
                info!("Shutdown requested");
                client.disconnect().await?;
                return Ok(Stopped::Shutdown);
            };

            match event {
                Some(MqttEvent::Publish(msg)) => self.module.on_message(&msg),
                Some(MqttEvent::SubAck(ack)) => {
                    if ack.has_failure() {
                        warn!("Subscription {} rejected by broker", ack.packet_id);
                    } else {
                        debug!("Subscription {} acknowledged", ack.packet_id);
                    }
                }
                None => {}
            }
        }
    }

    async fn subscribe_all<T>(
        &mut self,
        client: &mut MqttClient<'a, T, MAX_TOPICS, BUF_SIZE>,
    ) -> Result<(), MqttError<T::Error>>
    where
        T: MqttTransport,
    {
        let mut registry = TopicRegistry::<MAX_TOPICS>::new();
        self.module.register(&mut registry);

        let qos = self.options.subscribe_qos();
        for topic in registry.iter() {
            client.subscribe(topic, qos).await?;
            info!("Subscribed to topic: {}", topic);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectReasonCode;
    use crate::packet::Publish;
    use crate::runtime::TopicCollector;
    use crate::testing::{self, ScriptedTransport};
    use futures::executor::block_on;
    use std::string::String;
    use std::vec::Vec;

    #[derive(Default)]
    struct Recorder {
        topics: Vec<&'static str>,
        connects: Vec<ConnectReasonCode>,
        messages: Vec<(String, Vec<u8>)>,
    }

    impl MqttModule for Recorder {
        fn register(&self, collector: &mut dyn TopicCollector) {
            for topic in &self.topics {
                collector.add(topic);
            }
        }

        fn on_message(&mut self, msg: &Publish<'_>) {
            self.messages.push((msg.topic.into(), msg.payload.to_vec()));
        }

        fn on_connect(&mut self, code: ConnectReasonCode) {
            self.connects.push(code);
        }
    }

    fn recorder(topics: &[&'static str]) -> Recorder {
        Recorder {
            topics: topics.to_vec(),
            ..Default::default()
        }
    }

    fn options() -> MqttOptions<'static> {
        MqttOptions::new("runtime-test", "broker.local", 1883)
    }

    #[test]
    fn accepted_connection_subscribes_once_and_dispatches() {
        let shutdown = ShutdownSignal::new();
        let (transport, sent) = ScriptedTransport::new([
            testing::connack(0),
            testing::suback(1, 0x00),
            testing::publish("emqx/esp32", b"21.5"),
            testing::pingresp(),
        ]);
        let mut runtime =
            MqttRuntime::<_, 4, 256>::new(options(), recorder(&["emqx/esp32"]), &shutdown);

        let stopped = block_on(runtime.run(transport)).unwrap();

        assert_eq!(stopped, Stopped::ConnectionClosed);
        assert_eq!(sent.count(testing::SUBSCRIBE), 1);
        assert_eq!(runtime.module().connects, [ConnectReasonCode::Success]);
        assert_eq!(
            runtime.module().messages,
            [(String::from("emqx/esp32"), b"21.5".to_vec())]
        );
    }

    #[test]
    fn refused_connection_never_subscribes() {
        let shutdown = ShutdownSignal::new();
        let (transport, sent) = ScriptedTransport::new([testing::connack(3)]);
        let mut runtime =
            MqttRuntime::<_, 4, 256>::new(options(), recorder(&["emqx/esp32"]), &shutdown);

        let err = block_on(runtime.run(transport)).unwrap_err();

        assert_eq!(
            err,
            MqttError::ConnectionRefused(ConnectReasonCode::ServerUnavailable)
        );
        assert_eq!(sent.count(testing::SUBSCRIBE), 0);
        assert_eq!(
            runtime.module().connects,
            [ConnectReasonCode::ServerUnavailable]
        );
    }

    #[test]
    fn every_session_resubscribes() {
        let shutdown = ShutdownSignal::new();
        let mut runtime =
            MqttRuntime::<_, 4, 256>::new(options(), recorder(&["emqx/esp32"]), &shutdown);

        let mut subscribes = 0;
        for _ in 0..2 {
            let (transport, sent) = ScriptedTransport::new([testing::connack(0)]);
            block_on(runtime.run(transport)).unwrap();
            subscribes += sent.count(testing::SUBSCRIBE);
        }

        assert_eq!(subscribes, 2);
        assert_eq!(runtime.module().connects.len(), 2);
    }

    #[test]
    fn shutdown_sends_disconnect() {
        let shutdown = ShutdownSignal::new();
        let (transport, sent) = ScriptedTransport::new([testing::connack(0)]);
        let transport = transport.hang_when_drained();
        let mut runtime =
            MqttRuntime::<_, 4, 256>::new(options(), recorder(&["emqx/esp32"]), &shutdown);

        shutdown.signal(());
        let stopped = block_on(runtime.run(transport)).unwrap();

        assert_eq!(stopped, Stopped::Shutdown);
        assert_eq!(sent.count(testing::DISCONNECT), 1);
        assert!(sent.closed());
    }

    #[test]
    fn module_without_topics_subscribes_nothing() {
        let shutdown = ShutdownSignal::new();
        let (transport, sent) = ScriptedTransport::new([testing::connack(0)]);
        let mut runtime = MqttRuntime::<_, 4, 256>::new(options(), recorder(&[]), &shutdown);

        block_on(runtime.run(transport)).unwrap();

        assert_eq!(sent.count(testing::SUBSCRIBE), 0);
    }
}
