use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use metrics::{counter, gauge};

use crate::connection::Connection;
use crate::error::{ConnectionError, RelayError};
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};
use crate::presence::Presence;
use crate::registry::Registry;
use crate::signal::{Inbound, Outbound};

/// Drives one authenticated connection through its session: join, relay,
/// cleanup.
#[derive(Clone)]
pub struct SignalRouter {
    presence: Presence,
}

impl SignalRouter {
    pub fn new(presence: Presence) -> Self {
        Self { presence }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.presence.registry()
    }

    /// Run the session of `identity` in `room` until its transport ends.
    ///
    /// The registry owns the connection while it is joined; the router keeps
    /// a handle only to answer heartbeats and to notice when the registry
    /// closes it. Cleanup runs exactly once, when this returns.
    pub async fn run<S>(&self, room: &str, identity: &str, connection: Connection, mut inbound: S)
    where
        S: Stream<Item = Result<String, ConnectionError>> + Unpin,
    {
        let registry = self.registry();
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        registry.join(room, identity, connection.clone());
        tracing::info!(
            room = %room,
            identity = %identity,
            connection = %connection.id(),
            "Participant joined"
        );
        self.presence.joined(room, identity);

        loop {
            let frame = tokio::select! {
                _ = connection.closed() => {
                    tracing::debug!(room = %room, identity = %identity, "Connection closed locally");
                    break;
                }
                frame = inbound.next() => frame,
            };

            let result = match frame {
                Some(Ok(text)) => self.dispatch(room, identity, &connection, &text),
                Some(Err(e)) => Err(e),
                None => Err(ConnectionError::Closed),
            };

            match result {
                Ok(()) => {}
                Err(ConnectionError::Closed) => break,
                Err(e) => {
                    tracing::warn!(room = %room, identity = %identity, error = %e, "Closing connection");
                    break;
                }
            }
        }

        if registry.leave_connection(room, identity, connection.id()) {
            self.presence.departed(room, identity);
        }
        connection.close();
        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    }

    /// Handle one inbound frame. An error ends the session.
    fn dispatch(
        &self,
        room: &str,
        identity: &str,
        connection: &Connection,
        frame: &str,
    ) -> Result<(), ConnectionError> {
        let inbound = Inbound::decode(frame)?;

        match inbound {
            Inbound::Heartbeat => {
                let reply = Outbound::HeartbeatResponse.encode()?;
                connection.send(reply)
            }
            Inbound::Unknown => {
                tracing::debug!(room = %room, identity = %identity, "Ignoring unknown message type");
                Ok(())
            }
            relayed => {
                if let Some((Some(target), outbound)) = Outbound::relayed(identity, relayed) {
                    self.relay(room, identity, &target, &outbound)?;
                }
                Ok(())
            }
        }
    }

    fn relay(
        &self,
        room: &str,
        from: &str,
        target: &str,
        outbound: &Outbound,
    ) -> Result<(), serde_json::Error> {
        let frame = outbound.encode()?;
        match self.registry().send_to(room, target, &frame) {
            Ok(()) => {}
            Err(RelayError::NoSuchRecipient) => {
                tracing::debug!(room = %room, from = %from, target = %target, "Dropping message for absent recipient");
            }
            Err(RelayError::Departed(gone)) => self.presence.departed(room, &gone),
        }
        Ok(())
    }
}
