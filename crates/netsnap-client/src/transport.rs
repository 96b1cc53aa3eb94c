// transport.rs — external transport collaborator contract.
// Converted from: myq2-original/qcommon/net.rs NetAdr parsing and the
// connectionless/connected send paths in net_chan.rs, narrowed to the
// abstract contract this engine needs: connect/disconnect/poll/send, with
// datagram send/receive itself left to the embedder. The original's
// concrete UDP socket plumbing is out of scope here.

use std::fmt;

/// Opaque handle to one transport-level connection. The engine treats any
/// event carrying an id it didn't hand out as foreign and ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub i32);

impl ConnectionId {
    pub const INVALID: ConnectionId = ConnectionId(-1);

    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }
}

/// One event drained from the transport during [`Transport::next_event`].
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connect { connection: ConnectionId },
    Disconnect { connection: ConnectionId },
    Data { connection: ConnectionId, bytes: Vec<u8> },
}

/// `host[:port]` endpoint syntax from the original's connect string
/// handling (`NET_StringToAdr`). Port is `None` when omitted, in which
/// case the transport substitutes its own default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn parse(spec: &str) -> Self {
        match spec.rsplit_once(':') {
            Some((host, port)) => match port.parse() {
                Ok(port) => Endpoint {
                    host: host.to_string(),
                    port: Some(port),
                },
                Err(_) => Endpoint {
                    host: spec.to_string(),
                    port: None,
                },
            },
            None => Endpoint {
                host: spec.to_string(),
                port: None,
            },
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}

/// The unreliable datagram transport this engine rides on. Implemented by
/// the embedder (UDP socket, in-process test double, etc); this crate
/// never opens a socket itself.
pub trait Transport {
    /// Begin connecting to `endpoint`. Returns the connection id to use for
    /// all further calls, or `ConnectionId::INVALID` on immediate failure
    /// (e.g. DNS resolution failure — per the spec, the first IPv4 result
    /// is used when a host resolves to several).
    fn connect(&mut self, endpoint: &Endpoint) -> ConnectionId;

    /// Request the transport close `connection`. Synchronous and
    /// idempotent: the actual teardown is observed later via a
    /// `TransportEvent::Disconnect`.
    fn disconnect(&mut self, connection: ConnectionId);

    /// Pump the transport's internal state (socket reads, timers). Must be
    /// called once per tick before draining events.
    fn update(&mut self);

    /// Pop the next queued event, if any. Events for a given connection
    /// are FIFO.
    fn next_event(&mut self) -> Option<TransportEvent>;

    /// Send a raw package to `connection`. No-op if `connection` is
    /// already torn down.
    fn send(&mut self, connection: ConnectionId, bytes: &[u8]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parses_host_and_port() {
        let e = Endpoint::parse("example.com:27910");
        assert_eq!(e.host, "example.com");
        assert_eq!(e.port, Some(27910));
    }

    #[test]
    fn endpoint_without_port_has_none() {
        let e = Endpoint::parse("example.com");
        assert_eq!(e.host, "example.com");
        assert_eq!(e.port, None);
    }

    #[test]
    fn invalid_connection_id_is_negative() {
        assert!(!ConnectionId::INVALID.is_valid());
        assert!(ConnectionId(0).is_valid());
    }
}
