//! Radio Transport
//!
//! The radio is an external collaborator: fire-and-forget sends of small
//! fixed-size datagrams to a 6-byte hardware address, and an asynchronous
//! receive callback. [`UdpRadio`] stands in for it when nodes run as
//! ordinary processes; the six address bytes are an IPv4 address and port.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use serde::{Serialize, Deserialize};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::network::mailbox::MailboxSender;

/// 6-byte radio hardware address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HardwareAddr(pub [u8; 6]);

impl HardwareAddr {
    /// Parse `AA:BB:CC:DD:EE:FF` (or without separators).
    pub fn parse(s: &str) -> Option<HardwareAddr> {
        let cleaned: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let bytes = hex::decode(cleaned).ok()?;
        let arr: [u8; 6] = bytes.try_into().ok()?;
        Some(HardwareAddr(arr))
    }

    /// Address of a UDP endpoint.
    pub fn from_socket(addr: SocketAddrV4) -> HardwareAddr {
        let ip = addr.ip().octets();
        let port = addr.port().to_be_bytes();
        HardwareAddr([ip[0], ip[1], ip[2], ip[3], port[0], port[1]])
    }

    /// UDP endpoint for this address.
    pub fn to_socket(self) -> SocketAddrV4 {
        let b = self.0;
        SocketAddrV4::new(Ipv4Addr::new(b[0], b[1], b[2], b[3]), u16::from_be_bytes([b[4], b[5]]))
    }
}

impl std::fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|b| hex::encode_upper([*b])).collect();
        write!(f, "{}", parts.join(":"))
    }
}

/// Outbound half of the radio.
pub trait Radio {
    /// Queue a datagram for `to`. Never waits for completion; failures are
    /// treated as radio loss.
    fn send(&self, to: HardwareAddr, bytes: &[u8]);
}

/// Transport errors. Only startup can fail.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket bind failed.
    #[error("failed to bind radio socket: {0}")]
    Bind(#[from] std::io::Error),

    /// The UDP stand-in only speaks IPv4.
    #[error("address {0} is not IPv4")]
    NotIpv4(SocketAddr),
}

/// UDP socket posing as the radio.
#[derive(Debug, Clone)]
pub struct UdpRadio {
    socket: Arc<UdpSocket>,
    local: HardwareAddr,
}

impl UdpRadio {
    /// Bind to `addr`.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        let local = match socket.local_addr()? {
            SocketAddr::V4(v4) => HardwareAddr::from_socket(v4),
            other => return Err(TransportError::NotIpv4(other)),
        };
        Ok(Self { socket: Arc::new(socket), local })
    }

    /// Own address.
    pub fn local_addr(&self) -> HardwareAddr {
        self.local
    }

    /// Feed received datagrams into `mailbox` until the socket fails.
    ///
    /// This is the receive callback: it does nothing but hand bytes over.
    pub async fn run_receiver(self, mailbox: MailboxSender) {
        let mut buf = [0u8; 64];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, SocketAddr::V4(from))) => {
                    if !mailbox.deliver(HardwareAddr::from_socket(from), &buf[..len]) {
                        debug!("Dropped {} byte datagram from {}", len, from);
                    }
                }
                Ok((_, from)) => debug!("Ignoring non-IPv4 sender {}", from),
                Err(e) => {
                    warn!("Radio receive failed: {}", e);
                    break;
                }
            }
        }
    }
}

impl Radio for UdpRadio {
    fn send(&self, to: HardwareAddr, bytes: &[u8]) {
        if let Err(e) = self.socket.try_send_to(bytes, SocketAddr::V4(to.to_socket())) {
            debug!("Send to {} failed: {}", to, e);
        }
    }
}
