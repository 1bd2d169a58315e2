//! Player Node
//!
//! A sensor node: reports hits to the host, keeps its link alive and
//! answers clock probes. It never decides anything about the game.

use tracing::{debug, info, warn};

use crate::core::clock::{IntervalTimer, Timestamp};
use crate::game::events::Notification;
use crate::game::mode::Player;
use crate::network::clock_sync::answer_probe;
use crate::network::peer::PeerTable;
use crate::network::record::{Datagram, EventMessage, HOST_ID};
use crate::network::transport::HardwareAddr;
use crate::node::{Node, NodeConfig, NodeError, Outbox, Outgoing};

/// Extra copies of the last hit still to be sent.
#[derive(Debug, Clone, Copy)]
struct PendingRepeat {
    hit: EventMessage,
    remaining: u8,
    timer: IntervalTimer,
}

/// A player's sensor node.
#[derive(Debug)]
pub struct PlayerNode {
    player: Player,
    config: NodeConfig,
    peers: PeerTable,
    heartbeat_timer: IntervalTimer,
    repeat: Option<PendingRepeat>,
    outbox: Outbox,
    notifications: Vec<Notification>,
}

impl PlayerNode {
    /// Build from configuration. The node id must be a player id and the
    /// host needs a fixed address.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        let player = Player::from_id(config.node_id)
            .ok_or_else(|| NodeError::Invalid(format!("node {} is not a player", config.node_id)))?;
        let peers = config.peer_table()?;
        if peers.address_of(HOST_ID).is_none() {
            return Err(NodeError::Invalid("player needs the host address".into()));
        }

        Ok(Self {
            player,
            heartbeat_timer: IntervalTimer::from_millis(config.heartbeat_interval_ms),
            repeat: None,
            outbox: Outbox::default(),
            notifications: Vec::new(),
            peers,
            config,
        })
    }

    /// Which player this node reports for.
    pub fn player(&self) -> Player {
        self.player
    }

    /// Whether the host link is up.
    pub fn is_host_connected(&self) -> bool {
        self.peers.is_connected(HOST_ID)
    }

    /// Peer links.
    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// Report a hit detected at `now` on the local clock.
    ///
    /// The record is sent immediately and repeated a few times with the same
    /// timestamp. The host collapses the copies into one hit.
    pub fn report_hit(&mut self, strength: u16, now: Timestamp) {
        let hit = EventMessage::Hit {
            source_id: self.player.id(),
            raw_time: now,
            strength,
        };
        info!("Hit at {} (strength {})", now, strength);
        self.outbox.send_event(&self.peers, HOST_ID, &hit);

        self.repeat = (self.config.hit_repeat_count > 0).then(|| PendingRepeat {
            hit,
            remaining: self.config.hit_repeat_count,
            timer: IntervalTimer::started_at(self.config.hit_repeat_interval_ms, now),
        });
    }

    /// Ask the host to open a new round.
    pub fn request_reset(&mut self) {
        let msg = EventMessage::ResetRequest { source_id: self.player.id() };
        self.outbox.send_event(&self.peers, HOST_ID, &msg);
    }
}

impl Node for PlayerNode {
    fn node_id(&self) -> u8 {
        self.player.id()
    }

    fn handle_datagram(&mut self, from: HardwareAddr, bytes: &[u8], now: Timestamp) {
        let msg = match Datagram::decode(bytes) {
            Ok(Datagram::Event(msg)) if msg.source_id() == HOST_ID => msg,
            Ok(other) => {
                debug!("Player ignores datagram from node {}", other.sender_id());
                return;
            }
            Err(e) => {
                debug!("Dropped datagram from {}: {}", from, e);
                return;
            }
        };

        self.peers.on_datagram_from(HOST_ID, from);
        if self.peers.mark_seen(HOST_ID, now) {
            info!("Host connected");
            self.notifications.push(Notification::peer_connected(now, HOST_ID));
        }

        match msg {
            EventMessage::SyncProbe { sent_at } => {
                let reply = answer_probe(self.player.id(), sent_at, now);
                self.outbox.send_event(&self.peers, HOST_ID, &reply);
            }
            EventMessage::Heartbeat { .. } => {}
            other => debug!("Player ignores {:?}", other),
        }
    }

    fn tick(&mut self, now: Timestamp) {
        for id in self.peers.tick(now) {
            warn!("Host link lost");
            self.notifications.push(Notification::peer_disconnected(now, id));
        }

        if self.heartbeat_timer.poll(now) {
            let hb = EventMessage::Heartbeat { source_id: self.player.id() };
            self.outbox.send_event(&self.peers, HOST_ID, &hb);
        }

        if let Some(mut pending) = self.repeat.take() {
            if pending.timer.poll(now) {
                self.outbox.send_event(&self.peers, HOST_ID, &pending.hit);
                pending.remaining -= 1;
            }
            if pending.remaining > 0 {
                self.repeat = Some(pending);
            }
        }
    }

    fn take_outgoing(&mut self) -> Vec<Outgoing> {
        self.outbox.take()
    }

    fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }
}
