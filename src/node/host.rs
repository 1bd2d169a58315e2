//! Host Node
//!
//! The bridge between the players, the display and the console. Owns the
//! authoritative `GameState`.
//!
//! ## Responsibilities
//!
//! - Learn peer addresses and track liveness
//! - Probe every connected peer's clock
//! - Turn hit records into rounds and points
//! - Apply console commands
//! - Replicate the game to the display (snapshots or score events)
//! - Hold a won game in celebration, then reset it

use tracing::{debug, info, warn};

use crate::core::clock::{Deadline, IntervalTimer, Timestamp};
use crate::core::hash::short_hex;
use crate::game::events::{Notification, NotificationData};
use crate::game::hit::{HitOutcome, HitProcessor, RoundOutcome};
use crate::game::mode::{GameMode, Player};
use crate::game::render::PALETTE;
use crate::game::state::{GameError, GameState, SettingsChange};
use crate::network::clock_sync::ClockSync;
use crate::network::console::{ConsoleCommand, NavDirection, StatusReport};
use crate::network::peer::{PeerRole, PeerTable};
use crate::network::record::{Datagram, EventMessage, StateMessage, DISPLAY_ID, HOST_ID};
use crate::network::transport::HardwareAddr;
use crate::node::{Node, NodeConfig, NodeError, Outbox, Outgoing, ReplicationModel};

/// The authoritative node.
#[derive(Debug)]
pub struct HostNode {
    config: NodeConfig,
    peers: PeerTable,
    clock_sync: ClockSync,
    hits: HitProcessor,
    state: GameState,
    heartbeat_timer: IntervalTimer,
    broadcast_timer: IntervalTimer,
    celebration_hold: Deadline,
    outbox: Outbox,
    notifications: Vec<Notification>,
}

impl HostNode {
    /// Build from configuration.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        let track = config.track()?;
        let peers = config.peer_table()?;
        let state = GameState::new(config.initial_mode, track)
            .with_swap_rule(config.swap_rule)
            .with_colors(config.colors);

        Ok(Self {
            clock_sync: ClockSync::new(config.sync_interval_ms),
            hits: HitProcessor::new(config.hit.clone()),
            heartbeat_timer: IntervalTimer::from_millis(config.heartbeat_interval_ms),
            broadcast_timer: IntervalTimer::from_millis(config.state_broadcast_ms),
            celebration_hold: Deadline::default(),
            outbox: Outbox::default(),
            notifications: Vec::new(),
            peers,
            state,
            config,
        })
    }

    /// Authoritative game state.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Peer links.
    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// Hit processor.
    pub fn hits(&self) -> &HitProcessor {
        &self.hits
    }

    /// Current status for the console.
    pub fn status_report(&self) -> StatusReport {
        StatusReport::new(
            &self.state,
            self.hits.is_armed(),
            self.peers.iter(),
            &self.state.compute_hash(),
        )
    }

    fn notify(&mut self, now: Timestamp, data: NotificationData) {
        self.notifications.push(Notification::new(now, data));
    }

    // =========================================================================
    // INBOUND RECORDS
    // =========================================================================

    fn handle_event(&mut self, msg: EventMessage, now: Timestamp) {
        match msg {
            EventMessage::Heartbeat { .. } => {}
            EventMessage::Hit { source_id, raw_time, strength } => {
                let offset = self.peers.clock_offset(source_id);
                match self.hits.process(source_id, raw_time, strength, offset, now) {
                    Ok(HitOutcome::Duplicate) => debug!("Duplicate hit from node {}", source_id),
                    Ok(HitOutcome::Accepted { hit, decided }) => {
                        info!("Hit from {} at {} (strength {})", hit.player, hit.adjusted_time, hit.strength);
                        self.notifications
                            .push(Notification::hit(now, hit.player, hit.adjusted_time, hit.strength));
                        if let Some(outcome) = decided {
                            self.round_decided(outcome, now);
                        }
                    }
                    Err(e) => debug!("Dropped hit: {}", e),
                }
            }
            EventMessage::ResetRequest { source_id } => {
                info!("Round re-armed by node {}", source_id);
                self.hits.rearm();
            }
            EventMessage::SyncReply { source_id, sent_at, echo } => {
                if let Some(sample) = self.clock_sync.on_reply(source_id, sent_at, echo, now, &mut self.peers) {
                    debug!(
                        "Clock sync node {}: offset {}us, rtt {}us",
                        sample.node_id, sample.offset_us, sample.round_trip_us
                    );
                    self.notify(now, NotificationData::ClockSynced {
                        node_id: sample.node_id,
                        offset_us: sample.offset_us,
                        round_trip_us: sample.round_trip_us,
                    });
                }
            }
            EventMessage::SyncProbe { .. } => debug!("Ignoring probe carrying the host id"),
        }
    }

    fn handle_state(&mut self, msg: StateMessage, now: Timestamp) {
        match msg {
            StateMessage::Heartbeat { .. } => {}
            StateMessage::StateRequest { device_id } => {
                debug!("State requested by node {}", device_id);
                let restore = StateMessage::StateRestore {
                    device_id: HOST_ID,
                    snapshot: self.state.snapshot(),
                };
                self.outbox.send_state(&self.peers, device_id, &restore);
                self.notify(now, NotificationData::StateRequested);
            }
            other => debug!("Host ignores {:?} from node {}", other, other.device_id()),
        }
    }

    // =========================================================================
    // GAME
    // =========================================================================

    fn round_decided(&mut self, outcome: RoundOutcome, now: Timestamp) {
        info!("Round decided: {:?}", outcome);
        self.notifications.push(Notification::round_decided(now, outcome));
        if let (true, Some(winner)) = (self.config.hit.auto_award, outcome.winner()) {
            self.award(winner, 1, now);
        }
    }

    /// Apply points and replicate them.
    fn award(&mut self, player: Player, multiplier: u8, now: Timestamp) {
        match self.state.award_point(player, multiplier) {
            Ok(winner) => {
                self.notify(now, NotificationData::PointAwarded { player, multiplier });
                match self.config.replication {
                    ReplicationModel::FullState => self.broadcast_state(),
                    ReplicationModel::ScoreEvents => {
                        let score = StateMessage::Score { device_id: HOST_ID, player, multiplier };
                        self.outbox.send_state(&self.peers, DISPLAY_ID, &score);
                    }
                }
                if let Some(w) = winner {
                    info!("{} wins {}", w, self.state.mode().name());
                    self.notifications.push(Notification::game_won(now, w));
                    self.celebration_hold.arm(now, self.config.celebration_hold_ms);
                }
            }
            Err(GameError::Celebrating) => debug!("Award ignored during celebration"),
            Err(e) => self.notifications.push(Notification::rejected(now, e.to_string())),
        }
    }

    fn reset_game(&mut self, now: Timestamp) {
        self.state.reset();
        debug!("Game reset, state {}", short_hex(&self.state.compute_hash()));
        self.hits.rearm();
        self.celebration_hold.cancel();
        self.notify(now, NotificationData::GameReset);
        self.replicate_change(StateMessage::Reset { device_id: HOST_ID });
    }

    fn apply_settings(&mut self, mode: u8, color_a: u8, color_b: u8, now: Timestamp) {
        match self.state.apply_settings(mode, color_a, color_b) {
            Ok(SettingsChange::Unchanged) => {}
            Ok(change) => {
                let reset = change == SettingsChange::ModeChanged;
                if reset {
                    self.hits.rearm();
                    self.celebration_hold.cancel();
                }
                info!(
                    "Settings: {} with colours {}/{}{}",
                    self.state.mode().name(),
                    color_a,
                    color_b,
                    if reset { " (reset)" } else { "" }
                );
                self.notify(now, NotificationData::SettingsChanged {
                    mode: self.state.mode(),
                    colors: self.state.colors(),
                    reset,
                });
                self.replicate_change(StateMessage::ModeChange {
                    device_id: HOST_ID,
                    mode: self.state.mode(),
                    colors: self.state.colors(),
                });
            }
            Err(e) => {
                warn!("Rejected settings: {}", e);
                self.notifications.push(Notification::rejected(now, e.to_string()));
            }
        }
    }

    fn replicate_change(&mut self, event: StateMessage) {
        match self.config.replication {
            ReplicationModel::FullState => self.broadcast_state(),
            ReplicationModel::ScoreEvents => self.outbox.send_state(&self.peers, DISPLAY_ID, &event),
        }
    }

    fn broadcast_state(&mut self) {
        let msg = StateMessage::State {
            device_id: HOST_ID,
            snapshot: self.state.snapshot(),
        };
        self.outbox.send_state(&self.peers, DISPLAY_ID, &msg);
    }

    // =========================================================================
    // CONSOLE
    // =========================================================================

    /// Apply a console command.
    pub fn handle_command(&mut self, cmd: ConsoleCommand, now: Timestamp) {
        match cmd {
            ConsoleCommand::Heartbeat => {}
            ConsoleCommand::Reset => {
                info!("Console reset");
                self.reset_game(now);
            }
            ConsoleCommand::AwardPoint { player, multiplier } => match Player::from_id(player) {
                Some(p) => self.award(p, multiplier, now),
                None => self
                    .notifications
                    .push(Notification::rejected(now, format!("unknown player {}", player))),
            },
            ConsoleCommand::SettingsUpdate { mode, color_a, color_b } => {
                self.apply_settings(mode, color_a, color_b, now);
            }
            ConsoleCommand::StateSnapshot(fields) => {
                let restored = fields
                    .to_snapshot()
                    .map_err(|e| e.to_string())
                    .and_then(|s| self.state.restore(&s).map_err(|e| e.to_string()));
                match restored {
                    Ok(()) => {
                        info!("State restored from console");
                        if self.state.is_celebrating() {
                            self.celebration_hold.arm(now, self.config.celebration_hold_ms);
                        } else {
                            self.celebration_hold.cancel();
                        }
                        self.broadcast_state();
                    }
                    Err(message) => self.notifications.push(Notification::rejected(now, message)),
                }
            }
            ConsoleCommand::NavAction { direction } => {
                let colors = self.state.colors();
                let cycle = |c: u8| (c + 1) % PALETTE.len() as u8;
                let (mode, a, b) = match direction {
                    NavDirection::Left => (self.state.mode().previous(), colors.a, colors.b),
                    NavDirection::Right => (self.state.mode().next(), colors.a, colors.b),
                    NavDirection::Up => (self.state.mode(), cycle(colors.a), colors.b),
                    NavDirection::Down => (self.state.mode(), colors.a, cycle(colors.b)),
                };
                self.apply_settings(mode.as_u8(), a, b, now);
            }
        }
    }
}

impl Node for HostNode {
    fn node_id(&self) -> u8 {
        HOST_ID
    }

    fn handle_datagram(&mut self, from: HardwareAddr, bytes: &[u8], now: Timestamp) {
        let datagram = match Datagram::decode(bytes) {
            Ok(d) => d,
            Err(e) => {
                debug!("Dropped datagram from {}: {}", from, e);
                return;
            }
        };
        let sender = datagram.sender_id();
        if sender == HOST_ID || !self.peers.contains(sender) {
            debug!("Dropped datagram from unexpected node {}", sender);
            return;
        }

        if self.peers.on_datagram_from(sender, from) {
            debug!("Learned node {} at {}", sender, from);
        }

        // Sync replies are judged against the link state before this datagram
        if let Datagram::Event(msg @ EventMessage::SyncReply { .. }) = datagram {
            self.handle_event(msg, now);
        }

        if self.peers.mark_seen(sender, now) {
            info!("Node {} connected", sender);
            self.notifications.push(Notification::peer_connected(now, sender));
            if self.config.replication == ReplicationModel::FullState
                && self.peers.get(sender).map(|p| p.role) == Some(PeerRole::Display)
            {
                self.broadcast_state();
            }
        }

        match datagram {
            Datagram::Event(EventMessage::SyncReply { .. }) => {}
            Datagram::Event(msg) => self.handle_event(msg, now),
            Datagram::State(msg) => self.handle_state(msg, now),
        }
    }

    fn tick(&mut self, now: Timestamp) {
        for id in self.peers.tick(now) {
            warn!("Node {} timed out", id);
            self.clock_sync.abandon(id);
            self.notifications.push(Notification::peer_disconnected(now, id));
        }

        if let Some(outcome) = self.hits.poll(now) {
            self.round_decided(outcome, now);
        }

        if self.celebration_hold.expired(now) {
            info!("Celebration over, resetting");
            self.reset_game(now);
        }

        if self.heartbeat_timer.poll(now) {
            for peer in self.peers.connected_ids() {
                if peer == DISPLAY_ID {
                    self.outbox.send_state(&self.peers, peer, &StateMessage::Heartbeat { device_id: HOST_ID });
                } else {
                    self.outbox.send_event(&self.peers, peer, &EventMessage::Heartbeat { source_id: HOST_ID });
                }
            }
        }

        for (peer, probe) in self.clock_sync.due_probes(now, &self.peers) {
            self.outbox.send_event(&self.peers, peer, &probe);
        }

        if self.config.replication == ReplicationModel::FullState
            && self.broadcast_timer.poll(now)
            && self.peers.is_connected(DISPLAY_ID)
        {
            self.broadcast_state();
        }
    }

    fn take_outgoing(&mut self) -> Vec<Outgoing> {
        self.outbox.take()
    }

    fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Board;
    use crate::network::console::SnapshotFields;
    use crate::network::record::{PLAYER_A_ID, PLAYER_B_ID};

    const ADDR_A: HardwareAddr = HardwareAddr([0, 0, 0, 0, 0, 1]);
    const ADDR_B: HardwareAddr = HardwareAddr([0, 0, 0, 0, 0, 2]);
    const ADDR_D: HardwareAddr = HardwareAddr([0, 0, 0, 0, 0, 3]);

    fn ms(v: u32) -> Timestamp {
        Timestamp::from_millis(v)
    }

    fn host() -> HostNode {
        HostNode::new(NodeConfig::for_node(HOST_ID, None)).unwrap()
    }

    fn hit(id: u8, raw: Timestamp) -> Vec<u8> {
        EventMessage::Hit { source_id: id, raw_time: raw, strength: 100 }.to_bytes().unwrap()
    }

    fn decode_all(out: &[Outgoing]) -> Vec<Datagram> {
        out.iter().map(|o| Datagram::decode(&o.bytes).unwrap()).collect()
    }

    #[test]
    fn test_learns_and_connects_players() {
        let mut h = host();
        let hb = EventMessage::Heartbeat { source_id: PLAYER_A_ID }.to_bytes().unwrap();
        h.handle_datagram(ADDR_A, &hb, ms(1));

        assert!(h.peers().is_connected(PLAYER_A_ID));
        assert_eq!(h.peers().address_of(PLAYER_A_ID), Some(ADDR_A));
        let notes = h.take_notifications();
        assert_eq!(notes[0].data, NotificationData::PeerConnected { node_id: PLAYER_A_ID });
    }

    #[test]
    fn test_first_hit_awards_point() {
        let mut h = host();
        h.handle_datagram(ADDR_B, &hit(PLAYER_B_ID, ms(50)), ms(60));
        h.handle_datagram(ADDR_A, &hit(PLAYER_A_ID, ms(51)), ms(61));

        assert_eq!(*h.state().board(), Board::Pair { a: -1, b: 37 });
        assert!(!h.hits().is_armed());
        let notes = h.take_notifications();
        assert!(notes.iter().any(|n| n.data
            == NotificationData::RoundDecided { outcome: RoundOutcome::Winner(Player::B) }));
    }

    #[test]
    fn test_redundant_hit_copies_score_once() {
        let mut h = host();
        for i in 0..3 {
            h.handle_datagram(ADDR_A, &hit(PLAYER_A_ID, ms(50)), ms(60 + i * 20));
        }
        assert_eq!(*h.state().board(), Board::Pair { a: 0, b: 38 });
        let hits = h
            .take_notifications()
            .into_iter()
            .filter(|n| matches!(n.data, NotificationData::Hit { .. }))
            .count();
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_hit_outside_roster_dropped_silently() {
        let mut config = NodeConfig::for_node(HOST_ID, None);
        config.hit.roster = vec![Player::A];
        let mut h = HostNode::new(config).unwrap();
        h.handle_datagram(ADDR_B, &hit(PLAYER_B_ID, ms(50)), ms(60));

        assert!(h.hits().is_armed());
        assert!(h.hits().history().is_empty());
        let notes = h.take_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].data, NotificationData::PeerConnected { node_id: PLAYER_B_ID });
    }

    #[test]
    fn test_reset_request_rearms_round() {
        let mut h = host();
        h.handle_datagram(ADDR_A, &hit(PLAYER_A_ID, ms(50)), ms(60));
        assert!(!h.hits().is_armed());
        let reset = EventMessage::ResetRequest { source_id: PLAYER_A_ID }.to_bytes().unwrap();
        h.handle_datagram(ADDR_A, &reset, ms(70));
        assert!(h.hits().is_armed());
    }

    #[test]
    fn test_unknown_sender_and_garbage_dropped() {
        let mut h = host();
        h.handle_datagram(ADDR_A, &hit(9, ms(1)), ms(1));
        h.handle_datagram(ADDR_A, &[1, 2, 3], ms(1));
        assert!(h.peers().connected_ids().is_empty());
        assert!(h.take_notifications().is_empty());
    }

    #[test]
    fn test_probe_reply_roundtrip() {
        let mut h = host();
        let hb = EventMessage::Heartbeat { source_id: PLAYER_A_ID }.to_bytes().unwrap();
        h.handle_datagram(ADDR_A, &hb, ms(0));
        h.tick(ms(0));

        let probe_sent_at = decode_all(&h.take_outgoing())
            .into_iter()
            .find_map(|d| match d {
                Datagram::Event(EventMessage::SyncProbe { sent_at }) => Some(sent_at),
                _ => None,
            })
            .unwrap();

        // Player clock 40 ms ahead, 1 ms each way
        let reply = EventMessage::SyncReply {
            source_id: PLAYER_A_ID,
            sent_at: probe_sent_at,
            echo: ms(41),
        };
        h.handle_datagram(ADDR_A, &reply.to_bytes().unwrap(), ms(2));
        assert_eq!(h.peers().clock_offset(PLAYER_A_ID), 40_000);
    }

    #[test]
    fn test_reply_from_disconnected_peer_ignored() {
        let mut h = host();
        let hb = EventMessage::Heartbeat { source_id: PLAYER_A_ID }.to_bytes().unwrap();
        h.handle_datagram(ADDR_A, &hb, ms(0));
        h.tick(ms(0));
        let sent_at = ms(0);
        h.tick(ms(2500));
        assert!(!h.peers().is_connected(PLAYER_A_ID));

        let reply = EventMessage::SyncReply { source_id: PLAYER_A_ID, sent_at, echo: ms(7) };
        h.handle_datagram(ADDR_A, &reply.to_bytes().unwrap(), ms(2600));
        let peer = h.peers().get(PLAYER_A_ID).unwrap();
        assert!(peer.connected);
        assert!(!peer.clock_synced);
    }

    #[test]
    fn test_celebration_hold_then_reset() {
        let mut h = host();
        h.handle_command(ConsoleCommand::SettingsUpdate { mode: 5, color_a: 0, color_b: 1 }, ms(0));
        for _ in 0..4 {
            h.handle_command(ConsoleCommand::AwardPoint { player: 1, multiplier: 10 }, ms(10));
        }
        assert!(h.state().is_celebrating());
        assert_eq!(h.state().winner(), Some(Player::A));

        // Awards ignored while celebrating
        h.handle_command(ConsoleCommand::AwardPoint { player: 2, multiplier: 1 }, ms(20));
        assert_eq!(*h.state().board(), Board::Race { a: 38, b: 0 });

        h.tick(ms(3009));
        assert!(h.state().is_celebrating());
        h.tick(ms(3010));
        assert!(!h.state().is_celebrating());
        assert_eq!(*h.state().board(), Board::Race { a: 0, b: 0 });
    }

    #[test]
    fn test_invalid_commands_rejected_without_change() {
        let mut h = host();
        let before = h.state().clone();
        h.handle_command(ConsoleCommand::AwardPoint { player: 1, multiplier: 11 }, ms(0));
        h.handle_command(ConsoleCommand::AwardPoint { player: 3, multiplier: 1 }, ms(0));
        h.handle_command(ConsoleCommand::SettingsUpdate { mode: 7, color_a: 0, color_b: 1 }, ms(0));
        assert_eq!(*h.state(), before);

        let errors = h
            .take_notifications()
            .into_iter()
            .filter(|n| matches!(n.data, NotificationData::Rejected { .. }))
            .count();
        assert_eq!(errors, 3);
    }

    #[test]
    fn test_nav_actions() {
        let mut h = host();
        h.handle_command(ConsoleCommand::NavAction { direction: NavDirection::Left }, ms(0));
        assert_eq!(h.state().mode(), GameMode::TugOWar);
        h.handle_command(ConsoleCommand::NavAction { direction: NavDirection::Right }, ms(0));
        assert_eq!(h.state().mode(), GameMode::Territory);
        h.handle_command(ConsoleCommand::NavAction { direction: NavDirection::Up }, ms(0));
        assert_eq!(h.state().colors().a, 1);
        h.handle_command(ConsoleCommand::NavAction { direction: NavDirection::Down }, ms(0));
        assert_eq!(h.state().colors().b, 2);
    }

    #[test]
    fn test_colour_change_keeps_positions() {
        let mut h = host();
        h.handle_command(ConsoleCommand::AwardPoint { player: 1, multiplier: 4 }, ms(0));
        h.handle_command(ConsoleCommand::SettingsUpdate { mode: 1, color_a: 3, color_b: 4 }, ms(1));
        assert_eq!(*h.state().board(), Board::Pair { a: 3, b: 38 });
        h.handle_command(ConsoleCommand::SettingsUpdate { mode: 2, color_a: 3, color_b: 4 }, ms(2));
        assert_eq!(*h.state().board(), Board::Pair { a: -1, b: 38 });
    }

    #[test]
    fn test_state_request_answered_with_restore() {
        let mut h = host();
        h.handle_command(ConsoleCommand::AwardPoint { player: 2, multiplier: 2 }, ms(0));
        let req = StateMessage::StateRequest { device_id: DISPLAY_ID }.to_bytes().unwrap();
        h.handle_datagram(ADDR_D, &req, ms(5));

        let restores: Vec<_> = decode_all(&h.take_outgoing())
            .into_iter()
            .filter_map(|d| match d {
                Datagram::State(StateMessage::StateRestore { snapshot, .. }) => Some(snapshot),
                _ => None,
            })
            .collect();
        assert_eq!(restores.len(), 1);
        assert_eq!(restores[0].board, Board::Pair { a: -1, b: 36 });
    }

    #[test]
    fn test_console_snapshot_restores_state() {
        let mut h = host();
        let fields = SnapshotFields { mode: 6, boundary: 30, color_a: 1, color_b: 2, ..SnapshotFields::default() };
        h.handle_command(ConsoleCommand::StateSnapshot(fields), ms(0));
        assert_eq!(h.state().mode(), GameMode::TugOWar);
        assert_eq!(*h.state().board(), Board::Boundary(30));

        let bad = SnapshotFields { mode: 6, boundary: 90, ..SnapshotFields::default() };
        h.handle_command(ConsoleCommand::StateSnapshot(bad), ms(1));
        assert_eq!(*h.state().board(), Board::Boundary(30));
    }

    #[test]
    fn test_status_report_lists_peers() {
        let h = host();
        let report = h.status_report();
        assert_eq!(report.peers.len(), 3);
        assert!(report.round_armed);
        assert_eq!(report.mode_name, "Territory");
    }
}
