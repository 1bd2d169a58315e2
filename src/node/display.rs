//! Display Node
//!
//! Drives the LED strip from a replica of the host's game.
//!
//! With [`ReplicationModel::FullState`] the replica is overwritten by host
//! snapshots. With [`ReplicationModel::ScoreEvents`] it replays score, mode
//! and reset events through the same `GameState` rules and asks for a
//! restore on every (re)connection and periodically after that.
//!
//! Celebrations run locally. When one finishes the replica resets and a
//! latch is set; snapshots still claiming a celebration are ignored until
//! the host has reset too, so the animation never restarts.

use tracing::{debug, info, warn};

use crate::core::clock::{IntervalTimer, Timestamp};
use crate::game::celebration::{CelebrationScheduler, FramePoll};
use crate::game::events::{Notification, NotificationData};
use crate::game::render::{paint_progress, palette_color, IdleAnimation, Renderer, Rgb};
use crate::game::state::{GameError, GameSnapshot, GameState, SettingsChange};
use crate::network::clock_sync::answer_probe;
use crate::network::peer::PeerTable;
use crate::network::record::{Datagram, EventMessage, StateMessage, DISPLAY_ID, HOST_ID};
use crate::network::transport::HardwareAddr;
use crate::node::{Node, NodeConfig, NodeError, Outbox, Outgoing, ReplicationModel};

/// The LED display node.
#[derive(Debug)]
pub struct DisplayNode {
    config: NodeConfig,
    peers: PeerTable,
    state: GameState,
    celebration: CelebrationScheduler,
    idle: IdleAnimation,
    idle_timer: IntervalTimer,
    heartbeat_timer: IntervalTimer,
    restore_timer: IntervalTimer,
    latched: bool,
    dirty: bool,
    frame: Vec<Rgb>,
    outbox: Outbox,
    notifications: Vec<Notification>,
}

impl DisplayNode {
    /// Build from configuration. The host needs a fixed address.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        if config.node_id != DISPLAY_ID {
            return Err(NodeError::Invalid(format!("node {} is not the display", config.node_id)));
        }
        let track = config.track()?;
        let peers = config.peer_table()?;
        if peers.address_of(HOST_ID).is_none() {
            return Err(NodeError::Invalid("display needs the host address".into()));
        }
        let state = GameState::new(config.initial_mode, track)
            .with_swap_rule(config.swap_rule)
            .with_colors(config.colors);

        Ok(Self {
            celebration: CelebrationScheduler::new(track),
            idle: IdleAnimation::new(),
            idle_timer: IntervalTimer::from_millis(IdleAnimation::FRAME_MS),
            heartbeat_timer: IntervalTimer::from_millis(config.heartbeat_interval_ms),
            restore_timer: IntervalTimer::from_millis(config.restore_interval_ms),
            latched: false,
            dirty: true,
            frame: vec![Rgb::OFF; track.len() as usize],
            outbox: Outbox::default(),
            notifications: Vec::new(),
            peers,
            state,
            config,
        })
    }

    /// Replica of the host's game.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Whether the host link is up.
    pub fn is_host_connected(&self) -> bool {
        self.peers.is_connected(HOST_ID)
    }

    /// Whether a celebration animation is running.
    pub fn is_celebrating(&self) -> bool {
        self.celebration.is_active()
    }

    /// Whether host snapshots are held off after a finished celebration.
    pub fn is_latched(&self) -> bool {
        self.latched
    }

    /// Push a frame to `renderer` if one is due. Returns `true` when the
    /// strip was written.
    pub fn render<R: Renderer + ?Sized>(&mut self, now: Timestamp, renderer: &mut R) -> bool {
        if !self.is_host_connected() {
            if !self.idle_timer.poll(now) {
                return false;
            }
            self.idle.step(&mut self.frame);
            renderer.set_strip(&self.frame);
            self.dirty = true;
            return true;
        }

        match self.celebration.poll(now, renderer) {
            FramePoll::Rendered => return true,
            FramePoll::Skipped => return false,
            FramePoll::Finished => {
                info!("Celebration finished");
                self.state.finish_celebration();
                self.latched = true;
                self.dirty = true;
            }
            FramePoll::Idle => {}
        }

        if !self.dirty {
            return false;
        }
        paint_progress(&self.state, &mut self.frame);
        renderer.set_strip(&self.frame);
        self.dirty = false;
        true
    }

    fn request_state(&mut self, now: Timestamp) {
        debug!("Requesting state from host");
        self.restore_timer.restart(now);
        let req = StateMessage::StateRequest { device_id: DISPLAY_ID };
        self.outbox.send_state(&self.peers, HOST_ID, &req);
        self.notifications.push(Notification::new(now, NotificationData::StateRequested));
    }

    fn start_celebration(&mut self, now: Timestamp) {
        if let Some(winner) = self.state.winner() {
            let color = palette_color(self.state.colors().of(winner));
            let pattern = self.celebration.start(winner, color, now);
            info!("{} wins, celebrating with {:?}", winner, pattern);
            self.notifications.push(Notification::game_won(now, winner));
        }
    }

    fn apply_snapshot(&mut self, snapshot: &GameSnapshot, now: Timestamp) {
        if self.latched {
            if snapshot.celebrating {
                return;
            }
            self.latched = false;
        }

        let was_celebrating = self.state.is_celebrating();
        if let Err(e) = self.state.restore(snapshot) {
            warn!("Rejected snapshot: {}", e);
            self.notifications.push(Notification::rejected(now, e.to_string()));
            return;
        }
        match (was_celebrating, self.state.is_celebrating()) {
            (false, true) => self.start_celebration(now),
            (true, false) => self.celebration.cancel(),
            _ => {}
        }
        self.dirty = true;
    }

    fn handle_state(&mut self, msg: StateMessage, now: Timestamp) {
        match msg {
            StateMessage::Heartbeat { .. } => {}
            StateMessage::State { snapshot, .. } => {
                if self.config.replication == ReplicationModel::FullState {
                    self.apply_snapshot(&snapshot, now);
                }
            }
            StateMessage::StateRestore { snapshot, .. } => self.apply_snapshot(&snapshot, now),
            StateMessage::Score { player, multiplier, .. } => match self.state.award_point(player, multiplier) {
                Ok(winner) => {
                    self.notifications.push(Notification::new(
                        now,
                        NotificationData::PointAwarded { player, multiplier },
                    ));
                    if winner.is_some() {
                        self.start_celebration(now);
                    }
                    self.dirty = true;
                }
                Err(GameError::Celebrating) => debug!("Score ignored during celebration"),
                Err(e) => warn!("Rejected score: {}", e),
            },
            StateMessage::ModeChange { mode, colors, .. } => {
                match self.state.apply_settings(mode.as_u8(), colors.a, colors.b) {
                    Ok(SettingsChange::ModeChanged) => {
                        self.celebration.cancel();
                        self.latched = false;
                        self.dirty = true;
                    }
                    Ok(SettingsChange::ColorsChanged) => self.dirty = true,
                    Ok(SettingsChange::Unchanged) => {}
                    Err(e) => warn!("Rejected mode change: {}", e),
                }
            }
            StateMessage::Reset { .. } => {
                self.state.reset();
                self.celebration.cancel();
                self.latched = false;
                self.dirty = true;
                self.notifications.push(Notification::new(now, NotificationData::GameReset));
            }
            StateMessage::StateRequest { .. } => {}
        }
    }
}

impl Node for DisplayNode {
    fn node_id(&self) -> u8 {
        DISPLAY_ID
    }

    fn handle_datagram(&mut self, from: HardwareAddr, bytes: &[u8], now: Timestamp) {
        let datagram = match Datagram::decode(bytes) {
            Ok(d) if d.sender_id() == HOST_ID => d,
            Ok(d) => {
                debug!("Display ignores datagram from node {}", d.sender_id());
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
            self.dirty = true;
            if self.config.replication == ReplicationModel::ScoreEvents {
                self.request_state(now);
            }
        }

        match datagram {
            Datagram::State(msg) => self.handle_state(msg, now),
            Datagram::Event(EventMessage::SyncProbe { sent_at }) => {
                let reply = answer_probe(DISPLAY_ID, sent_at, now);
                self.outbox.send_event(&self.peers, HOST_ID, &reply);
            }
            Datagram::Event(other) => debug!("Display ignores {:?}", other),
        }
    }

    fn tick(&mut self, now: Timestamp) {
        for id in self.peers.tick(now) {
            warn!("Host link lost, showing idle animation");
            self.notifications.push(Notification::peer_disconnected(now, id));
        }

        if self.heartbeat_timer.poll(now) {
            let hb = StateMessage::Heartbeat { device_id: DISPLAY_ID };
            self.outbox.send_state(&self.peers, HOST_ID, &hb);
        }

        if self.config.replication == ReplicationModel::ScoreEvents
            && self.is_host_connected()
            && self.restore_timer.is_due(now)
        {
            self.request_state(now);
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
    use crate::game::mode::{GameMode, Player};
    use crate::game::render::MemoryStrip;
    use crate::game::state::{Board, PlayerColors};

    const HOST_ADDR: HardwareAddr = HardwareAddr([10, 0, 0, 1, 0x1F, 0x90]);

    fn ms(v: u32) -> Timestamp {
        Timestamp::from_millis(v)
    }

    fn display(replication: ReplicationModel) -> DisplayNode {
        let config = NodeConfig {
            replication,
            ..NodeConfig::for_node(DISPLAY_ID, Some(HOST_ADDR))
        };
        DisplayNode::new(config).unwrap()
    }

    fn send(d: &mut DisplayNode, msg: StateMessage, now: Timestamp) {
        d.handle_datagram(HOST_ADDR, &msg.to_bytes().unwrap(), now);
    }

    fn snapshot(board: Board, celebrating: bool, winner: Option<Player>) -> GameSnapshot {
        GameSnapshot {
            mode: GameMode::Territory,
            colors: PlayerColors::default(),
            board,
            celebrating,
            winner,
        }
    }

    fn requests(d: &mut DisplayNode) -> usize {
        d.take_outgoing()
            .iter()
            .filter(|o| {
                matches!(
                    Datagram::decode(&o.bytes),
                    Ok(Datagram::State(StateMessage::StateRequest { .. }))
                )
            })
            .count()
    }

    #[test]
    fn test_idle_rainbow_without_host() {
        let mut d = display(ReplicationModel::FullState);
        let mut strip = MemoryStrip::new(38);
        assert!(d.render(ms(0), &mut strip));
        assert!(!d.render(ms(20), &mut strip));
        assert!(d.render(ms(50), &mut strip));
        assert_eq!(strip.frames, 2);
        assert_eq!(strip.lit(), 38);
    }

    #[test]
    fn test_full_state_renders_snapshot() {
        let mut d = display(ReplicationModel::FullState);
        let snap = snapshot(Board::Pair { a: 4, b: 30 }, false, None);
        send(&mut d, StateMessage::State { device_id: HOST_ID, snapshot: snap }, ms(0));
        assert_eq!(*d.state().board(), Board::Pair { a: 4, b: 30 });

        let mut strip = MemoryStrip::new(38);
        assert!(d.render(ms(1), &mut strip));
        assert_eq!(strip.lit(), 5 + 8);
        assert!(!d.render(ms(2), &mut strip));
    }

    #[test]
    fn test_celebration_latch() {
        let mut d = display(ReplicationModel::FullState);
        let won = snapshot(Board::Pair { a: 37, b: 30 }, true, Some(Player::A));
        send(&mut d, StateMessage::State { device_id: HOST_ID, snapshot: won.clone() }, ms(0));
        assert!(d.is_celebrating());

        // Repeated celebrating snapshots do not restart the animation
        let started = d.celebration.session().unwrap().started_at;
        send(&mut d, StateMessage::State { device_id: HOST_ID, snapshot: won.clone() }, ms(500));
        assert_eq!(d.celebration.session().unwrap().started_at, started);

        let mut strip = MemoryStrip::new(38);
        d.render(ms(3100), &mut strip);
        assert!(!d.is_celebrating());
        assert!(d.is_latched());
        assert!(!d.state().is_celebrating());

        // Host still holding: ignored
        send(&mut d, StateMessage::State { device_id: HOST_ID, snapshot: won }, ms(3200));
        assert!(!d.is_celebrating());
        assert_eq!(*d.state().board(), Board::Pair { a: -1, b: 38 });

        // Host reset: latch released
        let fresh = snapshot(Board::Pair { a: -1, b: 38 }, false, None);
        send(&mut d, StateMessage::State { device_id: HOST_ID, snapshot: fresh }, ms(3300));
        assert!(!d.is_latched());
    }

    #[test]
    fn test_score_events_replay() {
        let mut d = display(ReplicationModel::ScoreEvents);
        send(&mut d, StateMessage::Heartbeat { device_id: HOST_ID }, ms(0));
        assert_eq!(requests(&mut d), 1);

        send(&mut d, StateMessage::Score { device_id: HOST_ID, player: Player::B, multiplier: 3 }, ms(10));
        assert_eq!(*d.state().board(), Board::Pair { a: -1, b: 35 });

        // Snapshots are not applied in this model, restores are
        let snap = snapshot(Board::Pair { a: 2, b: 35 }, false, None);
        send(&mut d, StateMessage::State { device_id: HOST_ID, snapshot: snap.clone() }, ms(20));
        assert_eq!(*d.state().board(), Board::Pair { a: -1, b: 35 });
        send(&mut d, StateMessage::StateRestore { device_id: HOST_ID, snapshot: snap }, ms(30));
        assert_eq!(*d.state().board(), Board::Pair { a: 2, b: 35 });

        send(
            &mut d,
            StateMessage::ModeChange {
                device_id: HOST_ID,
                mode: GameMode::Race,
                colors: PlayerColors { a: 2, b: 3 },
            },
            ms(40),
        );
        assert_eq!(*d.state().board(), Board::Race { a: 0, b: 0 });
        assert_eq!(d.state().colors(), PlayerColors { a: 2, b: 3 });
    }

    #[test]
    fn test_periodic_restore_request() {
        let mut d = display(ReplicationModel::ScoreEvents);
        send(&mut d, StateMessage::Heartbeat { device_id: HOST_ID }, ms(0));
        assert_eq!(requests(&mut d), 1);

        for t in (500..10_000).step_by(500) {
            send(&mut d, StateMessage::Heartbeat { device_id: HOST_ID }, ms(t));
            d.tick(ms(t));
        }
        assert_eq!(requests(&mut d), 0);
        d.tick(ms(10_000));
        assert_eq!(requests(&mut d), 1);
    }

    #[test]
    fn test_reconnect_requests_again() {
        let mut d = display(ReplicationModel::ScoreEvents);
        send(&mut d, StateMessage::Heartbeat { device_id: HOST_ID }, ms(0));
        d.tick(ms(2500));
        assert!(!d.is_host_connected());
        d.take_outgoing();

        send(&mut d, StateMessage::Heartbeat { device_id: HOST_ID }, ms(2600));
        assert_eq!(requests(&mut d), 1);
    }

    #[test]
    fn test_answers_probe() {
        let mut d = display(ReplicationModel::FullState);
        let probe = EventMessage::SyncProbe { sent_at: ms(1) }.to_bytes().unwrap();
        d.handle_datagram(HOST_ADDR, &probe, ms(77));
        let out = d.take_outgoing();
        assert_eq!(
            Datagram::decode(&out[0].bytes).unwrap(),
            Datagram::Event(EventMessage::SyncReply { source_id: DISPLAY_ID, sent_at: ms(1), echo: ms(77) })
        );
    }

    #[test]
    fn test_bad_snapshot_rejected() {
        let mut d = display(ReplicationModel::FullState);
        let bad = snapshot(Board::Pair { a: 10, b: 39 }, false, None);
        send(&mut d, StateMessage::StateRestore { device_id: HOST_ID, snapshot: bad }, ms(0));
        assert_eq!(*d.state().board(), Board::Pair { a: -1, b: 38 });
    }
}
