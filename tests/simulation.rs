//! End-to-end runs of all four nodes over a simulated radio.
//!
//! Every node has its own skewed clock, every link has its own latency and
//! the air can drop datagrams or cut a node off entirely. The simulation
//! advances in 1 ms steps.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use lightduel::core::clock::Timestamp;
use lightduel::game::events::{Notification, NotificationData};
use lightduel::game::hit::{RoundOutcome, WinnerStrategy};
use lightduel::game::mode::{GameMode, Player};
use lightduel::game::render::MemoryStrip;
use lightduel::game::state::Board;
use lightduel::network::console::ConsoleCommand;
use lightduel::network::transport::HardwareAddr;
use lightduel::node::{Outgoing, ReplicationModel};
use lightduel::{
    DisplayNode, HostNode, Node, NodeConfig, PlayerNode, DISPLAY_ID, HOST_ID, PLAYER_A_ID, PLAYER_B_ID,
};

fn addr(id: u8) -> HardwareAddr {
    HardwareAddr([10, 0, 0, 10 + id, 0x1F, 0x90])
}

struct InFlight {
    deliver_at: u32,
    from: u8,
    out: Outgoing,
}

struct Sim {
    host: HostNode,
    a: PlayerNode,
    b: PlayerNode,
    display: DisplayNode,
    strip: MemoryStrip,
    /// Local clock minus global clock, per node id (ms)
    skew_ms: [u32; 4],
    /// One-way latency of each node's link to the host (ms)
    latency_ms: [u32; 4],
    offline: [bool; 4],
    loss: f64,
    rng: StdRng,
    air: Vec<InFlight>,
    now_ms: u32,
    host_notes: Vec<Notification>,
}

impl Sim {
    fn new(host_config: NodeConfig, replication: ReplicationModel, skew_ms: [u32; 4]) -> Sim {
        let host_addr = Some(addr(HOST_ID));
        let display_config = NodeConfig {
            replication,
            ..NodeConfig::for_node(DISPLAY_ID, host_addr)
        };
        let host_config = NodeConfig { replication, ..host_config };
        Sim {
            host: HostNode::new(host_config).unwrap(),
            a: PlayerNode::new(NodeConfig::for_node(PLAYER_A_ID, host_addr)).unwrap(),
            b: PlayerNode::new(NodeConfig::for_node(PLAYER_B_ID, host_addr)).unwrap(),
            display: DisplayNode::new(display_config).unwrap(),
            strip: MemoryStrip::new(38),
            skew_ms,
            latency_ms: [1, 1, 1, 1],
            offline: [false; 4],
            loss: 0.0,
            rng: StdRng::seed_from_u64(0x1D_5EED),
            air: Vec::new(),
            now_ms: 1,
            host_notes: Vec::new(),
        }
    }

    fn basic(replication: ReplicationModel) -> Sim {
        Sim::new(NodeConfig::for_node(HOST_ID, None), replication, [0; 4])
    }

    fn local(&self, id: u8) -> Timestamp {
        Timestamp::from_millis(self.now_ms.wrapping_add(self.skew_ms[id as usize]))
    }

    fn node(&mut self, id: u8) -> &mut dyn Node {
        match id {
            HOST_ID => &mut self.host,
            PLAYER_A_ID => &mut self.a,
            PLAYER_B_ID => &mut self.b,
            _ => &mut self.display,
        }
    }

    fn collect(&mut self, id: u8) {
        let outgoing = self.node(id).take_outgoing();
        for out in outgoing {
            let link = if id == HOST_ID { out.node_id } else { id };
            self.air.push(InFlight {
                deliver_at: self.now_ms + self.latency_ms[link as usize],
                from: id,
                out,
            });
        }
    }

    fn step(&mut self) {
        self.now_ms += 1;

        let (due, pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.air).into_iter().partition(|f| f.deliver_at <= self.now_ms);
        self.air = pending;
        for flight in due {
            let to = flight.out.node_id;
            if self.offline[flight.from as usize] || self.offline[to as usize] {
                continue;
            }
            if self.loss > 0.0 && self.rng.gen_bool(self.loss) {
                continue;
            }
            let now = self.local(to);
            self.node(to).handle_datagram(addr(flight.from), &flight.out.bytes, now);
        }

        for id in [HOST_ID, PLAYER_A_ID, PLAYER_B_ID, DISPLAY_ID] {
            let now = self.local(id);
            self.node(id).tick(now);
            self.collect(id);
        }
        let now = self.local(DISPLAY_ID);
        self.display.render(now, &mut self.strip);
        self.host_notes.extend(self.host.take_notifications());
    }

    fn run(&mut self, ms: u32) {
        for _ in 0..ms {
            self.step();
        }
    }

    fn command(&mut self, cmd: ConsoleCommand) {
        let now = self.local(HOST_ID);
        self.host.handle_command(cmd, now);
        self.collect(HOST_ID);
        self.host_notes.extend(self.host.take_notifications());
    }

    fn hit(&mut self, player: Player) {
        let now = self.local(player.id());
        let node = if player == Player::A { &mut self.a } else { &mut self.b };
        node.report_hit(600, now);
        self.collect(player.id());
    }

    fn converged(&self) -> bool {
        self.host.state().compute_hash() == self.display.state().compute_hash()
    }

    fn count(&self, pred: impl Fn(&NotificationData) -> bool) -> usize {
        self.host_notes.iter().filter(|n| pred(&n.data)).count()
    }
}

#[test]
fn test_all_nodes_connect() {
    let mut sim = Sim::basic(ReplicationModel::FullState);
    sim.run(1500);

    for id in [PLAYER_A_ID, PLAYER_B_ID, DISPLAY_ID] {
        assert!(sim.host.peers().is_connected(id), "node {} not connected", id);
        assert_eq!(sim.host.peers().address_of(id), Some(addr(id)));
        assert!(sim.host.peers().get(id).unwrap().clock_synced);
    }
    assert!(sim.a.is_host_connected());
    assert!(sim.display.is_host_connected());
    assert!(sim.converged());
}

#[test]
fn test_buffered_round_uses_synchronized_clocks() {
    let host_config = NodeConfig {
        hit: lightduel::game::hit::HitConfig {
            strategy: WinnerStrategy::Buffered { tie_tolerance_us: 5_000 },
            ..Default::default()
        },
        ..NodeConfig::for_node(HOST_ID, None)
    };
    let mut sim = Sim::new(host_config, ReplicationModel::FullState, [0, 7_000, 123_456, 42]);
    sim.latency_ms = [0, 40, 1, 1];
    sim.run(1500);
    assert_eq!(sim.host.peers().clock_offset(PLAYER_A_ID), 7_000_000);
    assert_eq!(sim.host.peers().clock_offset(PLAYER_B_ID), 123_456_000);

    // A hits first but its record arrives 19 ms after B's, and the repeat
    // copies of both hits reach the host interleaved
    sim.hit(Player::A);
    sim.run(20);
    sim.hit(Player::B);
    sim.run(600);

    assert_eq!(sim.count(|d| matches!(d, NotificationData::Hit { .. })), 2);
    assert_eq!(sim.host.hits().history().len(), 2);
    assert_eq!(
        sim.count(|d| *d == NotificationData::RoundDecided { outcome: RoundOutcome::Winner(Player::A) }),
        1
    );
    assert_eq!(*sim.host.state().board(), Board::Pair { a: 0, b: 38 });
}

#[test]
fn test_redundant_hits_score_once() {
    let mut sim = Sim::basic(ReplicationModel::FullState);
    sim.run(1500);
    sim.hit(Player::B);
    sim.run(200);

    assert_eq!(sim.count(|d| matches!(d, NotificationData::Hit { .. })), 1);
    assert_eq!(*sim.host.state().board(), Board::Pair { a: -1, b: 37 });
    assert!(sim.converged());
}

#[test]
fn test_lossy_air_never_double_counts() {
    let mut sim = Sim::basic(ReplicationModel::FullState);
    sim.run(1500);
    sim.loss = 0.3;

    for _ in 0..10 {
        sim.hit(Player::A);
        sim.run(2000);
    }

    let Board::Pair { a, .. } = *sim.host.state().board() else {
        panic!("territory board expected");
    };
    let points = (a + 1) as usize;
    let hits = sim.count(|d| matches!(d, NotificationData::Hit { .. }));
    assert_eq!(points, hits);
    assert!((5..=10).contains(&points), "{} points", points);
}

#[test]
fn test_replicas_converge_after_loss() {
    for model in [ReplicationModel::FullState, ReplicationModel::ScoreEvents] {
        let mut sim = Sim::basic(model);
        sim.run(1500);
        sim.loss = 0.25;

        sim.command(ConsoleCommand::SettingsUpdate { mode: 4, color_a: 2, color_b: 3 });
        for (player, multiplier) in [(1, 2), (2, 1), (2, 3), (1, 1), (1, 2)] {
            sim.run(150);
            sim.command(ConsoleCommand::AwardPoint { player, multiplier });
        }
        sim.run(500);

        sim.loss = 0.0;
        sim.run(11_000);
        assert_eq!(sim.host.state().mode(), GameMode::ScoreOrder);
        assert!(sim.converged(), "{:?} replica diverged", model);
        assert_eq!(
            sim.display.state().board(),
            &Board::Sequence(vec![
                Player::A, Player::A, Player::B, Player::B, Player::B, Player::B, Player::A, Player::A,
                Player::A,
            ])
        );
    }
}

#[test]
fn test_reconnection_relearns_and_resyncs() {
    let mut sim = Sim::basic(ReplicationModel::ScoreEvents);
    sim.run(1500);

    sim.offline[DISPLAY_ID as usize] = true;
    sim.run(3000);
    assert!(!sim.host.peers().is_connected(DISPLAY_ID));
    assert!(!sim.display.is_host_connected());
    assert_eq!(sim.count(|d| *d == NotificationData::PeerDisconnected { node_id: DISPLAY_ID }), 1);

    // Idle rainbow while cut off
    assert_eq!(sim.strip.lit(), 38);

    // Points scored while the display is away
    sim.command(ConsoleCommand::AwardPoint { player: 2, multiplier: 4 });
    sim.run(10);
    sim.offline[DISPLAY_ID as usize] = false;
    sim.run(1500);

    assert!(sim.host.peers().is_connected(DISPLAY_ID));
    assert!(sim.host.peers().get(DISPLAY_ID).unwrap().clock_synced);
    assert!(sim.converged());
    assert_eq!(*sim.display.state().board(), Board::Pair { a: -1, b: 34 });
}

#[test]
fn test_tug_o_war_win_celebrates_then_resets() {
    for model in [ReplicationModel::FullState, ReplicationModel::ScoreEvents] {
        let mut sim = Sim::basic(model);
        sim.run(1500);

        sim.command(ConsoleCommand::SettingsUpdate { mode: 6, color_a: 0, color_b: 1 });
        sim.run(50);
        assert_eq!(*sim.display.state().board(), Board::Boundary(18));

        sim.command(ConsoleCommand::AwardPoint { player: 1, multiplier: 10 });
        sim.run(50);
        sim.command(ConsoleCommand::AwardPoint { player: 1, multiplier: 10 });
        sim.run(50);

        assert!(sim.host.state().is_celebrating());
        assert_eq!(sim.host.state().winner(), Some(Player::A));
        assert!(sim.display.is_celebrating(), "{:?} display not celebrating", model);
        assert_eq!(sim.count(|d| *d == NotificationData::GameWon { winner: Player::A }), 1);

        sim.run(3500);
        assert!(!sim.host.state().is_celebrating());
        assert!(!sim.display.is_celebrating());
        assert_eq!(*sim.host.state().board(), Board::Boundary(18));
        sim.run(1500);
        assert!(sim.converged());
        assert!(!sim.display.is_latched());
    }
}

#[test]
fn test_clock_wrap_during_play() {
    // Player clocks sit just below the 32-bit µs wrap (~71.6 minutes)
    let near_wrap = (u32::MAX / 1_000) - 2_500;
    let mut sim = Sim::new(
        NodeConfig::for_node(HOST_ID, None),
        ReplicationModel::FullState,
        [0, near_wrap, near_wrap, near_wrap],
    );
    sim.run(1500);
    for _ in 0..3 {
        sim.hit(Player::B);
        sim.run(2000);
    }
    assert_eq!(*sim.host.state().board(), Board::Pair { a: -1, b: 35 });
    assert!(sim.a.is_host_connected());
    assert!(sim.converged());
}
