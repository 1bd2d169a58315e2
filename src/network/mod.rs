//! Network Layer
//!
//! Everything between the radio and the game: record framing, peer
//! liveness, clock synchronization, the receive mailbox and the console
//! adapter. This layer is **clock-driven** - every operation takes `now`
//! from the caller.

pub mod record;
pub mod peer;
pub mod clock_sync;
pub mod mailbox;
pub mod transport;
pub mod console;

pub use record::{
    Datagram, EventMessage, StateMessage, FrameError,
    HOST_ID, PLAYER_A_ID, PLAYER_B_ID, DISPLAY_ID,
};
pub use peer::{PeerLink, PeerRole, PeerTable};
pub use clock_sync::{ClockSync, SyncSample};
pub use mailbox::{mailbox, Inbound, MailboxReceiver, MailboxSender};
pub use transport::{HardwareAddr, Radio, TransportError, UdpRadio};
pub use console::{ConsoleCommand, ConsoleEvent, NavDirection, StatusReport};
