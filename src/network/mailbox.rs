//! Receive Mailbox
//!
//! The radio delivers datagrams on its own execution context. The callback
//! only checks the length, copies the bytes into a fixed-size slot and
//! pushes it into a bounded channel; the main loop drains the channel at the
//! top of every tick and does all interpretation there.
//!
//! Neither side blocks. A full mailbox drops the datagram, which the
//! protocol already tolerates as radio loss.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::network::record::{is_record_len, EVENT_RECORD_LEN};
use crate::network::transport::HardwareAddr;

/// Default number of queued datagrams.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 32;

/// One received datagram, copied out of the radio buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Inbound {
    /// Sender address as reported by the radio
    pub from: HardwareAddr,
    len: u8,
    data: [u8; EVENT_RECORD_LEN],
}

impl Inbound {
    /// Received bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// Producer half, owned by the receive callback.
#[derive(Clone, Debug)]
pub struct MailboxSender {
    tx: mpsc::Sender<Inbound>,
    dropped: Arc<AtomicU64>,
}

/// Consumer half, owned by the main loop.
#[derive(Debug)]
pub struct MailboxReceiver {
    rx: mpsc::Receiver<Inbound>,
    dropped: Arc<AtomicU64>,
}

/// Create a mailbox holding up to `capacity` datagrams.
pub fn mailbox(capacity: usize) -> (MailboxSender, MailboxReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        MailboxSender { tx, dropped: dropped.clone() },
        MailboxReceiver { rx, dropped },
    )
}

impl MailboxSender {
    /// Queue a datagram. Returns `false` if it was dropped (wrong size,
    /// mailbox full, or receiver gone).
    pub fn deliver(&self, from: HardwareAddr, bytes: &[u8]) -> bool {
        if !is_record_len(bytes.len()) {
            return false;
        }
        let mut data = [0u8; EVENT_RECORD_LEN];
        data[..bytes.len()].copy_from_slice(bytes);
        let inbound = Inbound { from, len: bytes.len() as u8, data };

        match self.tx.try_send(inbound) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

impl MailboxReceiver {
    /// Everything queued so far, oldest first.
    pub fn drain(&mut self) -> Vec<Inbound> {
        let mut out = Vec::new();
        while let Ok(inbound) = self.rx.try_recv() {
            out.push(inbound);
        }
        out
    }

    /// Datagrams lost to a full mailbox.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::record::STATE_RECORD_LEN;

    const FROM: HardwareAddr = HardwareAddr([1, 2, 3, 4, 5, 6]);

    #[test]
    fn test_deliver_and_drain_in_order() {
        let (tx, mut rx) = mailbox(4);
        assert!(tx.deliver(FROM, &[1u8; EVENT_RECORD_LEN]));
        assert!(tx.deliver(FROM, &[2u8; STATE_RECORD_LEN]));

        let got = rx.drain();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].bytes(), &[1u8; EVENT_RECORD_LEN][..]);
        assert_eq!(got[1].bytes(), &[2u8; STATE_RECORD_LEN][..]);
        assert_eq!(got[1].from, FROM);
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_wrong_length_never_queued() {
        let (tx, mut rx) = mailbox(4);
        assert!(!tx.deliver(FROM, &[0u8; 20]));
        assert!(!tx.deliver(FROM, &[]));
        assert!(rx.drain().is_empty());
        assert_eq!(rx.dropped(), 0);
    }

    #[test]
    fn test_overflow_drops_without_blocking() {
        let (tx, mut rx) = mailbox(2);
        for _ in 0..5 {
            tx.deliver(FROM, &[0u8; STATE_RECORD_LEN]);
        }
        assert_eq!(rx.drain().len(), 2);
        assert_eq!(rx.dropped(), 3);
    }

    #[test]
    fn test_producer_on_another_thread() {
        let (tx, mut rx) = mailbox(8);
        let handle = std::thread::spawn(move || {
            for i in 0..3u8 {
                tx.deliver(FROM, &[i; EVENT_RECORD_LEN]);
            }
        });
        handle.join().unwrap();
        let got = rx.drain();
        assert_eq!(got.len(), 3);
        assert_eq!(got[2].bytes()[0], 2);
    }
}
