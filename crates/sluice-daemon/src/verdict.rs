//! Verdict boundary.
//!
//! The packet source accepts exactly one verdict per diverted packet id.
//! The ingress path and the release thread both issue verdicts, so the
//! sink is shared; the NFQUEUE implementation sends on the netlink
//! socket from whichever thread calls it.

use std::io;

/// Where ACCEPT/DROP verdicts go. Implemented by the NFQUEUE handle and
/// by recording doubles in tests.
pub trait VerdictSink: Send + Sync {
    /// Release the packet downstream, echoing its payload.
    fn accept(&self, id: u32, payload: &[u8]) -> io::Result<()>;

    /// Discard the packet.
    fn drop_packet(&self, id: u32) -> io::Result<()>;
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Verdict {
        Accept { id: u32, octets: usize },
        Drop { id: u32 },
    }

    /// Test double that records every verdict in order.
    #[derive(Default)]
    pub struct RecordingSink {
        pub verdicts: Mutex<Vec<Verdict>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn taken(&self) -> Vec<Verdict> {
            self.verdicts.lock().unwrap().clone()
        }
    }

    impl VerdictSink for RecordingSink {
        fn accept(&self, id: u32, payload: &[u8]) -> io::Result<()> {
            self.verdicts.lock().unwrap().push(Verdict::Accept {
                id,
                octets: payload.len(),
            });
            Ok(())
        }

        fn drop_packet(&self, id: u32) -> io::Result<()> {
            self.verdicts.lock().unwrap().push(Verdict::Drop { id });
            Ok(())
        }
    }
}
