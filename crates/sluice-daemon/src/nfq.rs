//! NFQUEUE packet source.
//!
//! A minimal nfnetlink_queue client over one `AF_NETLINK` socket: bind a
//! queue id, request full-packet copies, then read diverted packets and
//! send per-id verdicts. The send and receive directions of a netlink
//! socket are independent syscalls, so the release thread issues
//! verdicts through [`VerdictHandle`] while the ingress loop blocks in
//! [`PacketReader::recv`].
//!
//! The receive path carries a timeout so the ingress loop can observe
//! the shutdown flag; timeouts and `EINTR` surface as `Ok(None)`.
//! Malformed netlink frames are skipped, never fatal.

use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::verdict::VerdictSink;

// nfnetlink subsystem and message types.
const NFNL_SUBSYS_QUEUE: u16 = 3;
const NFQNL_MSG_PACKET: u16 = 0;
const NFQNL_MSG_VERDICT: u16 = 1;
const NFQNL_MSG_CONFIG: u16 = 2;

// Packet message attributes.
const NFQA_PACKET_HDR: u16 = 1;
const NFQA_VERDICT_HDR: u16 = 2;
const NFQA_MARK: u16 = 8;
const NFQA_PAYLOAD: u16 = 10;

// Config message attributes.
const NFQA_CFG_CMD: u16 = 1;
const NFQA_CFG_PARAMS: u16 = 2;
const NFQA_CFG_QUEUE_MAXLEN: u16 = 3;

// Config commands.
const NFQNL_CFG_CMD_BIND: u8 = 1;
const NFQNL_CFG_CMD_PF_BIND: u8 = 3;
const NFQNL_CFG_CMD_PF_UNBIND: u8 = 4;

/// Copy the whole packet to user space.
const NFQNL_COPY_PACKET: u8 = 2;
const COPY_RANGE: u32 = 0xffff;

// Verdicts.
const NF_DROP: u32 = 0;
const NF_ACCEPT: u32 = 1;

const NLMSG_HDRLEN: usize = 16;
const NFGENMSG_LEN: usize = 4;
const NLATTR_HDRLEN: usize = 4;

/// How long a blocking receive waits before yielding to the shutdown
/// check.
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum NfqError {
    #[error("netlink socket: {0}")]
    Socket(#[source] io::Error),
    #[error("nfqueue {what}: {source}")]
    Config {
        what: &'static str,
        #[source]
        source: io::Error,
    },
}

/// One diverted packet.
#[derive(Debug, Clone)]
pub struct PacketEvent {
    pub id: u32,
    pub mark: u32,
    pub payload: Bytes,
}

/// Bind `queue` with kernel-side capacity `nfqlen`.
pub fn bind(queue: u16, nfqlen: u32) -> Result<(PacketReader, VerdictHandle), NfqError> {
    let sock = Arc::new(NfqSocket::open().map_err(NfqError::Socket)?);

    // Modern kernels ignore PF (UN)BIND; sent for parity with older ones.
    config_roundtrip(&sock, pf_command(NFQNL_CFG_CMD_PF_UNBIND), "pf-unbind")?;
    config_roundtrip(&sock, pf_command(NFQNL_CFG_CMD_PF_BIND), "pf-bind")?;

    let mut msg = NlMsg::config(queue);
    msg.put_attr(NFQA_CFG_CMD, &cfg_cmd(NFQNL_CFG_CMD_BIND, 0));
    config_roundtrip(&sock, msg, "bind")?;

    let mut msg = NlMsg::config(queue);
    let mut params = [0u8; 5];
    params[0..4].copy_from_slice(&COPY_RANGE.to_be_bytes());
    params[4] = NFQNL_COPY_PACKET;
    msg.put_attr(NFQA_CFG_PARAMS, &params);
    config_roundtrip(&sock, msg, "copy-mode")?;

    let mut msg = NlMsg::config(queue);
    msg.put_attr(NFQA_CFG_QUEUE_MAXLEN, &nfqlen.to_be_bytes());
    config_roundtrip(&sock, msg, "maxlen")?;

    sock.set_recv_timeout(RECV_TIMEOUT)
        .map_err(|source| NfqError::Config {
            what: "recv-timeout",
            source,
        })?;

    let reader = PacketReader {
        sock: sock.clone(),
        buf: vec![0u8; COPY_RANGE as usize + 4096],
        pending: VecDeque::new(),
    };
    let verdicts = VerdictHandle { sock, queue };
    Ok((reader, verdicts))
}

// ─── Socket ─────────────────────────────────────────────────────────────────

struct NfqSocket {
    fd: RawFd,
}

impl NfqSocket {
    fn open() -> io::Result<Self> {
        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::NETLINK_NETFILTER,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let sock = NfqSocket { fd };

        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        let rc = unsafe {
            libc::bind(
                sock.fd,
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(sock)
    }

    fn send(&self, buf: &[u8]) -> io::Result<()> {
        let rc = unsafe { libc::send(self.fd, buf.as_ptr() as *const libc::c_void, buf.len(), 0) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let rc = unsafe { libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rc as usize)
        }
    }

    fn set_recv_timeout(&self, timeout: Duration) -> io::Result<()> {
        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        let rc = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl Drop for NfqSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

// ─── Message building ───────────────────────────────────────────────────────

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Incrementally built netlink message: nlmsghdr + nfgenmsg + attributes.
struct NlMsg {
    buf: Vec<u8>,
}

impl NlMsg {
    fn new(msg_type: u16, flags: u16, family: u8, res_id: u16) -> Self {
        let mut buf = vec![0u8; NLMSG_HDRLEN];
        buf[4..6].copy_from_slice(&msg_type.to_ne_bytes());
        buf[6..8].copy_from_slice(&flags.to_ne_bytes());
        // seq and pid stay 0.
        buf.push(family);
        buf.push(0); // NFNETLINK_V0
        buf.extend_from_slice(&res_id.to_be_bytes());
        NlMsg { buf }
    }

    /// Config message addressed to `queue`.
    fn config(queue: u16) -> Self {
        NlMsg::new(
            (NFNL_SUBSYS_QUEUE << 8) | NFQNL_MSG_CONFIG,
            (libc::NLM_F_REQUEST | libc::NLM_F_ACK) as u16,
            libc::AF_UNSPEC as u8,
            queue,
        )
    }

    /// Verdict message addressed to `queue`.
    fn verdict(queue: u16) -> Self {
        NlMsg::new(
            (NFNL_SUBSYS_QUEUE << 8) | NFQNL_MSG_VERDICT,
            libc::NLM_F_REQUEST as u16,
            libc::AF_UNSPEC as u8,
            queue,
        )
    }

    fn put_attr(&mut self, attr_type: u16, payload: &[u8]) {
        let len = NLATTR_HDRLEN + payload.len();
        self.buf.extend_from_slice(&(len as u16).to_ne_bytes());
        self.buf.extend_from_slice(&attr_type.to_ne_bytes());
        self.buf.extend_from_slice(payload);
        self.buf.resize(align4(self.buf.len()), 0);
    }

    fn finish(mut self) -> Vec<u8> {
        let len = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&len.to_ne_bytes());
        self.buf
    }
}

/// `nfqnl_msg_config_cmd`: command, padding, protocol family.
fn cfg_cmd(command: u8, pf: u16) -> [u8; 4] {
    let pf = pf.to_be_bytes();
    [command, 0, pf[0], pf[1]]
}

fn pf_command(command: u8) -> NlMsg {
    let mut msg = NlMsg::config(0);
    msg.put_attr(NFQA_CFG_CMD, &cfg_cmd(command, libc::AF_INET as u16));
    msg
}

/// Send one config message and wait for its netlink ACK.
fn config_roundtrip(sock: &NfqSocket, msg: NlMsg, what: &'static str) -> Result<(), NfqError> {
    let wrap = |source: io::Error| NfqError::Config { what, source };

    sock.send(&msg.finish()).map_err(wrap)?;

    let mut buf = vec![0u8; 8192];
    let n = sock.recv(&mut buf).map_err(wrap)?;
    for msg in NlIter::new(&buf[..n]) {
        if msg.msg_type == libc::NLMSG_ERROR as u16 {
            if msg.payload.len() < 4 {
                return Err(wrap(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "truncated netlink ack",
                )));
            }
            let code = i32::from_ne_bytes([
                msg.payload[0],
                msg.payload[1],
                msg.payload[2],
                msg.payload[3],
            ]);
            if code != 0 {
                return Err(wrap(io::Error::from_raw_os_error(-code)));
            }
            return Ok(());
        }
    }
    // No explicit ack in the datagram; treat as accepted.
    Ok(())
}

// ─── Parsing ────────────────────────────────────────────────────────────────

struct NlMessage<'a> {
    msg_type: u16,
    payload: &'a [u8],
}

/// Iterator over the netlink messages of one datagram.
struct NlIter<'a> {
    data: &'a [u8],
}

impl<'a> NlIter<'a> {
    fn new(data: &'a [u8]) -> Self {
        NlIter { data }
    }
}

impl<'a> Iterator for NlIter<'a> {
    type Item = NlMessage<'a>;

    fn next(&mut self) -> Option<NlMessage<'a>> {
        if self.data.len() < NLMSG_HDRLEN {
            return None;
        }
        let len = u32::from_ne_bytes([self.data[0], self.data[1], self.data[2], self.data[3]])
            as usize;
        if len < NLMSG_HDRLEN || len > self.data.len() {
            return None;
        }
        let msg_type = u16::from_ne_bytes([self.data[4], self.data[5]]);
        let payload = &self.data[NLMSG_HDRLEN..len];
        self.data = &self.data[align4(len).min(self.data.len())..];
        Some(NlMessage { msg_type, payload })
    }
}

/// Iterator over the attributes of one message payload.
struct AttrIter<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for AttrIter<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<(u16, &'a [u8])> {
        if self.data.len() < NLATTR_HDRLEN {
            return None;
        }
        let len = u16::from_ne_bytes([self.data[0], self.data[1]]) as usize;
        if len < NLATTR_HDRLEN || len > self.data.len() {
            return None;
        }
        let attr_type = u16::from_ne_bytes([self.data[2], self.data[3]]) & 0x7fff;
        let value = &self.data[NLATTR_HDRLEN..len];
        self.data = &self.data[align4(len).min(self.data.len())..];
        Some((attr_type, value))
    }
}

fn parse_packet(payload: &[u8]) -> Option<PacketEvent> {
    if payload.len() < NFGENMSG_LEN {
        return None;
    }
    let mut id = None;
    let mut mark = 0u32;
    let mut data: Option<&[u8]> = None;

    let attrs = AttrIter {
        data: &payload[NFGENMSG_LEN..],
    };
    for (attr_type, value) in attrs {
        match attr_type {
            NFQA_PACKET_HDR if value.len() >= 4 => {
                id = Some(u32::from_be_bytes([value[0], value[1], value[2], value[3]]));
            }
            NFQA_MARK if value.len() >= 4 => {
                mark = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
            }
            NFQA_PAYLOAD => data = Some(value),
            _ => {}
        }
    }

    Some(PacketEvent {
        id: id?,
        mark,
        payload: Bytes::copy_from_slice(data?),
    })
}

// ─── Reader ─────────────────────────────────────────────────────────────────

/// Blocking receive half of the queue.
pub struct PacketReader {
    sock: Arc<NfqSocket>,
    buf: Vec<u8>,
    pending: VecDeque<PacketEvent>,
}

impl PacketReader {
    /// Next diverted packet. `Ok(None)` means the receive timed out or
    /// was interrupted — check the shutdown flag and call again.
    pub fn recv(&mut self) -> io::Result<Option<PacketEvent>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }

        let n = match self.sock.recv(&mut self.buf) {
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        for msg in NlIter::new(&self.buf[..n]) {
            if msg.msg_type == (NFNL_SUBSYS_QUEUE << 8) | NFQNL_MSG_PACKET {
                match parse_packet(msg.payload) {
                    Some(event) => self.pending.push_back(event),
                    None => debug!("skipping malformed queue message"),
                }
            }
        }

        Ok(self.pending.pop_front())
    }
}

// ─── Verdicts ───────────────────────────────────────────────────────────────

/// Sending half of the queue; clone freely across threads.
#[derive(Clone)]
pub struct VerdictHandle {
    sock: Arc<NfqSocket>,
    queue: u16,
}

impl VerdictHandle {
    fn send_verdict(&self, id: u32, verdict: u32, payload: Option<&[u8]>) -> io::Result<()> {
        let mut msg = NlMsg::verdict(self.queue);
        let mut hdr = [0u8; 8];
        hdr[0..4].copy_from_slice(&verdict.to_be_bytes());
        hdr[4..8].copy_from_slice(&id.to_be_bytes());
        msg.put_attr(NFQA_VERDICT_HDR, &hdr);
        if let Some(data) = payload {
            msg.put_attr(NFQA_PAYLOAD, data);
        }
        self.sock.send(&msg.finish())
    }
}

impl VerdictSink for VerdictHandle {
    fn accept(&self, id: u32, payload: &[u8]) -> io::Result<()> {
        self.send_verdict(id, NF_ACCEPT, Some(payload))
    }

    fn drop_packet(&self, id: u32) -> io::Result<()> {
        self.send_verdict(id, NF_DROP, None)
    }
}
