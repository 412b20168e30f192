//! Native echo probing over an unprivileged ICMP datagram socket.

use anyhow::Result;
use edgepick_core::Measurement;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

const ECHO_REQUEST: u8 = 8;
const ECHO_REPLY: u8 = 0;
const HEADER_LEN: usize = 8;
const PAYLOAD_LEN: usize = 16;

static NEXT_SEQ: AtomicU16 = AtomicU16::new(1);

/// Open a nonblocking `SOCK_DGRAM`/`IPPROTO_ICMP` socket registered with tokio.
pub fn open_socket() -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4))?;
    socket.set_nonblocking(true)?;
    let std_sock: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_sock)?)
}

/// Whether this process may open ICMP datagram sockets.
pub fn available() -> bool {
    Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok()
}

/// Build an echo request. The kernel owns the identifier on datagram sockets,
/// so replies are matched on sequence number plus the payload token.
pub fn build_echo_request(sequence: u16, token: u32) -> Vec<u8> {
    let mut pkt = vec![0u8; HEADER_LEN + PAYLOAD_LEN];
    pkt[0] = ECHO_REQUEST;
    pkt[6..8].copy_from_slice(&sequence.to_be_bytes());
    pkt[8..12].copy_from_slice(&token.to_be_bytes());
    for (i, b) in pkt[12..].iter_mut().enumerate() {
        *b = i as u8;
    }
    let sum = checksum(&pkt);
    pkt[2..4].copy_from_slice(&sum.to_be_bytes());
    pkt
}

/// RFC 1071 internet checksum.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in data.chunks(2) {
        let word = if chunk.len() == 2 { u16::from_be_bytes([chunk[0], chunk[1]]) } else { u16::from(chunk[0]) << 8 };
        sum += u32::from(word);
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Whether `data` is the reply to `(sequence, token)`. Some platforms prepend the IPv4 header.
pub fn is_matching_reply(data: &[u8], sequence: u16, token: u32) -> bool {
    let icmp = match data.first() {
        Some(b) if b >> 4 == 4 && data.len() >= 20 => {
            let ihl = usize::from(b & 0x0f) * 4;
            data.get(ihl..).unwrap_or(&[])
        }
        _ => data,
    };
    icmp.len() >= HEADER_LEN + 4
        && icmp[0] == ECHO_REPLY
        && u16::from_be_bytes([icmp[6], icmp[7]]) == sequence
        && u32::from_be_bytes([icmp[8], icmp[9], icmp[10], icmp[11]]) == token
}

async fn echo_once(sock: &UdpSocket, dst: SocketAddr, token: u32, wait: Duration) -> Result<Option<Duration>> {
    let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
    let pkt = build_echo_request(seq, token);
    let started = Instant::now();
    sock.send_to(&pkt, dst).await?;
    let mut buf = [0u8; 1500];
    let waited = timeout(wait, async {
        loop {
            let (n, from) = sock.recv_from(&mut buf).await?;
            if from.ip() == dst.ip() && is_matching_reply(&buf[..n], seq, token) {
                return Ok::<_, std::io::Error>(started.elapsed());
            }
        }
    })
    .await;
    match waited {
        Ok(Ok(rtt)) => Ok(Some(rtt)),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Ok(None),
    }
}

/// Send `count` echoes back to back, each waiting up to `wait` for its reply.
pub async fn measure(addr: Ipv4Addr, count: u32, wait: Duration) -> Result<Measurement> {
    let sock = open_socket()?;
    let dst = SocketAddr::new(IpAddr::V4(addr), 0);
    let token = std::process::id().rotate_left(16) ^ u32::from(addr);
    let count = count.max(1);
    let mut rtts = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if let Some(rtt) = echo_once(&sock, dst, token, wait).await? {
            rtts.push(rtt.as_secs_f64() * 1000.0);
        }
    }
    if rtts.is_empty() {
        return Ok(Measurement::sentinel());
    }
    let lost = count - rtts.len() as u32;
    let avg = rtts.iter().sum::<f64>() / rtts.len() as f64;
    Ok(Measurement::measured(avg, lost * 100 / count))
}

/// [`measure`] under an overall deadline; any error or timeout yields the sentinel.
pub async fn run_icmp(addr: Ipv4Addr, count: u32, wait: Duration, overall: Duration) -> Measurement {
    match timeout(overall, measure(addr, count, wait)).await {
        Ok(Ok(m)) => m,
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "icmp probe failed");
            Measurement::sentinel()
        }
        Err(_) => {
            debug!(%addr, "icmp probe timed out");
            Measurement::sentinel()
        }
    }
}
