//! Carries the wire codecs in `http.rs`/`udp.rs` over an actual network
//! connection.
//!
//! [`TrackerTransport`] is a two-variant sum type rather than a trait
//! object: exactly two backends exist and are known at compile time, so a
//! `match` replaces what would otherwise be a single-implementor `dyn`
//! indirection. The UDP side does BEP-15's retry schedule
//! (`15 * 2^n` seconds, 9 attempts) and caches its `connection_id` for the
//! BEP-15-mandated 60 seconds; the happy-eyeballs connect races a `Connect`
//! round-trip against every address a hostname resolves to and keeps
//! whichever answers first, translating the reference client's
//! thread-per-address approach into concurrent `tokio` tasks.
use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::instrument;

use super::{http, udp};
use super::{AnnounceParams, AnnounceResult, ScrapeResult, TrackerError, TrackerResult};

fn retry_schedule() -> impl Iterator<Item = Duration> {
    (0..9u32).map(|n| Duration::from_secs(15 * 2u64.pow(n)))
}

const CONNECTION_ID_TTL: Duration = Duration::from_secs(60);

/// An optional caller-supplied wall-clock bound on a tracker exchange.
/// `None` means "let the BEP-15 retry schedule run to exhaustion"; `Some`
/// is checked before every retry and send so a slow schedule gets cut
/// short with `TrackerError::Cancelled` instead of running past it.
pub type Deadline = Option<Instant>;

/// Returns how long remains before `deadline`, or `Cancelled` if it has
/// already passed. A `None` deadline never expires.
fn remaining(deadline: Deadline) -> TrackerResult<Option<Duration>> {
    match deadline {
        None => Ok(None),
        Some(at) => {
            let now = Instant::now();
            if now >= at {
                Err(TrackerError::Cancelled)
            } else {
                Ok(Some(at - now))
            }
        }
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
    announce_url: url::Url,
}

impl HttpTransport {
    pub fn new(announce_url: &str) -> TrackerResult<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            announce_url: url::Url::parse(announce_url)?,
        })
    }

    #[instrument(level = "debug", skip(self, params))]
    pub async fn announce(&self, params: &AnnounceParams, deadline: Deadline) -> TrackerResult<AnnounceResult> {
        let mut url = self.announce_url.clone();
        url.query_pairs_mut().extend_pairs(http::announce_query(params)).finish();
        let bytes = bounded_send(&self.client, url, deadline).await?;
        http::parse_announce_response(&bytes)
    }

    pub async fn scrape(&self, info_hash: &[u8; 20], deadline: Deadline) -> TrackerResult<ScrapeResult> {
        let mut url = scrape_url(&self.announce_url)?;
        url.query_pairs_mut()
            .append_pair("info_hash", &http_url_encode(info_hash));
        let bytes = bounded_send(&self.client, url, deadline).await?;
        http::parse_scrape_response(&bytes, info_hash)
    }
}

/// Issues the GET, bounding it by `deadline` when one was supplied.
async fn bounded_send(client: &reqwest::Client, url: url::Url, deadline: Deadline) -> TrackerResult<bytes::Bytes> {
    let request = async { Ok::<_, TrackerError>(client.get(url).send().await?.bytes().await?) };
    match remaining(deadline)? {
        None => request.await,
        Some(budget) => timeout(budget, request).await.map_err(|_| TrackerError::Cancelled)?,
    }
}

/// BEP-48: a tracker's scrape URL is its announce URL with the last path
/// segment `announce` replaced by `scrape`. Trackers whose announce path
/// doesn't end that way don't support scraping.
fn scrape_url(announce_url: &url::Url) -> TrackerResult<url::Url> {
    let mut url = announce_url.clone();
    let new_path = {
        let path = url.path();
        if let Some(prefix) = path.strip_suffix("announce") {
            format!("{prefix}scrape")
        } else {
            return Err(TrackerError::UnsupportedScheme(
                "tracker announce URL does not end in 'announce'; scrape not supported".to_string(),
            ));
        }
    };
    url.set_path(&new_path);
    Ok(url)
}

fn http_url_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("%{:02X}", b)).collect()
}

pub struct UdpTransport {
    socket: UdpSocket,
    peer_addr: SocketAddr,
    connection: Option<(u64, Instant)>,
}

impl UdpTransport {
    /// Resolves every address behind `host:port` and races a `Connect`
    /// round-trip against each concurrently over its own ephemeral socket;
    /// the first address to answer wins, the rest are abandoned.
    #[instrument(level = "debug")]
    pub async fn connect(host: &str, port: u16, deadline: Deadline) -> TrackerResult<Self> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
        if addrs.is_empty() {
            return Err(TrackerError::Unreachable);
        }

        let (tx, mut rx) = tokio::sync::mpsc::channel(addrs.len());
        let mut tasks = tokio::task::JoinSet::new();
        for addr in addrs {
            let tx = tx.clone();
            tasks.spawn(async move {
                if let Ok(outcome) = connect_one(addr, deadline).await {
                    let _ = tx.send(outcome).await;
                }
            });
        }
        drop(tx);

        let recv = rx.recv();
        let received = match remaining(deadline)? {
            None => recv.await,
            Some(budget) => timeout(budget, recv).await.map_err(|_| TrackerError::Cancelled)?,
        };

        match received {
            Some((socket, peer_addr, connection_id)) => {
                tasks.abort_all();
                Ok(Self {
                    socket,
                    peer_addr,
                    connection: Some((connection_id, Instant::now())),
                })
            }
            None => Err(TrackerError::Unreachable),
        }
    }

    async fn ensure_connection(&mut self, deadline: Deadline) -> TrackerResult<u64> {
        if let Some((id, obtained_at)) = self.connection {
            if obtained_at.elapsed() < CONNECTION_ID_TTL {
                return Ok(id);
            }
        }
        let id = request_connection_id(&self.socket, deadline).await?;
        self.connection = Some((id, Instant::now()));
        Ok(id)
    }

    #[instrument(level = "debug", skip(self, params))]
    pub async fn announce(&mut self, params: &AnnounceParams, deadline: Deadline) -> TrackerResult<AnnounceResult> {
        let connection_id = self.ensure_connection(deadline).await?;
        let transaction_id = rand::rng().random::<u32>();
        let request = udp::encode_announce_request(connection_id, transaction_id, params);
        send_and_retry(&self.socket, &request, deadline, |bytes| {
            udp::parse_announce_response(bytes, transaction_id)
        })
        .await
    }

    pub async fn scrape(&mut self, info_hash: &[u8; 20], deadline: Deadline) -> TrackerResult<ScrapeResult> {
        let connection_id = self.ensure_connection(deadline).await?;
        let transaction_id = rand::rng().random::<u32>();
        let request = udp::encode_scrape_request(connection_id, transaction_id, info_hash);
        send_and_retry(&self.socket, &request, deadline, |bytes| {
            udp::parse_scrape_response(bytes, transaction_id)
        })
        .await
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

async fn connect_one(addr: SocketAddr, deadline: Deadline) -> TrackerResult<(UdpSocket, SocketAddr, u64)> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(addr).await?;
    let connection_id = request_connection_id(&socket, deadline).await?;
    Ok((socket, addr, connection_id))
}

async fn request_connection_id(socket: &UdpSocket, deadline: Deadline) -> TrackerResult<u64> {
    let transaction_id = rand::rng().random::<u32>();
    let request = udp::encode_connect_request(transaction_id);
    send_and_retry(socket, &request, deadline, |bytes| udp::parse_connect_response(bytes, transaction_id)).await
}

/// Resends `request` on the BEP-15 backoff schedule, parsing each reply
/// with `parse`. A transaction-id or action mismatch is a silently
/// dropped datagram (per BEP-15) and just consumes one retry slot; an
/// explicit tracker error response is terminal and propagates immediately.
/// `deadline`, if set, is checked before every attempt and additionally
/// caps that attempt's wait, so a caller-supplied bound can cut the
/// schedule short with `Cancelled` instead of letting all nine retries run.
async fn send_and_retry<T>(
    socket: &UdpSocket,
    request: &[u8],
    deadline: Deadline,
    mut parse: impl FnMut(&[u8]) -> TrackerResult<T>,
) -> TrackerResult<T> {
    let mut buf = vec![0u8; 2048];
    for delay in retry_schedule() {
        let budget = match remaining(deadline)? {
            None => delay,
            Some(left) => left.min(delay),
        };
        socket.send(request).await?;
        match timeout(budget, socket.recv(&mut buf)).await {
            Ok(Ok(len)) => match parse(&buf[..len]) {
                Ok(value) => return Ok(value),
                Err(TrackerError::Failure(msg)) => return Err(TrackerError::Failure(msg)),
                Err(_) => continue,
            },
            _ => {
                if remaining(deadline).is_err() {
                    return Err(TrackerError::Cancelled);
                }
                continue;
            }
        }
    }
    Err(TrackerError::Unreachable)
}

/// Either an HTTP (BEP-3) or UDP (BEP-15) tracker connection, selected by
/// the tracker URL's scheme.
pub enum TrackerTransport {
    Http(HttpTransport),
    Udp(UdpTransport),
}

impl TrackerTransport {
    pub async fn connect(announce_url: &str, deadline: Deadline) -> TrackerResult<Self> {
        let url = url::Url::parse(announce_url)?;
        match url.scheme() {
            "http" | "https" => Ok(TrackerTransport::Http(HttpTransport::new(announce_url)?)),
            "udp" => {
                let host = url
                    .host_str()
                    .ok_or(TrackerError::Malformed("udp tracker URL missing host"))?
                    .to_string();
                let port = url.port().unwrap_or(80);
                Ok(TrackerTransport::Udp(UdpTransport::connect(&host, port, deadline).await?))
            }
            other => Err(TrackerError::UnsupportedScheme(other.to_string())),
        }
    }

    pub async fn announce(&mut self, params: &AnnounceParams, deadline: Deadline) -> TrackerResult<AnnounceResult> {
        match self {
            TrackerTransport::Http(t) => t.announce(params, deadline).await,
            TrackerTransport::Udp(t) => t.announce(params, deadline).await,
        }
    }

    pub async fn scrape(&mut self, info_hash: &[u8; 20], deadline: Deadline) -> TrackerResult<ScrapeResult> {
        match self {
            TrackerTransport::Http(t) => t.scrape(info_hash, deadline).await,
            TrackerTransport::Udp(t) => t.scrape(info_hash, deadline).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ByteOrder;

    #[test]
    fn retry_schedule_matches_bep15() {
        let delays: Vec<u64> = retry_schedule().map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![15, 30, 60, 120, 240, 480, 960, 1920, 3840]);
        assert_eq!(delays.iter().sum::<u64>(), 7665);
    }

    #[test]
    fn scrape_url_replaces_trailing_announce_segment() {
        let announce = url::Url::parse("http://tracker.example/x/announce").unwrap();
        let scrape = scrape_url(&announce).unwrap();
        assert_eq!(scrape.as_str(), "http://tracker.example/x/scrape");
    }

    #[test]
    fn scrape_url_rejects_non_announce_path() {
        let announce = url::Url::parse("http://tracker.example/foo").unwrap();
        assert!(scrape_url(&announce).is_err());
    }

    #[tokio::test]
    async fn udp_connect_races_a_single_loopback_responder() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let responder_addr = responder.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            let (len, from) = responder.recv_from(&mut buf).await.unwrap();
            let txn_id = byteorder::BigEndian::read_u32(&buf[12..16]);
            let _ = len;
            let resp = {
                let mut r = vec![0u8; 16];
                byteorder::BigEndian::write_u32(&mut r[0..4], 0);
                byteorder::BigEndian::write_u32(&mut r[4..8], txn_id);
                byteorder::BigEndian::write_u64(&mut r[8..16], 0x1234_5678);
                r
            };
            responder.send_to(&resp, from).await.unwrap();
        });

        let transport = UdpTransport::connect(&responder_addr.ip().to_string(), responder_addr.port(), None)
            .await
            .unwrap();
        assert_eq!(transport.connection.unwrap().0, 0x1234_5678);
    }

    #[tokio::test]
    async fn send_and_retry_honors_an_already_expired_deadline() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect("127.0.0.1:1").await.unwrap();
        let past_deadline = Some(Instant::now() - Duration::from_secs(1));
        let result: TrackerResult<()> =
            send_and_retry(&socket, &[0u8; 16], past_deadline, |_| Ok(())).await;
        assert!(matches!(result, Err(TrackerError::Cancelled)));
    }
}
