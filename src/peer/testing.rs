//! Loopback peers for exercising the download core.

use std::collections::HashSet;
use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::BytesMut;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::peer::Peer;
use crate::peer::handshake::Handshake;
use crate::peer::message::{Bitfield, Message, MessageId};
use crate::torrent::Torrent;

pub(crate) const TEST_INFOHASH: [u8; 20] = [0x5A; 20];
pub(crate) const TEST_PEER_ID: [u8; 20] = *b"-RF0001-testtesttest";

/// What a mock peer observed over its connection.
#[derive(Debug, Default, Clone)]
pub(crate) struct MockStats {
    pub requests: usize,
    pub max_outstanding: usize,
    pub max_request_len: u32,
    pub out_of_range: usize,
    pub haves: Vec<u32>,
    pub corrupted: Vec<u32>,
    pub requests_while_choked: usize,
}

/// A remote peer holding `content`, advertising and serving `have`.
#[derive(Debug, Clone)]
pub(crate) struct MockPeer {
    infohash: [u8; 20],
    content: Vec<u8>,
    piece_length: u32,
    have: Vec<u32>,
    corrupt_once: bool,
    batch_requests: bool,
    silent: bool,
    noisy: bool,
    choke_once: bool,
    announce_later: bool,
    late_once: Option<Duration>,
}

impl MockPeer {
    /// A peer holding every piece of `content`.
    pub fn new(infohash: [u8; 20], content: Vec<u8>, piece_length: u32) -> Self {
        let count = content.len().div_ceil(piece_length as usize) as u32;
        Self {
            infohash,
            content,
            piece_length,
            have: (0..count).collect(),
            corrupt_once: false,
            batch_requests: false,
            silent: false,
            noisy: false,
            choke_once: false,
            announce_later: false,
            late_once: None,
        }
    }

    pub fn with_pieces(mut self, have: &[u32]) -> Self {
        self.have = have.to_vec();
        self
    }

    /// Serve a bad first block the first time each piece is requested.
    pub fn corrupt_once(mut self) -> Self {
        self.corrupt_once = true;
        self
    }

    /// Hold requests until five are queued or the client goes quiet.
    pub fn batch_requests(mut self) -> Self {
        self.batch_requests = true;
        self
    }

    /// Never unchoke and never serve.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Send a keep-alive, an unknown message id and a `Have` after unchoking.
    pub fn noisy(mut self) -> Self {
        self.noisy = true;
        self
    }

    /// Choke before answering the first batch of five requests, serve that
    /// batch anyway, then unchoke after a pause.
    pub fn choke_once(mut self) -> Self {
        self.choke_once = true;
        self.batch_requests = true;
        self
    }

    /// Advertise an empty bitfield, then announce each held piece with `Have`
    /// before unchoking.
    pub fn announce_later(mut self) -> Self {
        self.announce_later = true;
        self
    }

    /// Answer the first request for each piece only after `delay`.
    pub fn late_once(mut self, delay: Duration) -> Self {
        self.late_once = Some(delay);
        self
    }

    fn piece_count(&self) -> usize {
        self.content.len().div_ceil(self.piece_length as usize)
    }

    fn piece_size(&self, index: u32) -> Option<usize> {
        let begin = index as usize * self.piece_length as usize;
        if begin >= self.content.len() {
            return None;
        }
        Some((self.content.len() - begin).min(self.piece_length as usize))
    }

    fn bitfield(&self) -> Bitfield {
        let mut bitfield = Bitfield::from_piece_count(self.piece_count());
        if self.announce_later {
            return bitfield;
        }
        for &index in &self.have {
            bitfield.set_piece(index as usize);
        }
        bitfield
    }

    /// Listens on a loopback port and serves one connection.
    pub async fn spawn(self) -> (Peer, JoinHandle<MockStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return MockStats::default();
            };
            self.serve(stream).await
        });
        let peer = Peer {
            ip_addr: Ipv4Addr::LOCALHOST,
            port,
        };
        (peer, handle)
    }

    async fn serve(self, mut stream: TcpStream) -> MockStats {
        let mut stats = MockStats::default();

        let mut theirs = [0u8; 68];
        if stream.read_exact(&mut theirs).await.is_err() {
            return stats;
        }
        let mut setup = Handshake::new(self.infohash, [0x42; 20]).serialize();
        setup.extend(Message::from(self.bitfield()).serialize());
        if stream.write_all(&setup).await.is_err() {
            return stats;
        }

        let mut buf = BytesMut::new();
        if self.silent {
            while next_frame(&mut stream, &mut buf, None).await.is_ok() {}
            return stats;
        }

        let mut hello = Vec::new();
        if self.announce_later {
            for &index in &self.have {
                hello.extend(Message::have(index).serialize());
            }
        }
        hello.extend(Message::new(MessageId::Unchoke).serialize());
        if self.noisy {
            hello.extend_from_slice(&[0, 0, 0, 0]);
            hello.extend_from_slice(&[0, 0, 0, 3, 20, 0xAB, 0xCD]);
            hello.extend(Message::have(0).serialize());
        }
        if stream.write_all(&hello).await.is_err() {
            return stats;
        }

        let mut corrupted: HashSet<u32> = HashSet::new();
        let mut delayed: HashSet<u32> = HashSet::new();
        let mut pending: Vec<(u32, u32, u32)> = Vec::new();
        let batch_idle = self.batch_requests.then_some(Duration::from_millis(50));
        let mut choke_pending = self.choke_once;
        let mut unchoke_at: Option<Instant> = None;

        loop {
            let idle = match unchoke_at {
                Some(at) => Some(at.saturating_duration_since(Instant::now())),
                None => batch_idle,
            };
            let frame = next_frame(&mut stream, &mut buf, idle).await;
            let flush = match frame {
                Ok(Some(message)) => {
                    match message.kind {
                        MessageId::Request => {
                            let Ok(request) = message.parse_request() else {
                                break;
                            };
                            stats.requests += 1;
                            if unchoke_at.is_some() {
                                stats.requests_while_choked += 1;
                            }
                            stats.max_request_len = stats.max_request_len.max(request.2);
                            pending.push(request);
                            stats.max_outstanding = stats.max_outstanding.max(pending.len());
                        }
                        MessageId::Have => {
                            if let Ok(index) = message.parse_have() {
                                stats.haves.push(index);
                            }
                        }
                        _ => {}
                    }
                    !self.batch_requests || pending.len() >= 5
                }
                Ok(None) => false,
                Err(FrameError::Idle) => {
                    if unchoke_at.take().is_some() {
                        let unchoke = Message::new(MessageId::Unchoke).serialize();
                        if stream.write_all(&unchoke).await.is_err() {
                            return stats;
                        }
                        false
                    } else {
                        true
                    }
                }
                Err(FrameError::Closed) => break,
            };

            if !flush {
                continue;
            }
            if choke_pending && !pending.is_empty() {
                choke_pending = false;
                let choke = Message::new(MessageId::Choke).serialize();
                if stream.write_all(&choke).await.is_err() {
                    return stats;
                }
                unchoke_at = Some(Instant::now() + Duration::from_millis(100));
            }
            for (index, begin, length) in pending.drain(..) {
                let Some(block) = self.block(index, begin, length) else {
                    stats.out_of_range += 1;
                    continue;
                };
                let mut block = block.to_vec();
                if let Some(delay) = self.late_once {
                    if delayed.insert(index) {
                        tokio::time::sleep(delay).await;
                    }
                }
                if self.corrupt_once && begin == 0 && corrupted.insert(index) {
                    block[0] ^= 0xFF;
                    stats.corrupted.push(index);
                }
                let reply = Message::piece(index, begin, &block).serialize();
                if stream.write_all(&reply).await.is_err() {
                    return stats;
                }
            }
        }

        stats
    }

    fn block(&self, index: u32, begin: u32, length: u32) -> Option<&[u8]> {
        if !self.have.contains(&index) || length == 0 {
            return None;
        }
        let size = self.piece_size(index)?;
        let (begin, length) = (begin as usize, length as usize);
        if begin + length > size {
            return None;
        }
        let start = index as usize * self.piece_length as usize + begin;
        Some(&self.content[start..start + length])
    }
}

enum FrameError {
    Idle,
    Closed,
}

/// Next frame from `stream`; `Ok(None)` is a keep-alive. Unknown ids are skipped.
async fn next_frame(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    idle: Option<Duration>,
) -> Result<Option<Message>, FrameError> {
    loop {
        if buf.len() >= 4 {
            let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
            if buf.len() >= 4 + len {
                let frame = buf.split_to(4 + len);
                match Message::deserialize(&frame) {
                    Ok(message) => return Ok(message),
                    Err(_) => continue,
                }
            }
        }

        let read = match idle {
            Some(idle) => match tokio::time::timeout(idle, stream.read_buf(buf)).await {
                Ok(read) => read,
                Err(_) => return Err(FrameError::Idle),
            },
            None => stream.read_buf(buf).await,
        };
        match read {
            Ok(0) | Err(_) => return Err(FrameError::Closed),
            Ok(_) => {}
        }
    }
}

/// Accepts one connection and hands it to `handler`.
pub(crate) async fn spawn_raw<F, Fut>(handler: F) -> Peer
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            handler(stream).await;
        }
    });
    Peer {
        ip_addr: Ipv4Addr::LOCALHOST,
        port,
    }
}

/// A torrent over `content` whose piece digests are correct.
pub(crate) fn torrent_for(content: &[u8], piece_length: u32, peers: Vec<Peer>) -> Torrent {
    let pieces: Vec<[u8; 20]> = content
        .chunks(piece_length as usize)
        .map(|chunk| Sha1::digest(chunk).into())
        .collect();
    Torrent::new(
        "test.bin".to_string(),
        content.len() as u64,
        piece_length,
        pieces,
        TEST_INFOHASH,
        TEST_PEER_ID,
        peers,
    )
    .unwrap()
}

/// Deterministic non-repeating-ish content.
pub(crate) fn sample_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
