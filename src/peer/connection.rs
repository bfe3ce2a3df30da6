use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::config::DownloadConfig;
use crate::peer::Peer;
use crate::peer::error::PeerError;
use crate::peer::handshake::Handshake;
use crate::peer::message::{Bitfield, MAX_FRAME_LEN, Message, MessageId};

/// An established, handshaken connection to one peer.
///
/// `choked` and `bitfield` only change in response to messages read from this
/// connection. Dropping the value closes the socket.
#[derive(Debug)]
pub struct PeerConnection {
    pub peer: Peer,
    pub choked: bool,
    pub bitfield: Bitfield,
    pub remote_peer_id: [u8; 20],
    stream: TcpStream,
    read_buf: BytesMut,
    write_timeout: Duration,
}

impl PeerConnection {
    /// Dials `peer`, exchanges handshakes and reads the peer's bitfield.
    pub async fn connect(
        peer: Peer,
        infohash: [u8; 20],
        peer_id: [u8; 20],
        config: &DownloadConfig,
    ) -> Result<Self, PeerError> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(peer.socket_addr()))
            .await
            .map_err(|_| PeerError::Timeout("connect"))??;

        let mut conn = Self {
            peer,
            choked: true,
            bitfield: Bitfield { bits: Vec::new() },
            remote_peer_id: [0; 20],
            stream,
            read_buf: BytesMut::with_capacity(32 * 1024),
            write_timeout: config.write_timeout,
        };

        let ours = Handshake::new(infohash, peer_id);
        let theirs = timeout(config.handshake_timeout, conn.exchange_handshake(&ours))
            .await
            .map_err(|_| PeerError::Timeout("handshake"))??;
        if theirs.infohash != infohash {
            return Err(PeerError::InfoHashMismatch);
        }
        conn.remote_peer_id = theirs.peer_id;
        trace!(peer = %peer, "handshake complete");

        conn.bitfield = timeout(config.bitfield_timeout, conn.receive_bitfield())
            .await
            .map_err(|_| PeerError::Timeout("bitfield"))??;
        debug!(
            peer = %peer,
            pieces = conn.bitfield.count_ones(),
            "received bitfield"
        );

        Ok(conn)
    }

    async fn exchange_handshake(&mut self, ours: &Handshake) -> Result<Handshake, PeerError> {
        self.stream.write_all(&ours.serialize()).await?;

        self.fill_buf(1).await?;
        let pstr_len = self.read_buf[0] as usize;
        if pstr_len == 0 {
            return Err(PeerError::InvalidHandshake("protocol string length is zero"));
        }

        let len = Handshake::encoded_len(pstr_len);
        self.fill_buf(len).await?;
        let raw = self.read_buf.split_to(len);
        Handshake::deserialize(&raw)
    }

    async fn receive_bitfield(&mut self) -> Result<Bitfield, PeerError> {
        match self.receive_message().await? {
            Some(message) => Bitfield::try_from(message),
            None => Err(PeerError::UnexpectedKeepAlive(MessageId::Bitfield)),
        }
    }

    /// Reads until at least `n` bytes are buffered. Cancel safe: bytes already
    /// read stay in the buffer.
    async fn fill_buf(&mut self, n: usize) -> Result<(), PeerError> {
        while self.read_buf.len() < n {
            self.read_buf.reserve(n - self.read_buf.len());
            if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                if self.read_buf.is_empty() {
                    return Err(PeerError::ConnectionClosed);
                }
                return Err(PeerError::Truncated {
                    expected: n,
                    received: self.read_buf.len(),
                });
            }
        }
        Ok(())
    }

    /// Reads the next frame. `Ok(None)` is a keep-alive.
    ///
    /// Cancel safe, so callers may race it against a deadline without losing
    /// framing.
    pub async fn receive_message(&mut self) -> Result<Option<Message>, PeerError> {
        self.fill_buf(4).await?;
        let len = u32::from_be_bytes([
            self.read_buf[0],
            self.read_buf[1],
            self.read_buf[2],
            self.read_buf[3],
        ]) as usize;

        if len > MAX_FRAME_LEN {
            return Err(PeerError::InvalidPayload(format!(
                "frame of {len} bytes exceeds limit"
            )));
        }

        self.fill_buf(4 + len).await?;
        let frame = self.read_buf.split_to(4 + len);
        Message::deserialize(&frame)
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), PeerError> {
        timeout(self.write_timeout, self.stream.write_all(&message.serialize()))
            .await
            .map_err(|_| PeerError::Timeout("write"))??;
        Ok(())
    }

    pub async fn send_unchoke(&mut self) -> Result<(), PeerError> {
        self.send(&Message::new(MessageId::Unchoke)).await
    }

    pub async fn send_interested(&mut self) -> Result<(), PeerError> {
        self.send(&Message::new(MessageId::Interested)).await
    }

    pub async fn send_have(&mut self, index: u32) -> Result<(), PeerError> {
        self.send(&Message::have(index)).await
    }

    pub async fn send_request(
        &mut self,
        index: u32,
        begin: u32,
        length: u32,
    ) -> Result<(), PeerError> {
        self.send(&Message::request(index, begin, length)).await
    }
}
