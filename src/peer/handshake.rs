use crate::peer::error::PeerError;

pub const PSTR: &str = "BitTorrent protocol";

/// Reserved bytes, info hash and peer id following the protocol string.
pub const HANDSHAKE_TAIL_LEN: usize = 8 + 20 + 20;

/// `<pstrlen><pstr><reserved><info_hash><peer_id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub pstr: Vec<u8>,
    pub infohash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(infohash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            pstr: PSTR.as_bytes().to_vec(),
            infohash,
            peer_id,
        }
    }

    /// Total encoded size for a protocol string of `pstr_len` bytes.
    pub fn encoded_len(pstr_len: usize) -> usize {
        1 + pstr_len + HANDSHAKE_TAIL_LEN
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::encoded_len(self.pstr.len()));
        buf.push(self.pstr.len() as u8);
        buf.extend_from_slice(&self.pstr);
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(&self.infohash);
        buf.extend_from_slice(&self.peer_id);
        buf
    }

    /// Parses a handshake whose protocol string length is whatever the
    /// first byte says. Reserved bytes are ignored.
    pub fn deserialize(buf: &[u8]) -> Result<Self, PeerError> {
        let Some(&pstr_len) = buf.first() else {
            return Err(PeerError::Truncated {
                expected: 1,
                received: 0,
            });
        };
        let pstr_len = pstr_len as usize;
        if pstr_len == 0 {
            return Err(PeerError::InvalidHandshake("protocol string length is zero"));
        }

        let expected = Self::encoded_len(pstr_len);
        if buf.len() < expected {
            return Err(PeerError::Truncated {
                expected,
                received: buf.len(),
            });
        }

        let pstr = buf[1..1 + pstr_len].to_vec();
        let tail = &buf[1 + pstr_len..expected];

        let mut infohash = [0u8; 20];
        infohash.copy_from_slice(&tail[8..28]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&tail[28..48]);

        Ok(Self {
            pstr,
            infohash,
            peer_id,
        })
    }
}
