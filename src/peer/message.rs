use crate::peer::error::PeerError;

/// Wire form of a keep-alive: a zero length prefix and nothing else.
pub const KEEP_ALIVE: [u8; 4] = [0; 4];

/// Upper bound on a single frame; anything larger is treated as hostile.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Choke),
            1 => Ok(Self::Unchoke),
            2 => Ok(Self::Interested),
            3 => Ok(Self::NotInterested),
            4 => Ok(Self::Have),
            5 => Ok(Self::Bitfield),
            6 => Ok(Self::Request),
            7 => Ok(Self::Piece),
            8 => Ok(Self::Cancel),
            other => Err(PeerError::UnknownMessageId(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageId,
    pub payload: Vec<u8>,
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn triple_payload(index: u32, begin: u32, length: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(12);
    payload.extend_from_slice(&index.to_be_bytes());
    payload.extend_from_slice(&begin.to_be_bytes());
    payload.extend_from_slice(&length.to_be_bytes());
    payload
}

impl Message {
    /// A message with an empty payload (choke, unchoke, interested, ...).
    pub fn new(kind: MessageId) -> Self {
        Self {
            kind,
            payload: Vec::new(),
        }
    }

    pub fn have(index: u32) -> Self {
        Self {
            kind: MessageId::Have,
            payload: index.to_be_bytes().to_vec(),
        }
    }

    pub fn request(index: u32, begin: u32, length: u32) -> Self {
        Self {
            kind: MessageId::Request,
            payload: triple_payload(index, begin, length),
        }
    }

    pub fn cancel(index: u32, begin: u32, length: u32) -> Self {
        Self {
            kind: MessageId::Cancel,
            payload: triple_payload(index, begin, length),
        }
    }

    pub fn piece(index: u32, begin: u32, block: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(8 + block.len());
        payload.extend_from_slice(&index.to_be_bytes());
        payload.extend_from_slice(&begin.to_be_bytes());
        payload.extend_from_slice(block);
        Self {
            kind: MessageId::Piece,
            payload,
        }
    }

    /// `<length prefix><message id><payload>`
    pub fn serialize(&self) -> Vec<u8> {
        let total_len = 1 + self.payload.len();
        let mut buf = Vec::with_capacity(4 + total_len);

        buf.extend_from_slice(&(total_len as u32).to_be_bytes());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.payload);

        buf
    }

    /// Decodes one complete frame. `Ok(None)` is a keep-alive.
    ///
    /// Bytes past the declared length are ignored.
    pub fn deserialize(buf: &[u8]) -> Result<Option<Self>, PeerError> {
        if buf.len() < 4 {
            return Err(PeerError::Truncated {
                expected: 4,
                received: buf.len(),
            });
        }

        let len = be_u32(&buf[0..4]) as usize;
        if len == 0 {
            return Ok(None);
        }
        if buf.len() < 4 + len {
            return Err(PeerError::Truncated {
                expected: 4 + len,
                received: buf.len(),
            });
        }

        let kind = MessageId::try_from(buf[4])?;
        let payload = buf[5..4 + len].to_vec();

        Ok(Some(Self { kind, payload }))
    }

    fn expect_kind(&self, expected: MessageId) -> Result<(), PeerError> {
        if self.kind != expected {
            return Err(PeerError::UnexpectedMessage {
                expected,
                actual: self.kind,
            });
        }
        Ok(())
    }

    /// Returns the piece index announced by a `Have`.
    pub fn parse_have(&self) -> Result<u32, PeerError> {
        self.expect_kind(MessageId::Have)?;
        if self.payload.len() != 4 {
            return Err(PeerError::InvalidPayload(format!(
                "have payload must be 4 bytes, got {}",
                self.payload.len()
            )));
        }
        Ok(be_u32(&self.payload))
    }

    /// Returns `(index, begin, length)` of a `Request` or `Cancel`.
    pub fn parse_request(&self) -> Result<(u32, u32, u32), PeerError> {
        if self.kind != MessageId::Cancel {
            self.expect_kind(MessageId::Request)?;
        }
        if self.payload.len() != 12 {
            return Err(PeerError::InvalidPayload(format!(
                "request payload must be 12 bytes, got {}",
                self.payload.len()
            )));
        }
        Ok((
            be_u32(&self.payload[0..4]),
            be_u32(&self.payload[4..8]),
            be_u32(&self.payload[8..12]),
        ))
    }

    /// Index named by a `Piece` message, without validating the rest.
    pub fn piece_index(&self) -> Option<u32> {
        (self.kind == MessageId::Piece && self.payload.len() >= 4)
            .then(|| be_u32(&self.payload[0..4]))
    }

    /// Offset named by a `Piece` message, without validating the rest.
    pub fn piece_begin(&self) -> Option<u32> {
        (self.kind == MessageId::Piece && self.payload.len() >= 8)
            .then(|| be_u32(&self.payload[4..8]))
    }

    /// Copies the block carried by a `Piece` into `buf` at its offset and
    /// returns the number of bytes copied.
    pub fn parse_piece(&self, index: u32, buf: &mut [u8]) -> Result<usize, PeerError> {
        self.expect_kind(MessageId::Piece)?;
        if self.payload.len() < 8 {
            return Err(PeerError::InvalidPayload(format!(
                "piece payload too short: {} < 8",
                self.payload.len()
            )));
        }

        let parsed_index = be_u32(&self.payload[0..4]);
        if parsed_index != index {
            return Err(PeerError::InvalidPayload(format!(
                "expected piece {index}, got {parsed_index}"
            )));
        }

        let begin = be_u32(&self.payload[4..8]) as usize;
        if begin >= buf.len() {
            return Err(PeerError::InvalidPayload(format!(
                "block offset {begin} out of bounds for piece of {} bytes",
                buf.len()
            )));
        }

        let data = &self.payload[8..];
        if begin + data.len() > buf.len() {
            return Err(PeerError::InvalidPayload(format!(
                "block of {} bytes at offset {begin} overflows piece of {} bytes",
                data.len(),
                buf.len()
            )));
        }

        buf[begin..begin + data.len()].copy_from_slice(data);
        Ok(data.len())
    }
}

/// Serializes an optional message, writing a keep-alive for `None`.
pub fn serialize(message: Option<&Message>) -> Vec<u8> {
    match message {
        Some(message) => message.serialize(),
        None => KEEP_ALIVE.to_vec(),
    }
}

/// Which pieces a peer holds, MSB first within each byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    pub bits: Vec<u8>,
}

impl Bitfield {
    /// Out-of-range indices read as "not available".
    pub fn has_piece(&self, index: usize) -> bool {
        let byte = index / 8;
        let bit = 7 - (index % 8);
        match self.bits.get(byte) {
            Some(b) => b & (1 << bit) != 0,
            None => false,
        }
    }

    /// Out-of-range indices are ignored.
    pub fn set_piece(&mut self, index: usize) {
        let byte = index / 8;
        let bit = 7 - (index % 8);
        if let Some(b) = self.bits.get_mut(byte) {
            *b |= 1 << bit;
        }
    }

    pub fn from_piece_count(count: usize) -> Self {
        Bitfield {
            bits: vec![0; count.div_ceil(8)],
        }
    }

    pub fn count_ones(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }
}

impl From<Bitfield> for Message {
    fn from(b: Bitfield) -> Self {
        Message {
            kind: MessageId::Bitfield,
            payload: b.bits,
        }
    }
}

impl TryFrom<Message> for Bitfield {
    type Error = PeerError;

    fn try_from(msg: Message) -> Result<Self, Self::Error> {
        msg.expect_kind(MessageId::Bitfield)?;
        Ok(Bitfield { bits: msg.payload })
    }
}
