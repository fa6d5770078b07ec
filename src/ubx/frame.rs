use thiserror::Error;

pub const SYNC_CHAR_1: u8 = 0xB5;
pub const SYNC_CHAR_2: u8 = 0x62;

/// Sync bytes, class, id, two length bytes and two checksum bytes.
pub const FRAME_OVERHEAD: usize = 8;

/// One UBX frame as seen on the wire, minus sync bytes and checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub class: u8,
    pub id: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(class: u8, id: u8, payload: Vec<u8>) -> Self {
        Self { class, id, payload }
    }

    pub fn key(&self) -> (u8, u8) {
        (self.class, self.id)
    }

    // Serialize to wire bytes. Payload size is bounded by the u16 length field.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        encode(self.class, self.id, &self.payload)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error(
        "checksum mismatch on frame {class:#04x}/{id:#04x}: expected {expected:02x?}, got {received:02x?}"
    )]
    ChecksumMismatch {
        class: u8,
        id: u8,
        expected: (u8, u8),
        received: (u8, u8),
    },
    #[error("payload of {0} bytes does not fit the u16 length field")]
    PayloadTooLong(usize),
}

// UBX Fletcher-like checksum over class/id/length/payload bytes.
pub fn checksum(data: &[u8]) -> (u8, u8) {
    let mut ck_a = 0_u8;
    let mut ck_b = 0_u8;
    for byte in data {
        ck_a = ck_a.wrapping_add(*byte);
        ck_b = ck_b.wrapping_add(ck_a);
    }
    (ck_a, ck_b)
}

// Build full UBX packet with header, payload length, and checksum.
pub fn encode(class: u8, id: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u16::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLong(payload.len()))?;
    let mut packet = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    packet.extend_from_slice(&[SYNC_CHAR_1, SYNC_CHAR_2, class, id]);
    packet.extend_from_slice(&len.to_le_bytes());
    packet.extend_from_slice(payload);
    let (ck_a, ck_b) = checksum(&packet[2..]);
    packet.push(ck_a);
    packet.push(ck_b);
    Ok(packet)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekSync1,
    SeekSync2,
    Class,
    Id,
    LenLo,
    LenHi,
    Payload,
    CkA,
    CkB,
}

/// Incremental UBX frame extractor for arbitrary byte streams.
///
/// Bytes that do not belong to a frame (NMEA sentences, line noise, partial
/// frames after a reconnect) are skipped until the two sync bytes show up
/// again. Frames whose checksum does not verify are reported and dropped.
pub struct FrameDecoder {
    state: State,
    class: u8,
    id: u8,
    len: usize,
    payload: Vec<u8>,
    ck_a: u8,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: State::SeekSync1,
            class: 0,
            id: 0,
            len: 0,
            payload: Vec::new(),
            ck_a: 0,
        }
    }

    /// Feed one byte. Returns `None` while a frame is incomplete.
    pub fn push(&mut self, byte: u8) -> Option<Result<Frame, FrameError>> {
        match self.state {
            State::SeekSync1 => {
                if byte == SYNC_CHAR_1 {
                    self.state = State::SeekSync2;
                }
            }
            State::SeekSync2 => {
                self.state = match byte {
                    SYNC_CHAR_2 => State::Class,
                    // A repeated first sync byte may start the real frame.
                    SYNC_CHAR_1 => State::SeekSync2,
                    _ => State::SeekSync1,
                };
            }
            State::Class => {
                self.class = byte;
                self.state = State::Id;
            }
            State::Id => {
                self.id = byte;
                self.state = State::LenLo;
            }
            State::LenLo => {
                self.len = usize::from(byte);
                self.state = State::LenHi;
            }
            State::LenHi => {
                self.len |= usize::from(byte) << 8;
                self.payload.clear();
                self.payload.reserve(self.len);
                self.state = if self.len == 0 {
                    State::CkA
                } else {
                    State::Payload
                };
            }
            State::Payload => {
                self.payload.push(byte);
                if self.payload.len() == self.len {
                    self.state = State::CkA;
                }
            }
            State::CkA => {
                self.ck_a = byte;
                self.state = State::CkB;
            }
            State::CkB => {
                self.state = State::SeekSync1;
                return Some(self.finish(byte));
            }
        }
        None
    }

    /// Feed a chunk of bytes, appending every completed frame or error to `out`.
    pub fn push_bytes(&mut self, bytes: &[u8], out: &mut Vec<Result<Frame, FrameError>>) {
        for &byte in bytes {
            if let Some(result) = self.push(byte) {
                out.push(result);
            }
        }
    }

    fn finish(&mut self, ck_b: u8) -> Result<Frame, FrameError> {
        let payload = std::mem::take(&mut self.payload);
        let len = (payload.len() as u16).to_le_bytes();

        let mut covered = Vec::with_capacity(payload.len() + 4);
        covered.extend_from_slice(&[self.class, self.id, len[0], len[1]]);
        covered.extend_from_slice(&payload);
        let expected = checksum(&covered);

        if expected != (self.ck_a, ck_b) {
            return Err(FrameError::ChecksumMismatch {
                class: self.class,
                id: self.id,
                expected,
                received: (self.ck_a, ck_b),
            });
        }

        Ok(Frame::new(self.class, self.id, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Result<Frame, FrameError>> {
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        decoder.push_bytes(bytes, &mut out);
        out
    }

    #[test]
    fn checksum_of_receiver_start() {
        assert_eq!(checksum(&[0x06, 0x04, 0x04, 0x00, 0x00, 0x00, 0x09, 0x00]), (0x17, 0x76));
    }

    #[test]
    fn checksum_of_sos_save() {
        assert_eq!(checksum(&[0x09, 0x14, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00]), (0x21, 0xEC));
    }

    #[test]
    fn checksum_of_hardware_reset() {
        assert_eq!(checksum(&[0x06, 0x04, 0x04, 0x00, 0xFF, 0x87, 0x00, 0x00]), (0x94, 0xF5));
    }

    #[test]
    fn encode_hardware_reset() {
        let bytes = encode(0x06, 0x04, &[0xFF, 0x87, 0x00, 0x00]).unwrap();
        assert_eq!(
            bytes,
            vec![0xB5, 0x62, 0x06, 0x04, 0x04, 0x00, 0xFF, 0x87, 0x00, 0x00, 0x94, 0xF5]
        );
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let payload = vec![0_u8; 70_000];
        assert_eq!(
            encode(0x01, 0x02, &payload),
            Err(FrameError::PayloadTooLong(70_000))
        );
    }

    #[test]
    fn decodes_single_frame() {
        let bytes = encode(0x0A, 0x04, &[]).unwrap();
        let frames = decode_all(&bytes);
        assert_eq!(frames, vec![Ok(Frame::new(0x0A, 0x04, vec![]))]);
    }

    #[test]
    fn decodes_frame_split_across_chunks() {
        let bytes = encode(0x06, 0x24, &[1, 2, 3, 4, 5]).unwrap();
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        decoder.push_bytes(&bytes[..3], &mut out);
        assert!(out.is_empty());
        decoder.push_bytes(&bytes[3..9], &mut out);
        assert!(out.is_empty());
        decoder.push_bytes(&bytes[9..], &mut out);
        assert_eq!(out, vec![Ok(Frame::new(0x06, 0x24, vec![1, 2, 3, 4, 5]))]);
    }

    #[test]
    fn resynchronizes_after_garbage() {
        let mut stream = b"$GNRMC,123519,A,4807.038,N*6A\r\n".to_vec();
        stream.extend_from_slice(&[0xB5, 0x00, 0x62, 0xB5, 0xB5]);
        stream.extend_from_slice(&encode(0x05, 0x01, &[0x06, 0x24]).unwrap());
        let frames = decode_all(&stream);
        assert_eq!(frames, vec![Ok(Frame::new(0x05, 0x01, vec![0x06, 0x24]))]);
    }

    #[test]
    fn rejects_corrupted_checksum_and_recovers() {
        let mut corrupt = encode(0x10, 0x14, &[9, 9, 9]).unwrap();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        let mut stream = corrupt;
        stream.extend_from_slice(&encode(0x10, 0x14, &[1, 2, 3]).unwrap());

        let frames = decode_all(&stream);
        assert_eq!(frames.len(), 2);
        assert!(matches!(
            frames[0],
            Err(FrameError::ChecksumMismatch { class: 0x10, id: 0x14, .. })
        ));
        assert_eq!(frames[1], Ok(Frame::new(0x10, 0x14, vec![1, 2, 3])));
    }

    #[test]
    fn mismatch_reports_checksum_over_header_and_payload() {
        let mut corrupt = encode(0x06, 0x04, &[0xFF, 0x87, 0x00, 0x00]).unwrap();
        corrupt[10] = 0x00;
        let frames = decode_all(&corrupt);
        assert_eq!(
            frames,
            vec![Err(FrameError::ChecksumMismatch {
                class: 0x06,
                id: 0x04,
                expected: (0x94, 0xF5),
                received: (0x00, 0xF5),
            })]
        );
    }

    #[test]
    fn decodes_back_to_back_frames() {
        let mut stream = encode(0x05, 0x01, &[0x06, 0x56]).unwrap();
        stream.extend_from_slice(&encode(0x05, 0x00, &[0x06, 0x2F]).unwrap());
        let frames = decode_all(&stream);
        assert_eq!(
            frames,
            vec![
                Ok(Frame::new(0x05, 0x01, vec![0x06, 0x56])),
                Ok(Frame::new(0x05, 0x00, vec![0x06, 0x2F])),
            ]
        );
    }
}
