//! Protocol envelope and its binary wire format.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! opcode        5 bytes, ASCII, NUL padded
//! sender        u16 length + UTF-8
//! recipient     u16 length + UTF-8
//! shield        u16 length + UTF-8
//! workflow_id   u16 length + UTF-8
//! signature     u16 length + UTF-8
//! payload_type  u8
//! payload       u32 length + bytes
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{keys::KeyCustody, EngineError};

pub const OPCODE_LEN: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Baseline,
    Join,
    Sync,
    Availability,
    Unknown(String),
}

impl Opcode {
    pub fn as_str(&self) -> &str {
        match self {
            Opcode::Baseline => "BLINE",
            Opcode::Join => "JOIN",
            Opcode::Sync => "SYNC",
            Opcode::Availability => "AVAIL",
            Opcode::Unknown(raw) => raw,
        }
    }

    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "BLINE" => Opcode::Baseline,
            "JOIN" => Opcode::Join,
            "SYNC" => Opcode::Sync,
            "AVAIL" => Opcode::Availability,
            other => Opcode::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadType {
    #[default]
    Text,
    Binary,
}

impl PayloadType {
    fn to_byte(self) -> u8 {
        match self {
            PayloadType::Text => 0,
            PayloadType::Binary => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, EngineError> {
        match byte {
            0 => Ok(PayloadType::Text),
            1 => Ok(PayloadType::Binary),
            other => Err(EngineError::MalformedPayload(format!(
                "unknown payload type {}",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolEnvelope {
    pub opcode: Opcode,
    pub sender: String,
    pub recipient: String,
    pub shield_address: String,
    pub workflow_id: String,
    /// Hex signature over [`payload_hash`] of `payload`.
    pub signature: String,
    pub payload_type: PayloadType,
    pub payload: Vec<u8>,
}

impl ProtocolEnvelope {
    pub fn payload_hash(&self) -> [u8; 32] {
        payload_hash(&self.payload)
    }
}

pub fn payload_hash(payload: &[u8]) -> [u8; 32] {
    Sha256::digest(payload).into()
}

/// Addressing fields of an outbound envelope.
#[derive(Clone, Debug)]
pub struct EnvelopeHeader<'a> {
    pub sender: &'a str,
    pub recipient: &'a str,
    pub shield_address: &'a str,
    pub workflow_id: &'a str,
}

/// Sign `payload` with `key_ref` and wrap it in a text envelope.
pub async fn build_envelope(
    keys: &dyn KeyCustody,
    key_ref: &str,
    opcode: Opcode,
    header: EnvelopeHeader<'_>,
    payload: Vec<u8>,
) -> Result<ProtocolEnvelope, EngineError> {
    let signature = keys.sign(key_ref, &payload_hash(&payload)).await?;
    Ok(ProtocolEnvelope {
        opcode,
        sender: header.sender.to_string(),
        recipient: header.recipient.to_string(),
        shield_address: header.shield_address.to_string(),
        workflow_id: header.workflow_id.to_string(),
        signature,
        payload_type: PayloadType::Text,
        payload,
    })
}

/// Check the envelope signature against the sender's registered key.
pub async fn verify_envelope(
    keys: &dyn KeyCustody,
    public_key: &str,
    envelope: &ProtocolEnvelope,
) -> Result<(), EngineError> {
    if keys
        .verify(public_key, &envelope.payload_hash(), &envelope.signature)
        .await?
    {
        Ok(())
    } else {
        Err(EngineError::Unauthorized(format!(
            "signature from {} does not verify",
            envelope.sender
        )))
    }
}

pub fn marshal_envelope(envelope: &ProtocolEnvelope) -> Result<Vec<u8>, EngineError> {
    let opcode = envelope.opcode.as_str().as_bytes();
    if opcode.is_empty() || opcode.len() > OPCODE_LEN || opcode.contains(&0) {
        return Err(EngineError::InvalidArgument(format!(
            "opcode {:?} does not fit the wire format",
            envelope.opcode.as_str()
        )));
    }

    let strings = [
        &envelope.sender,
        &envelope.recipient,
        &envelope.shield_address,
        &envelope.workflow_id,
        &envelope.signature,
    ];
    let mut wire = Vec::with_capacity(
        OPCODE_LEN
            + strings.iter().map(|s| 2 + s.len()).sum::<usize>()
            + 1
            + 4
            + envelope.payload.len(),
    );

    let mut opcode_bytes = [0u8; OPCODE_LEN];
    opcode_bytes[..opcode.len()].copy_from_slice(opcode);
    wire.extend_from_slice(&opcode_bytes);

    for field in strings {
        let len = u16::try_from(field.len()).map_err(|_| {
            EngineError::InvalidArgument(format!("envelope field of {} bytes", field.len()))
        })?;
        wire.extend_from_slice(&len.to_be_bytes());
        wire.extend_from_slice(field.as_bytes());
    }

    wire.push(envelope.payload_type.to_byte());

    let payload_len = u32::try_from(envelope.payload.len()).map_err(|_| {
        EngineError::InvalidArgument(format!("payload of {} bytes", envelope.payload.len()))
    })?;
    wire.extend_from_slice(&payload_len.to_be_bytes());
    wire.extend_from_slice(&envelope.payload);

    Ok(wire)
}

pub fn parse_envelope(bytes: &[u8]) -> Result<ProtocolEnvelope, EngineError> {
    let mut reader = WireReader { bytes, offset: 0 };

    let raw_opcode = reader.take(OPCODE_LEN, "opcode")?;
    let end = raw_opcode.iter().position(|b| *b == 0).unwrap_or(OPCODE_LEN);
    if end == 0 || raw_opcode[end..].iter().any(|b| *b != 0) {
        return Err(EngineError::MalformedPayload("invalid opcode padding".into()));
    }
    let opcode = std::str::from_utf8(&raw_opcode[..end])
        .map_err(|_| EngineError::MalformedPayload("opcode is not ASCII".into()))?;
    let opcode = Opcode::from_wire(opcode);

    let sender = reader.string("sender")?;
    let recipient = reader.string("recipient")?;
    let shield_address = reader.string("shield")?;
    let workflow_id = reader.string("workflow id")?;
    let signature = reader.string("signature")?;
    let payload_type = PayloadType::from_byte(reader.take(1, "payload type")?[0])?;

    let payload_len = u32::from_be_bytes(reader.array::<4>("payload length")?) as usize;
    let payload = reader.take(payload_len, "payload")?.to_vec();

    if reader.remaining() != 0 {
        return Err(EngineError::MalformedPayload(format!(
            "{} trailing bytes after payload",
            reader.remaining()
        )));
    }

    Ok(ProtocolEnvelope {
        opcode,
        sender,
        recipient,
        shield_address,
        workflow_id,
        signature,
        payload_type,
        payload,
    })
}

struct WireReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> WireReader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8], EngineError> {
        if self.remaining() < len {
            return Err(EngineError::MalformedPayload(format!(
                "envelope truncated reading {}: need {} bytes, have {}",
                field,
                len,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, field: &str) -> Result<[u8; N], EngineError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    fn string(&mut self, field: &str) -> Result<String, EngineError> {
        let len = u16::from_be_bytes(self.array::<2>(field)?) as usize;
        let raw = self.take(len, field)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| EngineError::MalformedPayload(format!("{} is not UTF-8", field)))
    }
}
