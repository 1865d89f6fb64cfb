//! Typed protocol payloads.
//!
//! `JOIN` carries a [`JoinPayload`]. `AVAIL` carries exactly one phase object
//! keyed by its tag: `MJ` (match job), `NS` (notify selection) or `RN`
//! (respond notification).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use wgp_common::{CommitmentMetaData, Job};

use crate::{envelope::Opcode, EngineError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinPayload {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub authorized_bearer_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_identifier: Option<String>,
}

impl JoinPayload {
    fn validate(self) -> Result<Self, EngineError> {
        if self.address.is_empty() {
            return Err(EngineError::MalformedPayload("join without address".into()));
        }
        if self.authorized_bearer_token.is_empty() {
            return Err(EngineError::MalformedPayload(
                "join without authorized_bearer_token".into(),
            ));
        }
        Ok(self)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AvailabilityPayload {
    #[serde(rename = "MJ")]
    MatchJob(MatchJob),
    #[serde(rename = "NS")]
    NotifySelection(SelectionNotice),
    #[serde(rename = "RN")]
    RespondNotification(NotificationResponse),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intention {
    Request,
    Response,
}

impl Serialize for Intention {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(match self {
            Intention::Request => "0",
            Intention::Response => "1",
        })
    }
}

impl<'de> Deserialize<'de> for Intention {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(s) if s == "0" || s.eq_ignore_ascii_case("request") => {
                Ok(Intention::Request)
            }
            Value::String(s) if s == "1" || s.eq_ignore_ascii_case("response") => {
                Ok(Intention::Response)
            }
            Value::Number(n) if n.as_u64() == Some(0) => Ok(Intention::Request),
            Value::Number(n) if n.as_u64() == Some(1) => Ok(Intention::Response),
            other => Err(serde::de::Error::custom(format!(
                "unknown intention {}",
                other
            ))),
        }
    }
}

/// A JSON document carried as an encoded string, `{"data": "<json>"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedDocument {
    pub data: String,
}

impl EncodedDocument {
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, EngineError> {
        Ok(Self {
            data: serde_json::to_string(value)?,
        })
    }

    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, EngineError> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvailabilityRequest {
    pub id: String,
    pub mj: EncodedDocument,
    pub meta: EncodedDocument,
}

impl AvailabilityRequest {
    pub fn new(id: impl Into<String>, job: &Job, meta: &CommitmentMetaData) -> Result<Self, EngineError> {
        Ok(Self {
            id: id.into(),
            mj: EncodedDocument::encode(job)?,
            meta: EncodedDocument::encode(meta)?,
        })
    }

    pub fn job(&self) -> Result<Job, EngineError> {
        self.mj.decode()
    }

    pub fn meta(&self) -> Result<CommitmentMetaData, EngineError> {
        self.meta.decode()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvailabilityResponse {
    pub id: String,
    pub date: String,
    /// JSON-encoded availability record.
    pub availability: String,
}

/// `MJ` phase, discriminated by `intention`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMatchJob", into = "RawMatchJob")]
pub enum MatchJob {
    Request(AvailabilityRequest),
    Response(AvailabilityResponse),
}

impl MatchJob {
    pub fn id(&self) -> &str {
        match self {
            MatchJob::Request(req) => &req.id,
            MatchJob::Response(resp) => &resp.id,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RawMatchJob {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    intention: Intention,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mj: Option<EncodedDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<EncodedDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    availability: Option<String>,
}

impl TryFrom<RawMatchJob> for MatchJob {
    type Error = String;

    fn try_from(raw: RawMatchJob) -> Result<Self, Self::Error> {
        match raw.intention {
            Intention::Request => Ok(MatchJob::Request(AvailabilityRequest {
                id: raw.id,
                mj: raw.mj.ok_or("availability request without mj")?,
                meta: raw.meta.ok_or("availability request without meta")?,
            })),
            Intention::Response => Ok(MatchJob::Response(AvailabilityResponse {
                id: raw.id,
                date: raw.date.unwrap_or_default(),
                availability: raw
                    .availability
                    .ok_or("availability response without availability")?,
            })),
        }
    }
}

impl From<MatchJob> for RawMatchJob {
    fn from(job: MatchJob) -> Self {
        match job {
            MatchJob::Request(req) => RawMatchJob {
                id: req.id,
                intention: Intention::Request,
                mj: Some(req.mj),
                meta: Some(req.meta),
                date: None,
                availability: None,
            },
            MatchJob::Response(resp) => RawMatchJob {
                id: resp.id,
                intention: Intention::Response,
                mj: None,
                meta: None,
                date: Some(resp.date),
                availability: Some(resp.availability),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionNotice {
    pub status: bool,
    #[serde(default)]
    pub proposal: String,
    #[serde(default)]
    pub signatures: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_range: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    pub init_signed_doc: String,
    #[serde(with = "signature_collection")]
    pub signature_collection: Vec<String>,
}

/// Decoded payload of an inbound envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    Join(JoinPayload),
    AvailabilityRequest(AvailabilityRequest),
    AvailabilityResponse(AvailabilityResponse),
    NotifySelection(SelectionNotice),
    RespondNotification(NotificationResponse),
}

impl InboundMessage {
    /// Decode `payload` for `opcode`. Opcodes without a handler give `None`.
    pub fn decode(opcode: &Opcode, payload: &[u8]) -> Result<Option<Self>, EngineError> {
        match opcode {
            Opcode::Join => {
                let join: JoinPayload = serde_json::from_slice(payload)?;
                Ok(Some(InboundMessage::Join(join.validate()?)))
            }
            Opcode::Availability => {
                let payload: AvailabilityPayload = serde_json::from_slice(payload)?;
                Ok(Some(match payload {
                    AvailabilityPayload::MatchJob(MatchJob::Request(req)) => {
                        InboundMessage::AvailabilityRequest(req)
                    }
                    AvailabilityPayload::MatchJob(MatchJob::Response(resp)) => {
                        InboundMessage::AvailabilityResponse(resp)
                    }
                    AvailabilityPayload::NotifySelection(notice) => {
                        InboundMessage::NotifySelection(notice)
                    }
                    AvailabilityPayload::RespondNotification(response) => {
                        InboundMessage::RespondNotification(response)
                    }
                }))
            }
            Opcode::Baseline | Opcode::Sync | Opcode::Unknown(_) => Ok(None),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InboundMessage::Join(_) => "join",
            InboundMessage::AvailabilityRequest(_) => "mj_request",
            InboundMessage::AvailabilityResponse(_) => "mj_response",
            InboundMessage::NotifySelection(_) => "notify_selection",
            InboundMessage::RespondNotification(_) => "respond_notification",
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid id {}", other))),
    }
}

/// Signature lists travel as a JSON-encoded string; plain arrays are accepted
/// on input.
mod signature_collection {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S>(signatures: &[String], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = serde_json::to_string(signatures).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(encoded) => serde_json::from_str(&encoded).map_err(de::Error::custom),
            array @ Value::Array(_) => serde_json::from_value(array).map_err(de::Error::custom),
            other => Err(de::Error::custom(format!(
                "signatureCollection must be an array or string, got {}",
                other
            ))),
        }
    }
}
