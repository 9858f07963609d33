//! Parsed representation of one SSE event, generalized over both
//! flags and segments and the indirect (path-only) variants that need
//! a follow-up fetch before they can be applied.

use crate::models::{FeatureFlag, Segment};
use eventsource_client::Event;
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::{TryFrom, TryInto};
use std::path::{Component, PathBuf};
use tracing::{trace, warn};

#[derive(Debug, thiserror::Error)]
pub enum MessageParseError {
    #[error("failed to parse put data: {0}")]
    ParsePut(serde_json::Error),
    #[error("missing the data field")]
    MissingData,
    #[error("missing payload on eventsource item")]
    MissingEventPayload,
    #[error(transparent)]
    ParsePatch(#[from] FromPatchDataError),
    #[error("unable to parse event payload: {0}")]
    ParsePayload(serde_json::Error),
}

/// The item kind a path like `/flags/foo` or `/segments/foo` names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathKind {
    Flag,
    Segment,
}

/// One parsed message from the stream. `IndirectPut`/`IndirectPatch`
/// carry only a path; the consumer resolves them via a
/// [`Requestor`](crate::requestor::Requestor) before applying.
#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
pub enum Message {
    Put(InitData),
    Patch(Update),
    Delete(Update),
    IndirectPut,
    IndirectPatch { kind: PathKind, key: String },
    Unknown,
}

impl TryFrom<Event> for Message {
    type Error = MessageParseError;

    fn try_from(event: Event) -> Result<Self, Self::Error> {
        let name = &event.event_type;
        trace!(%name, "reading SSE event");

        let event_data = event.field("data").ok_or(MessageParseError::MissingEventPayload)?;

        match name.as_str() {
            "put" => {
                let payload: MessagePayload =
                    serde_json::from_slice(event_data).map_err(MessageParseError::ParsePayload)?;
                let data = payload.data.ok_or(MessageParseError::MissingData)?;
                let init: InitData = serde_json::from_value(data).map_err(MessageParseError::ParsePut)?;
                trace!(num_flags = init.flags.len(), num_segments = init.segments.len(), "parsed init data");
                Ok(Self::Put(init))
            }
            "patch" | "delete" => {
                let payload: MessagePayload =
                    serde_json::from_slice(event_data).map_err(MessageParseError::ParsePayload)?;
                let update: Update = payload.try_into()?;
                trace!(?update, "parsed update");
                Ok(match name.as_str() {
                    "patch" => Self::Patch(update),
                    "delete" => Self::Delete(update),
                    _ => unreachable!(),
                })
            }
            "indirect/put" => Ok(Self::IndirectPut),
            "indirect/patch" => {
                let path: String =
                    serde_json::from_slice(event_data).map_err(MessageParseError::ParsePayload)?;
                match path_kind_and_key(&PathBuf::from(path)) {
                    Some((kind, key)) => Ok(Self::IndirectPatch { kind, key }),
                    None => Ok(Self::Unknown),
                }
            }
            _ => {
                warn!(%name, "unknown event type");
                Ok(Message::Unknown)
            }
        }
    }
}

/// Data used to atomically populate a [`Store`](crate::store::Store).
#[derive(Debug, Default, Deserialize)]
pub struct InitData {
    #[serde(default)]
    pub flags: HashMap<String, FeatureFlag>,
    #[serde(default)]
    pub segments: HashMap<String, Segment>,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    path: PathBuf,
    data: Option<serde_json::Value>,
    version: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum FromPatchDataError {
    #[error("update path is unknown")]
    UnknownPath,
    #[error("missing item key")]
    MissingKey,
    #[error("failed to read item payload")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Describes the change (add, update, or delete) of a single flag or
/// segment, addressed by path.
#[derive(Debug)]
pub enum Update {
    Flag {
        key: String,
        data: Option<FeatureFlag>,
        version: Option<u64>,
    },
    Segment {
        key: String,
        data: Option<Segment>,
        version: Option<u64>,
    },
    Unknown,
}

fn path_segments(path: &PathBuf) -> impl Iterator<Item = &str> {
    path.components().filter_map(|c| match c {
        Component::Normal(s) => s.to_str(),
        _ => None,
    })
}

fn path_kind_and_key(path: &PathBuf) -> Option<(PathKind, String)> {
    let mut segments = path_segments(path);
    let kind = match segments.next()? {
        "flags" => PathKind::Flag,
        "segments" => PathKind::Segment,
        _ => return None,
    };
    let key = segments.next()?.to_string();
    Some((kind, key))
}

impl TryFrom<MessagePayload> for Update {
    type Error = FromPatchDataError;

    fn try_from(pl: MessagePayload) -> Result<Self, Self::Error> {
        let (kind, key) = path_kind_and_key(&pl.path).ok_or(FromPatchDataError::UnknownPath)?;
        match kind {
            PathKind::Flag => {
                let data = pl.data.map(serde_json::from_value).transpose()?;
                Ok(Self::Flag {
                    key,
                    data,
                    version: pl.version,
                })
            }
            PathKind::Segment => {
                let data = pl.data.map(serde_json::from_value).transpose()?;
                Ok(Self::Segment {
                    key,
                    data,
                    version: pl.version,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_path_resolves_kind_and_key() {
        let path = PathBuf::from("/flags/my-flag");
        assert_eq!(path_kind_and_key(&path), Some((PathKind::Flag, "my-flag".to_string())));
    }

    #[test]
    fn segment_path_resolves_kind_and_key() {
        let path = PathBuf::from("/segments/my-segment");
        assert_eq!(path_kind_and_key(&path), Some((PathKind::Segment, "my-segment".to_string())));
    }

    #[test]
    fn unrecognized_path_prefix_is_none() {
        let path = PathBuf::from("/unknown/thing");
        assert_eq!(path_kind_and_key(&path), None);
    }
}
