//! Frames and the messages exchanged over the fabric.
//!
//! | Message | Sent to | Meaning |
//! |---------|---------|---------|
//! | `pair_offer` | instance group | a client is waiting for a worker |
//! | `paired` | client channel | a worker claimed the offer |
//! | `data` | either side's channel | one relayed frame |
//! | `disconnect` | either side's channel, or a session group | tear down |

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::ChannelName;
use crate::model::Protocol;

/// One opaque transport frame. Relayed verbatim, never inspected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frame {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary(Bytes),
}

impl Frame {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Query parameter names accepted as display/audio hints.
pub const HINT_KEYS: [&str; 4] = ["screen_width", "screen_height", "screen_dpi", "audio"];

/// Optional display and audio hints supplied by the client at connect time.
///
/// Each hint is independent. Absent and empty values are dropped rather
/// than defaulted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayHints {
    /// Screen width in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_width: Option<String>,
    /// Screen height in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_height: Option<String>,
    /// Screen resolution in DPI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_dpi: Option<String>,
    /// Audio mimetypes the client can play.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

impl DisplayHints {
    /// Collect hints from query-string pairs. Unknown keys are ignored and
    /// the first non-empty value of a key wins.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut hints = Self::default();
        for (key, value) in pairs {
            if value.is_empty() {
                continue;
            }
            let slot = match key {
                "screen_width" => &mut hints.screen_width,
                "screen_height" => &mut hints.screen_height,
                "screen_dpi" => &mut hints.screen_dpi,
                "audio" => &mut hints.audio,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.to_owned());
            }
        }
        hints
    }

    /// Whether no hint was supplied.
    pub fn is_empty(&self) -> bool {
        self.screen_width.is_none()
            && self.screen_height.is_none()
            && self.screen_dpi.is_none()
            && self.audio.is_none()
    }
}

/// Offer broadcast to a worker instance group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairOffer {
    /// Channel of the waiting client; the worker addresses `paired` here.
    pub client_channel: ChannelName,
    /// Flat connection settings.
    pub params: Map<String, Value>,
    /// Protocol to speak to the endpoint.
    pub protocol: Protocol,
    /// Client display hints.
    #[serde(flatten)]
    pub hints: DisplayHints,
}

/// A message carried by the fabric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FabricMessage {
    /// A client is waiting to be paired.
    PairOffer(PairOffer),
    /// A worker claimed an offer.
    Paired {
        /// Client the worker claims to serve.
        client_channel: ChannelName,
        /// The worker's own channel.
        worker_channel: ChannelName,
    },
    /// One relayed frame.
    Data {
        /// The frame.
        frame: Frame,
    },
    /// Tear down the receiving side.
    Disconnect {
        /// Why, when known (e.g. `logout`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl FabricMessage {
    /// Wrap a frame.
    pub fn data(frame: Frame) -> Self {
        Self::Data { frame }
    }

    /// A disconnect with an optional reason.
    pub fn disconnect(reason: Option<&str>) -> Self {
        Self::Disconnect {
            reason: reason.map(str::to_owned),
        }
    }

    /// The `type` tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PairOffer(_) => "pair_offer",
            Self::Paired { .. } => "paired",
            Self::Data { .. } => "data",
            Self::Disconnect { .. } => "disconnect",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hints_drop_empty_values() {
        let hints = DisplayHints::from_pairs([
            ("screen_width", "1920"),
            ("screen_height", ""),
            ("audio", "audio/L16"),
        ]);
        assert_eq!(hints.screen_width.as_deref(), Some("1920"));
        assert!(hints.screen_height.is_none());
        assert!(hints.screen_dpi.is_none());
        assert_eq!(hints.audio.as_deref(), Some("audio/L16"));
    }

    #[test]
    fn hints_ignore_unknown_keys() {
        let hints = DisplayHints::from_pairs([("color", "blue"), ("token", "x")]);
        assert!(hints.is_empty());
    }

    #[test]
    fn hints_first_non_empty_wins() {
        let hints = DisplayHints::from_pairs([
            ("screen_dpi", ""),
            ("screen_dpi", "96"),
            ("screen_dpi", "120"),
        ]);
        assert_eq!(hints.screen_dpi.as_deref(), Some("96"));
    }

    #[test]
    fn offer_serializes_hints_flat_and_omits_absent() {
        let offer = FabricMessage::PairOffer(PairOffer {
            client_channel: "rac_client.abc".into(),
            params: json!({"hostname": "h"}).as_object().cloned().unwrap(),
            protocol: Protocol::Rdp,
            hints: DisplayHints {
                screen_width: Some("800".into()),
                ..DisplayHints::default()
            },
        });
        let v = serde_json::to_value(&offer).unwrap();
        assert_eq!(v["type"], "pair_offer");
        assert_eq!(v["client_channel"], "rac_client.abc");
        assert_eq!(v["protocol"], "rdp");
        assert_eq!(v["screen_width"], "800");
        assert!(v.get("screen_height").is_none());
        assert!(v.get("hints").is_none());
    }

    #[test]
    fn paired_deserializes_from_worker_json() {
        let msg: FabricMessage = serde_json::from_value(json!({
            "type": "paired",
            "client_channel": "c",
            "worker_channel": "w",
        }))
        .unwrap();
        assert_eq!(
            msg,
            FabricMessage::Paired {
                client_channel: "c".into(),
                worker_channel: "w".into(),
            }
        );
    }

    #[test]
    fn disconnect_reason_optional() {
        let v = serde_json::to_value(FabricMessage::disconnect(None)).unwrap();
        assert_eq!(v, json!({"type": "disconnect"}));
        let v = serde_json::to_value(FabricMessage::disconnect(Some("logout"))).unwrap();
        assert_eq!(v, json!({"type": "disconnect", "reason": "logout"}));
    }

    #[test]
    fn data_frame_shape() {
        let v = serde_json::to_value(FabricMessage::data(Frame::Text("4.sync;".into()))).unwrap();
        assert_eq!(v, json!({"type": "data", "frame": {"text": "4.sync;"}}));
    }

    #[test]
    fn frame_len() {
        assert_eq!(Frame::Text("abc".into()).len(), 3);
        assert_eq!(Frame::Binary(Bytes::from_static(&[1, 2])).len(), 2);
        assert!(Frame::Text(String::new()).is_empty());
    }

    #[test]
    fn kind_matches_tag() {
        let msg = FabricMessage::data(Frame::Binary(Bytes::new()));
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], msg.kind());
    }
}
