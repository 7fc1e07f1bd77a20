//! Normalized motion events and the updates delivered to listeners.

use std::collections::BTreeMap;

use serde::Serialize;
use soap_client::{Fault, NotificationMessage, Notify};

/// AI classification reported by a detection rule
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AiType {
    Face,
    People,
    Vehicle,
    DogCat,
    Visitor,
}

/// What a notification topic reports on
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Rule {
    Motion,
    Ai(AiType),
}

impl Rule {
    /// Classify a topic by its trailing path segment.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "Motion" | "MotionAlarm" => Rule::Motion,
            "FaceDetect" => Rule::Ai(AiType::Face),
            "PeopleDetect" => Rule::Ai(AiType::People),
            "VehicleDetect" => Rule::Ai(AiType::Vehicle),
            "DogCatDetect" => Rule::Ai(AiType::DogCat),
            "Visitor" => Rule::Ai(AiType::Visitor),
            _ => return None,
        })
    }
}

/// Motion state of one channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelMotion {
    pub channel_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected: Option<bool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub ai: BTreeMap<AiType, bool>,
}

/// Motion state decoded from one webhook delivery.
///
/// Messages without a channel apply to the whole device; the rest are grouped
/// per channel, ordered by channel index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MotionEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected: Option<bool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub ai: BTreeMap<AiType, bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<ChannelMotion>,
}

impl MotionEvent {
    /// Merge every recognizable message of a delivery into one event.
    pub fn from_notify(notify: &Notify) -> Self {
        let mut device = ChannelMotion::default();
        let mut channels: BTreeMap<u32, ChannelMotion> = BTreeMap::new();

        for message in &notify.messages {
            let Some((rule, state)) = classify(message) else {
                continue;
            };
            let target = match message.channel() {
                Some(channel_id) => channels.entry(channel_id).or_insert_with(|| ChannelMotion {
                    channel_id,
                    ..Default::default()
                }),
                None => &mut device,
            };
            match rule {
                Rule::Motion => target.detected = Some(state),
                Rule::Ai(kind) => {
                    target.ai.insert(kind, state);
                }
            }
        }

        Self {
            detected: device.detected,
            ai: device.ai,
            channels: channels.into_values().collect(),
        }
    }

    /// Whether the delivery carried nothing we recognize.
    pub fn is_empty(&self) -> bool {
        self.detected.is_none() && self.ai.is_empty() && self.channels.is_empty()
    }

    pub fn channel(&self, channel_id: u32) -> Option<&ChannelMotion> {
        self.channels.iter().find(|c| c.channel_id == channel_id)
    }
}

fn classify(message: &NotificationMessage) -> Option<(Rule, bool)> {
    let rule = Rule::from_name(message.rule()?)?;
    Some((rule, message.state()?))
}

/// Why push delivery is unavailable and listeners should poll instead
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FallbackReason {
    /// The camera did not answer
    NoAnswer,
    /// The camera answered with something we could not use
    Malformed,
    /// The device has no ONVIF endpoint or no webhook could be registered
    NotConfigured,
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FallbackReason::NoAnswer => "camera did not answer",
            FallbackReason::Malformed => "camera response was not understood",
            FallbackReason::NotConfigured => "push notifications are not configured",
        };
        f.write_str(text)
    }
}

/// What listeners receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushUpdate {
    /// A subscription is active; push events will arrive
    Subscribed,
    /// Decoded motion state
    Event(MotionEvent),
    /// The camera reported a SOAP fault
    Error(Fault),
    /// Push is unavailable; switch to polling
    Fallback(FallbackReason),
}

impl PushUpdate {
    /// Whether listeners should rely on polling after this update.
    pub fn requires_polling(&self) -> bool {
        matches!(self, PushUpdate::Error(_) | PushUpdate::Fallback(_))
    }
}
