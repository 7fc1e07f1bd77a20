//! Decoding of inbound `Notify` deliveries into flat message records.

use xmltree::Element;

use crate::error::SoapError;
use crate::ns;
use crate::xml::{child, descendants, text};

/// A `tt:SimpleItem` name/value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleItem {
    pub name: String,
    pub value: String,
}

/// One `wsnt:NotificationMessage` with a ConcreteSet topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    /// Topic expression, e.g. `tns1:RuleEngine/CellMotionDetector/Motion`
    pub topic: String,
    /// Every `SimpleItem` found under the message, source and data alike
    pub items: Vec<SimpleItem>,
}

impl NotificationMessage {
    /// Trailing path segment of the topic.
    pub fn rule(&self) -> Option<&str> {
        self.topic.rsplit('/').next().filter(|rule| !rule.is_empty())
    }

    pub fn item(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .map(|item| item.value.as_str())
    }

    /// Channel index from the `Source` or `VideoSourceConfigurationToken` item.
    pub fn channel(&self) -> Option<u32> {
        self.item("Source")
            .or_else(|| self.item("VideoSourceConfigurationToken"))
            .and_then(|value| value.trim().parse().ok())
    }

    /// Boolean state of the message. Motion carries it in `IsMotion`, every other rule in `State`.
    pub fn state(&self) -> Option<bool> {
        let key = if self.rule() == Some("Motion") { "IsMotion" } else { "State" };
        self.item(key).map(parse_bool)
    }
}

/// Decoded `Notify` body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notify {
    pub messages: Vec<NotificationMessage>,
}

/// `true` when the first character, lowercased, is `t`.
pub fn parse_bool(value: &str) -> bool {
    value
        .chars()
        .next()
        .map(|c| c.to_ascii_lowercase() == 't')
        .unwrap_or(false)
}

/// Decode a webhook body.
///
/// Returns `Err` only when the body is not XML at all. XML that carries no
/// usable notification message yields `Ok(None)`.
pub fn decode_notify(body: &[u8]) -> Result<Option<Notify>, SoapError> {
    let root = Element::parse(body).map_err(|e| SoapError::Parse(e.to_string()))?;

    let mut found = Vec::new();
    descendants(&root, ns::WSNT, "NotificationMessage", &mut found);

    let messages: Vec<NotificationMessage> = found.into_iter().filter_map(decode_message).collect();

    if messages.is_empty() {
        return Ok(None);
    }
    Ok(Some(Notify { messages }))
}

fn decode_message(message: &Element) -> Option<NotificationMessage> {
    let topic = child(message, ns::WSNT, "Topic")
        .filter(|topic| {
            topic.attributes.get("Dialect").map(String::as_str) == Some(ns::CONCRETE_SET_DIALECT)
        })
        .and_then(|topic| text(Some(topic)))?;

    let mut simple_items = Vec::new();
    descendants(message, ns::TT, "SimpleItem", &mut simple_items);

    let items = simple_items
        .into_iter()
        .filter_map(|item| {
            Some(SimpleItem {
                name: item.attributes.get("Name")?.clone(),
                value: item.attributes.get("Value")?.clone(),
            })
        })
        .collect();

    Some(NotificationMessage { topic, items })
}
