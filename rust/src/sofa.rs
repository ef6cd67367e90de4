use std::collections::BTreeMap;

use primitive_types::U256;
use serde_json::Value;
use thiserror::Error;

use crate::buttons::{button_from_json, button_to_json, Button};

pub const MESSAGE_TAG: &str = "SOFA::Message:";
pub const COMMAND_TAG: &str = "SOFA::Command:";
pub const CAPABILITY_REQUEST_TAG: &str = "SOFA::InitRequest:";
pub const CAPABILITY_RESPONSE_TAG: &str = "SOFA::Init:";
pub const PAYMENT_REQUEST_TAG: &str = "SOFA::PaymentRequest:";
pub const PAYMENT_TAG: &str = "SOFA::Payment:";

// Fixed comparison order. None of these is a prefix of another, but keeping
// `InitRequest` ahead of `Init` makes that independence explicit.
const KNOWN_TAGS: &[&str] = &[
    MESSAGE_TAG,
    COMMAND_TAG,
    CAPABILITY_REQUEST_TAG,
    CAPABILITY_RESPONSE_TAG,
    PAYMENT_REQUEST_TAG,
    PAYMENT_TAG,
];

/// A typed SOFA payload. The wire form is `<tag><json object>`; bodies with
/// no recognized tag classify as `None` and are filtered from display.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Envelope {
    #[default]
    None,
    Text {
        body: String,
        buttons: Vec<Button>,
    },
    Command {
        body: String,
        value: String,
    },
    CapabilityRequest {
        requested_keys: Vec<String>,
    },
    CapabilityResponse {
        values: BTreeMap<String, String>,
    },
    PaymentRequest {
        body: String,
        value_wei: U256,
        destination_address: String,
    },
    Payment {
        tx_hash: String,
        value_wei: U256,
    },
}

impl Envelope {
    pub fn tag(&self) -> &'static str {
        match self {
            Envelope::None => "",
            Envelope::Text { .. } => MESSAGE_TAG,
            Envelope::Command { .. } => COMMAND_TAG,
            Envelope::CapabilityRequest { .. } => CAPABILITY_REQUEST_TAG,
            Envelope::CapabilityResponse { .. } => CAPABILITY_RESPONSE_TAG,
            Envelope::PaymentRequest { .. } => PAYMENT_REQUEST_TAG,
            Envelope::Payment { .. } => PAYMENT_TAG,
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        Envelope::Text {
            body: body.into(),
            buttons: vec![],
        }
    }

    pub fn is_payment_related(&self) -> bool {
        matches!(
            self,
            Envelope::PaymentRequest { .. } | Envelope::Payment { .. }
        )
    }
}

/// Malformed JSON under a recognized tag. Distinct from "no tag matched",
/// which is not an error and classifies as `Envelope::None`.
#[derive(Debug, Error)]
#[error("malformed payload under {tag}: {source}")]
pub struct EnvelopeParseError {
    pub tag: &'static str,
    #[source]
    pub source: serde_json::Error,
}

/// Classify an opaque body string into a typed envelope.
///
/// Field extraction is deliberately permissive: a missing or wrongly-typed
/// field resolves to the variant's default (empty string, zero wei) rather
/// than failing, so one sloppy peer message degrades instead of blocking
/// the conversation.
pub fn parse(body: &str) -> Result<Envelope, EnvelopeParseError> {
    let Some(tag) = KNOWN_TAGS.iter().find(|t| body.starts_with(**t)) else {
        return Ok(Envelope::None);
    };
    let payload = &body[tag.len()..];
    let json: Value =
        serde_json::from_str(payload).map_err(|source| EnvelopeParseError { tag, source })?;

    let envelope = match *tag {
        MESSAGE_TAG => Envelope::Text {
            body: str_field(&json, "body"),
            buttons: json
                .get("buttons")
                .and_then(|b| b.as_array())
                .map(|arr| arr.iter().filter_map(button_from_json).collect())
                .unwrap_or_default(),
        },
        COMMAND_TAG => Envelope::Command {
            body: str_field(&json, "body"),
            value: str_field(&json, "value"),
        },
        CAPABILITY_REQUEST_TAG => Envelope::CapabilityRequest {
            requested_keys: json
                .get("values")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default(),
        },
        // The response payload is the key/value map itself, not nested
        // under a "values" key. That is what peers emit on the wire.
        CAPABILITY_RESPONSE_TAG => Envelope::CapabilityResponse {
            values: json
                .as_object()
                .map(|obj| {
                    obj.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default(),
        },
        PAYMENT_REQUEST_TAG => Envelope::PaymentRequest {
            body: str_field(&json, "body"),
            value_wei: wei_field(&json, "value"),
            destination_address: str_field(&json, "destinationAddress"),
        },
        PAYMENT_TAG => Envelope::Payment {
            tx_hash: str_field(&json, "txHash"),
            value_wei: wei_field(&json, "value"),
        },
        _ => unreachable!("tag came from KNOWN_TAGS"),
    };
    Ok(envelope)
}

/// Inverse of [`parse`]. `Envelope::None` serializes to the empty string
/// and must never be sent.
pub fn serialize(envelope: &Envelope) -> String {
    let payload = match envelope {
        Envelope::None => return String::new(),
        Envelope::Text { body, buttons } => {
            let mut obj = serde_json::Map::new();
            obj.insert("body".into(), Value::String(body.clone()));
            if !buttons.is_empty() {
                obj.insert(
                    "buttons".into(),
                    Value::Array(buttons.iter().map(button_to_json).collect()),
                );
            }
            Value::Object(obj)
        }
        Envelope::Command { body, value } => serde_json::json!({
            "body": body,
            "value": value,
        }),
        Envelope::CapabilityRequest { requested_keys } => serde_json::json!({
            "values": requested_keys,
        }),
        Envelope::CapabilityResponse { values } => {
            let obj: serde_json::Map<String, Value> = values
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            Value::Object(obj)
        }
        Envelope::PaymentRequest {
            body,
            value_wei,
            destination_address,
        } => serde_json::json!({
            "body": body,
            "value": wei_to_hex(*value_wei),
            "destinationAddress": destination_address,
        }),
        Envelope::Payment { tx_hash, value_wei } => serde_json::json!({
            "txHash": tx_hash,
            "value": wei_to_hex(*value_wei),
        }),
    };
    format!("{}{}", envelope.tag(), payload)
}

/// Buttons ride only in `Text` payloads; every other variant yields `[]`.
pub fn derive_buttons(envelope: &Envelope) -> Vec<Button> {
    match envelope {
        Envelope::Text { buttons, .. } => buttons.clone(),
        _ => vec![],
    }
}

fn str_field(json: &Value, key: &str) -> String {
    json.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Wei amounts arrive as strings, 0x-prefixed hex by contract, but decimal
/// strings occur in the wild and are accepted. Anything else is zero.
fn wei_field(json: &Value, key: &str) -> U256 {
    let Some(s) = json.get(key).and_then(|v| v.as_str()) else {
        return U256::zero();
    };
    parse_wei(s)
}

pub(crate) fn parse_wei(s: &str) -> U256 {
    if let Some(hex) = s.strip_prefix("0x") {
        U256::from_str_radix(hex, 16).unwrap_or_default()
    } else {
        U256::from_dec_str(s).unwrap_or_default()
    }
}

pub(crate) fn wei_to_hex(value: U256) -> String {
    format!("{value:#x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buttons::ButtonKind;

    #[test]
    fn unknown_or_untagged_bodies_classify_as_none() {
        assert_eq!(parse("SOFA::Unknown:{}").unwrap(), Envelope::None);
        assert_eq!(parse("hello there").unwrap(), Envelope::None);
        assert_eq!(parse("").unwrap(), Envelope::None);
    }

    #[test]
    fn malformed_json_under_known_tag_is_a_parse_error() {
        let err = parse("SOFA::Message:{not json").unwrap_err();
        assert_eq!(err.tag, MESSAGE_TAG);
    }

    #[test]
    fn missing_fields_resolve_to_defaults() {
        assert_eq!(
            parse("SOFA::Message:{}").unwrap(),
            Envelope::Text {
                body: String::new(),
                buttons: vec![]
            }
        );
        assert_eq!(
            parse("SOFA::PaymentRequest:{}").unwrap(),
            Envelope::PaymentRequest {
                body: String::new(),
                value_wei: U256::zero(),
                destination_address: String::new(),
            }
        );
        assert_eq!(
            parse("SOFA::InitRequest:{}").unwrap(),
            Envelope::CapabilityRequest {
                requested_keys: vec![]
            }
        );
    }

    #[test]
    fn wei_values_accept_hex_and_decimal() {
        let hex =
            parse(r#"SOFA::Payment:{"txHash":"0xab","value":"0x1b1ae4d6e2ef500000"}"#).unwrap();
        let dec =
            parse(r#"SOFA::Payment:{"txHash":"0xab","value":"500000000000000000000"}"#).unwrap();
        assert_eq!(hex, dec);
        // Garbage degrades to zero, never a failure.
        let bad = parse(r#"SOFA::Payment:{"txHash":"0xab","value":"wat"}"#).unwrap();
        assert_eq!(
            bad,
            Envelope::Payment {
                tx_hash: "0xab".to_string(),
                value_wei: U256::zero()
            }
        );
    }

    #[test]
    fn none_serializes_to_empty_string() {
        assert_eq!(serialize(&Envelope::None), "");
    }

    #[test]
    fn round_trip_every_constructible_variant() {
        let samples = vec![
            Envelope::Text {
                body: "hi there".to_string(),
                buttons: vec![Button {
                    label: "Red Cross".to_string(),
                    kind: ButtonKind::Simple,
                    action: None,
                    value: Some("red-cross".to_string()),
                    subcontrols: vec![],
                }],
            },
            Envelope::text(""),
            Envelope::Command {
                body: "Timetable".to_string(),
                value: "timetable".to_string(),
            },
            Envelope::CapabilityRequest {
                requested_keys: vec!["paymentAddress".to_string(), "language".to_string()],
            },
            Envelope::CapabilityResponse {
                values: [
                    ("language".to_string(), "en".to_string()),
                    (
                        "paymentAddress".to_string(),
                        "0xa2a0134f1df987bc388dbcb635dfeed4ce497e2a".to_string(),
                    ),
                ]
                .into_iter()
                .collect(),
            },
            Envelope::PaymentRequest {
                body: "Pay up".to_string(),
                value_wei: U256::from(1_500_000_000_000_000_000u64),
                destination_address: "0xa2a0134f1df987bc388dbcb635dfeed4ce497e2a".to_string(),
            },
            Envelope::Payment {
                tx_hash: "0x2c6a0b3457e1e9ae".to_string(),
                value_wei: U256::from(42u8),
            },
        ];
        for envelope in samples {
            let wire = serialize(&envelope);
            assert!(wire.starts_with(envelope.tag()), "{wire}");
            assert_eq!(parse(&wire).unwrap(), envelope, "wire was {wire}");
        }
    }

    #[test]
    fn group_buttons_round_trip_with_subcontrols() {
        let envelope = Envelope::Text {
            body: "choose".to_string(),
            buttons: vec![Button {
                label: "Donate".to_string(),
                kind: ButtonKind::Group,
                action: None,
                value: None,
                subcontrols: vec![Button {
                    label: "Red Cross".to_string(),
                    kind: ButtonKind::Simple,
                    action: Some("Webview::donate".to_string()),
                    value: Some("red-cross".to_string()),
                    subcontrols: vec![],
                }],
            }],
        };
        assert_eq!(parse(&serialize(&envelope)).unwrap(), envelope);
    }

    #[test]
    fn only_text_envelopes_carry_buttons() {
        let text =
            parse(r#"SOFA::Message:{"body":"x","buttons":[{"label":"A","type":"button"}]}"#)
                .unwrap();
        assert_eq!(derive_buttons(&text).len(), 1);

        let cmd = parse(r#"SOFA::Command:{"body":"x","buttons":[{"label":"A","type":"button"}]}"#)
            .unwrap();
        assert!(derive_buttons(&cmd).is_empty());
    }

    #[test]
    fn payment_request_wire_form_is_bit_exact() {
        let envelope = Envelope::PaymentRequest {
            body: "Thanks for the great conversation".to_string(),
            value_wei: parse_wei("0x1b1ae4d6e2ef500000"),
            destination_address: "0x011c6dd9565b8b83e6a9ee3f06e89ece3251ef2f".to_string(),
        };
        let wire = serialize(&envelope);
        assert!(wire.starts_with("SOFA::PaymentRequest:{"));
        let json: Value = serde_json::from_str(&wire["SOFA::PaymentRequest:".len()..]).unwrap();
        assert_eq!(json["value"], "0x1b1ae4d6e2ef500000");
        assert_eq!(
            json["destinationAddress"],
            "0x011c6dd9565b8b83e6a9ee3f06e89ece3251ef2f"
        );
    }
}
