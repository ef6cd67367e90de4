use serde_json::Value;

use crate::sofa::Envelope;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ButtonKind {
    Simple,
    Group,
}

/// An interactive control embedded in a `Text` envelope. `Group` buttons
/// nest further buttons in `subcontrols`; tapping a group is a UI-side
/// navigation event and never produces a command.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Button {
    pub label: String,
    pub kind: ButtonKind,
    pub action: Option<String>,
    pub value: Option<String>,
    pub subcontrols: Vec<Button>,
}

impl Button {
    /// Actionable buttons echo their value back to the peer as a command.
    pub fn is_actionable(&self) -> bool {
        self.kind == ButtonKind::Simple && self.value.is_some()
    }

    /// Package this button as a `Command` envelope: label as body, value as
    /// value. `None` for groups and value-less buttons.
    pub fn build_command(&self) -> Option<Envelope> {
        if self.kind != ButtonKind::Simple {
            return None;
        }
        let value = self.value.clone()?;
        Some(Envelope::Command {
            body: self.label.clone(),
            value,
        })
    }
}

/// Parse one wire button object. Entries with a missing label or an
/// unrecognized type are skipped by the caller rather than failing the
/// whole message.
pub(crate) fn button_from_json(v: &Value) -> Option<Button> {
    let label = v.get("label")?.as_str()?.to_string();
    let kind = match v.get("type")?.as_str()? {
        "button" => ButtonKind::Simple,
        "group" => ButtonKind::Group,
        _ => return None,
    };

    let action = v
        .get("action")
        .and_then(|a| a.as_str())
        .map(|s| s.to_string());
    let value = v
        .get("value")
        .and_then(|a| a.as_str())
        .map(|s| s.to_string());

    let subcontrols = if kind == ButtonKind::Group {
        v.get("subcontrols")
            .and_then(|s| s.as_array())
            .map(|arr| arr.iter().filter_map(button_from_json).collect())
            .unwrap_or_default()
    } else {
        vec![]
    };

    Some(Button {
        label,
        kind,
        action,
        value,
        subcontrols,
    })
}

pub(crate) fn button_to_json(button: &Button) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("label".into(), Value::String(button.label.clone()));
    let kind = match button.kind {
        ButtonKind::Simple => "button",
        ButtonKind::Group => "group",
    };
    obj.insert("type".into(), Value::String(kind.to_string()));
    if let Some(action) = &button.action {
        obj.insert("action".into(), Value::String(action.clone()));
    }
    if let Some(value) = &button.value {
        obj.insert("value".into(), Value::String(value.clone()));
    }
    if !button.subcontrols.is_empty() {
        obj.insert(
            "subcontrols".into(),
            Value::Array(button.subcontrols.iter().map(button_to_json).collect()),
        );
    }
    Value::Object(obj)
}
