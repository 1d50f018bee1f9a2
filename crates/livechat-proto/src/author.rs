use serde_json::Value;

/// Resolved `[author_id, author_name]` pair.
///
/// The backend reports authors as a two element array. Id `0` is the
/// operator side. A name of `false` is the backend's "unknown" marker and
/// is replaced by the configured guest label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: i64,
    pub name: String,
}

impl Author {
    pub fn resolve(raw: Option<&Value>, guest_label: &str) -> Self {
        Self::parse(raw, guest_label).unwrap_or_else(|| Self {
            id: 0,
            name: guest_label.to_string(),
        })
    }

    fn parse(raw: Option<&Value>, guest_label: &str) -> Option<Self> {
        let pair = raw?.as_array()?;
        if pair.len() < 2 {
            return None;
        }
        let id = pair[0].as_i64()?;
        let name = match &pair[1] {
            Value::String(name) => name.clone(),
            Value::Bool(false) => guest_label.to_string(),
            _ => return None,
        };
        Some(Self { id, name })
    }
}
