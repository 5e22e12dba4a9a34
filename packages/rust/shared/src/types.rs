//! Core domain and wire types for contact reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ReconcilerError, Result};

// ---------------------------------------------------------------------------
// ContactId
// ---------------------------------------------------------------------------

/// Store-assigned, monotonically increasing contact identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(pub i64);

impl std::fmt::Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ContactId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// ---------------------------------------------------------------------------
// LinkPrecedence
// ---------------------------------------------------------------------------

/// Role of a record within its identity group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    Primary,
    Secondary,
}

impl LinkPrecedence {
    /// Persisted string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LinkPrecedence {
    type Err = ReconcilerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(ReconcilerError::store(format!(
                "unknown link precedence '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// ContactRecord
// ---------------------------------------------------------------------------

/// A persisted contact fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    pub id: ContactId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Parent in the identity group; `None` for primaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-delete tombstone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ContactRecord {
    /// Age ordering key: creation time, then id for records created in the
    /// same clock tick.
    pub fn age_key(&self) -> (DateTime<Utc>, ContactId) {
        (self.created_at, self.id)
    }

    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }
}

/// Values for a record the store has not assigned an id to yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
}

impl NewContact {
    /// A fresh group root.
    pub fn primary(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
        }
    }

    /// A fragment attached directly under `parent`.
    pub fn secondary(
        email: Option<String>,
        phone_number: Option<String>,
        parent: ContactId,
    ) -> Self {
        Self {
            email,
            phone_number,
            linked_id: Some(parent),
            link_precedence: LinkPrecedence::Secondary,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Body of `POST /identify`.
///
/// `phoneNumber` may arrive as a JSON string or number; `phone` is accepted
/// as an alias.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "phone", deserialize_with = "string_or_number")]
    pub phone_number: Option<String>,
}

impl IdentifyRequest {
    pub fn new(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
        }
    }

    /// Drop empty values and require at least one field to remain.
    pub fn normalized(self) -> Result<Self> {
        let email = self.email.filter(|e| !e.is_empty());
        let phone_number = self.phone_number.filter(|p| !p.is_empty());
        if email.is_none() && phone_number.is_none() {
            return Err(ReconcilerError::invalid_input(
                "at least one of email or phoneNumber is required",
            ));
        }
        Ok(Self {
            email,
            phone_number,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<StringOrNumber>::deserialize(deserializer)?.map(|v| match v {
            StringOrNumber::String(s) => s,
            StringOrNumber::Number(n) => n.to_string(),
        }),
    )
}

/// Consolidated view of one identity group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedContact {
    /// Field name keeps the historical misspelling for client compatibility.
    #[serde(rename = "primaryContatctId", alias = "primaryContactId")]
    pub primary_contact_id: ContactId,
    /// Primary's email first, then secondaries oldest-first, de-duplicated.
    pub emails: Vec<String>,
    /// Same ordering as `emails`.
    #[serde(rename = "phoneNumbers")]
    pub phone_numbers: Vec<String>,
    /// Oldest first.
    #[serde(rename = "secondaryContactIds")]
    pub secondary_contact_ids: Vec<ContactId>,
}

/// Response envelope for `POST /identify` and `GET /contacts/:id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: ConsolidatedContact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_parses_persisted_form() {
        assert_eq!(
            "primary".parse::<LinkPrecedence>().unwrap(),
            LinkPrecedence::Primary
        );
        assert_eq!(LinkPrecedence::Secondary.as_str(), "secondary");
        assert!("PRIMARY".parse::<LinkPrecedence>().is_err());
    }

    #[test]
    fn request_accepts_numeric_phone() {
        let req: IdentifyRequest =
            serde_json::from_str(r#"{"email": null, "phoneNumber": 123456}"#).unwrap();
        assert_eq!(req.email, None);
        assert_eq!(req.phone_number.as_deref(), Some("123456"));
    }

    #[test]
    fn request_accepts_phone_alias() {
        let req: IdentifyRequest =
            serde_json::from_str(r#"{"email": "a@x.io", "phone": "555"}"#).unwrap();
        assert_eq!(req.email.as_deref(), Some("a@x.io"));
        assert_eq!(req.phone_number.as_deref(), Some("555"));
    }

    #[test]
    fn request_with_missing_fields_deserializes() {
        let req: IdentifyRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req, IdentifyRequest::default());
    }

    #[test]
    fn normalized_rejects_empty_request() {
        let err = IdentifyRequest::new(Some(String::new()), None)
            .normalized()
            .unwrap_err();
        assert!(err.is_client_error());

        let ok = IdentifyRequest::new(Some(String::new()), Some("555".into()))
            .normalized()
            .unwrap();
        assert_eq!(ok.email, None);
        assert_eq!(ok.phone_number.as_deref(), Some("555"));
    }

    #[test]
    fn consolidated_contact_wire_shape() {
        let view = IdentifyResponse {
            contact: ConsolidatedContact {
                primary_contact_id: ContactId(1),
                emails: vec!["a@x.io".into()],
                phone_numbers: vec!["123".into(), "456".into()],
                secondary_contact_ids: vec![ContactId(23)],
            },
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["contact"]["primaryContatctId"], 1);
        assert_eq!(json["contact"]["phoneNumbers"][1], "456");
        assert_eq!(json["contact"]["secondaryContactIds"][0], 23);
    }
}
