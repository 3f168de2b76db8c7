//! Vault data model.
//!
//! The model deserializes both the current wire shape and the legacy shapes
//! that older clients produced: custom fields written as
//! `{type: "note", note}` and record comments written under a `note` key.
//! Migration happens in the deserialization path, so the rest of the
//! codebase only ever sees the current shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tidevault_common::VaultId;
use tidevault_crypto::{DerivedKey, Salt};

/// Current vault schema version. A marker, not a revision counter.
pub const VAULT_VERSION: u32 = 1;

/// A vault: the unit of protection and synchronization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vault {
    pub id: VaultId,
    pub name: String,
    pub version: u32,
    pub records: Vec<Record>,
    pub devices: Vec<Device>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// A single credential record inside a vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawRecord")]
pub struct Record {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
}

/// Raw record shape accepting the legacy `note` key alongside `comment`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    id: String,
    title: String,
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    comment: Option<String>,
    note: Option<String>,
    #[serde(default)]
    custom_fields: Vec<CustomField>,
}

impl From<RawRecord> for Record {
    fn from(raw: RawRecord) -> Self {
        Self {
            id: raw.id,
            title: raw.title,
            url: raw.url,
            username: raw.username,
            password: raw.password,
            comment: migrate_note_to_comment(raw.note, raw.comment),
            custom_fields: raw.custom_fields,
        }
    }
}

/// A device that has joined a vault through pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub added_at: DateTime<Utc>,
}

/// A free-form field attached to a record.
///
/// Normalized from two historical shapes: `{type: "note", note}` (legacy)
/// and `{type: "text", content}` (current). `content` wins when a field
/// carries both keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCustomField")]
pub struct CustomField {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Option<String>,
}

impl CustomField {
    /// Build a text field in the current shape.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            content: Some(content.into()),
        }
    }
}

#[derive(Deserialize)]
struct RawCustomField {
    #[serde(rename = "type")]
    kind: String,
    note: Option<String>,
    content: Option<String>,
}

impl From<RawCustomField> for CustomField {
    fn from(raw: RawCustomField) -> Self {
        migrate_custom_field(raw.kind, raw.note, raw.content)
    }
}

/// Normalize a custom field to the current shape.
///
/// Both valid kinds map to `"text"`; unknown kinds pass through unchanged.
/// `content` takes precedence over the legacy `note` value.
pub fn migrate_custom_field(
    kind: String,
    note: Option<String>,
    content: Option<String>,
) -> CustomField {
    let kind = if is_valid_custom_field_kind(&kind) {
        "text".to_string()
    } else {
        kind
    };

    CustomField {
        kind,
        content: content.or(note),
    }
}

/// Check whether a custom field kind is recognized (legacy or current).
pub fn is_valid_custom_field_kind(kind: &str) -> bool {
    matches!(kind, "note" | "text")
}

/// Migrate a record comment from the legacy `note` key.
///
/// `comment` wins when both keys are present.
pub fn migrate_note_to_comment(note: Option<String>, comment: Option<String>) -> Option<String> {
    comment.or(note)
}

/// Encryption material protecting a vault, held by the store keyed by
/// vault id. Never stored inside the `Vault` object itself.
///
/// `hashed_password` is the Argon2id-derived key of the password that
/// currently protects the vault; the payload is encrypted under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultEncryption {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub salt: Salt,
    pub hashed_password: DerivedKey,
}

impl PartialEq for VaultEncryption {
    fn eq(&self, other: &Self) -> bool {
        self.ciphertext == other.ciphertext
            && self.nonce == other.nonce
            && self.salt == other.salt
            && self.hashed_password.ct_eq(&other.hashed_password)
    }
}

/// The single vault currently decrypted and operable.
///
/// At most one exists at a time; the encryption is absent for unprotected
/// vaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveVault {
    pub vault: Vault,
    pub encryption: Option<VaultEncryption>,
}
