//! Data model shared by the vault store and the vault API: the on-disk
//! `Item` shape, the `contents.js` index entry tuple, and the plaintext
//! `ItemContent` structure that lives inside `encrypted` once decrypted.

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::keystore::SecurityLevelId;

/// `typeName` used for a soft-deleted item, per the GLOSSARY.
pub const TOMBSTONE_TYPE: &str = "system.Tombstone";

/// A single on-disk `<uuid>.1password` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub uuid: String,
    #[serde(rename = "typeName")]
    pub type_name: String,
    pub title: String,
    pub location: String,
    #[serde(rename = "folderUuid")]
    pub folder_uuid: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
    pub trashed: bool,
    #[serde(rename = "securityLevel")]
    pub security_level: SecurityLevelId,
    #[serde(rename = "contentsHash")]
    pub contents_hash: String,
    /// Cleartext flags the original item carries outside the encrypted
    /// blob (field mask, UI hints, …); shape varies by `typeName`, so it is
    /// passed through opaquely rather than modeled field by field.
    #[serde(rename = "openContents", default)]
    pub open_contents: serde_json::Value,
    /// Base64 `Salted__` blob; empty once the item is tombstoned.
    pub encrypted: String,
}

impl Item {
    pub fn is_tombstone(&self) -> bool {
        self.type_name == TOMBSTONE_TYPE
    }

    /// The eight fields the index entry must mirror, per §3's invariant.
    pub fn to_index_entry(&self) -> IndexEntry {
        IndexEntry {
            uuid: self.uuid.clone(),
            type_name: self.type_name.clone(),
            title: self.title.clone(),
            location: self.location.clone(),
            folder_uuid: self.folder_uuid.clone(),
            updated_at: self.updated_at,
            trashed: self.trashed,
            contents_hash: self.contents_hash.clone(),
        }
    }
}

/// One entry in `contents.js`, serialized as a 9-element JSON array:
/// `[uuid, typeName, title, location, folderUuid, updatedAt, trashed(0|1),
/// contentsHash, "N"]`. The trailing `"N"` is carried through unchanged; real
/// vaults always emit the literal `"N"` here and nothing in this system reads
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub uuid: String,
    pub type_name: String,
    pub title: String,
    pub location: String,
    pub folder_uuid: String,
    pub updated_at: i64,
    pub trashed: bool,
    pub contents_hash: String,
}

impl Serialize for IndexEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(9))?;
        seq.serialize_element(&self.uuid)?;
        seq.serialize_element(&self.type_name)?;
        seq.serialize_element(&self.title)?;
        seq.serialize_element(&self.location)?;
        seq.serialize_element(&self.folder_uuid)?;
        seq.serialize_element(&self.updated_at)?;
        seq.serialize_element(&(self.trashed as u8))?;
        seq.serialize_element(&self.contents_hash)?;
        seq.serialize_element("N")?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for IndexEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IndexEntryVisitor;

        impl<'de> Visitor<'de> for IndexEntryVisitor {
            type Value = IndexEntry;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a contents.js index entry array")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<IndexEntry, A::Error> {
                let uuid: String = next(&mut seq, "uuid")?;
                let type_name: String = next(&mut seq, "typeName")?;
                let title: String = next(&mut seq, "title")?;
                let location: String = next(&mut seq, "location")?;
                let folder_uuid: String = next(&mut seq, "folderUuid")?;
                let updated_at: i64 = next(&mut seq, "updatedAt")?;
                // Tolerate both JSON bool and 0/1 integer forms, per the
                // documented open question on `trashed`'s on-disk shape.
                let trashed_raw: TrashedFlag = next(&mut seq, "trashed")?;
                let contents_hash: String = next(&mut seq, "contentsHash")?;
                // Trailing "N" marker; read and discarded if present.
                let _marker: Option<String> = seq.next_element()?;

                Ok(IndexEntry {
                    uuid,
                    type_name,
                    title,
                    location,
                    folder_uuid,
                    updated_at,
                    trashed: trashed_raw.0,
                    contents_hash,
                })
            }
        }

        fn next<'de, A: SeqAccess<'de>, T: Deserialize<'de>>(
            seq: &mut A,
            field: &'static str,
        ) -> Result<T, A::Error> {
            seq.next_element()?
                .ok_or_else(|| de::Error::custom(format!("missing index field `{field}`")))
        }

        deserializer.deserialize_seq(IndexEntryVisitor)
    }
}

/// Deserialization helper accepting `true`/`false` or `0`/`1` for `trashed`.
struct TrashedFlag(bool);

impl<'de> Deserialize<'de> for TrashedFlag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let trashed = match value {
            serde_json::Value::Bool(b) => b,
            serde_json::Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
            other => {
                return Err(de::Error::custom(format!(
                    "expected bool or 0/1 for trashed, got {other}"
                )))
            }
        };
        Ok(TrashedFlag(trashed))
    }
}

/// The decrypted payload that lives inside `Item::encrypted`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemContent {
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(rename = "webFormFields", default)]
    pub web_form_fields: Vec<WebFormField>,
    #[serde(default)]
    pub urls: Vec<Url>,
    #[serde(default)]
    pub notes: String,
    #[serde(rename = "htmlMethod", default)]
    pub html_method: String,
    #[serde(rename = "htmlAction", default)]
    pub html_action: String,
    #[serde(rename = "htmlId", default)]
    pub html_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Field {
    pub name: String,
    pub title: String,
    pub kind: FieldKind,
    pub value: FieldValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    String,
    Concealed,
    Email,
    Url,
    Date,
    MonthYear,
    Address,
    Phone,
    #[serde(rename = "cctype")]
    CcType,
    Gender,
    Menu,
}

/// A field's value. Tagged by the sibling `kind` at the `Field` level, but
/// self-describing here too so a `FieldValue` is meaningful in isolation
/// (e.g. inside a `WebFormField`, which has no `kind` field of its own).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FieldValue {
    String(String),
    Concealed(String),
    Email(String),
    Url(String),
    Date(i64),
    MonthYear(i64),
    Address {
        street: String,
        city: String,
        zip: String,
        state: String,
        country: String,
    },
    Phone(String),
    #[serde(rename = "cctype")]
    CcType(String),
    Gender(String),
    Menu(String),
}

impl FieldValue {
    /// Coerces the value to the string form used by contentsHash
    /// canonicalization (§6): every scalar's textual representation, and
    /// address fields concatenated street/city/zip/state/country.
    pub fn to_canonical_string(&self) -> String {
        match self {
            FieldValue::String(s)
            | FieldValue::Concealed(s)
            | FieldValue::Email(s)
            | FieldValue::Url(s)
            | FieldValue::Phone(s)
            | FieldValue::CcType(s)
            | FieldValue::Gender(s)
            | FieldValue::Menu(s) => s.clone(),
            FieldValue::Date(d) | FieldValue::MonthYear(d) => d.to_string(),
            FieldValue::Address {
                street,
                city,
                zip,
                state,
                country,
            } => format!("{street}{city}{zip}{state}{country}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebFormField {
    pub name: String,
    pub id: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub designation: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Url {
    pub label: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_entry_round_trips_through_json_array() {
        let entry = IndexEntry {
            uuid: "abc123".into(),
            type_name: "webforms.WebForm".into(),
            title: "Example".into(),
            location: "example.com".into(),
            folder_uuid: String::new(),
            updated_at: 1000,
            trashed: true,
            contents_hash: "deadbeefdeadbeef".into(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(
            json,
            r#"["abc123","webforms.WebForm","Example","example.com","",1000,1,"deadbeefdeadbeef","N"]"#
        );
        let back: IndexEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn index_entry_tolerates_bool_trashed() {
        let json = r#"["u","t","title","loc","",1,true,"hash","N"]"#;
        let entry: IndexEntry = serde_json::from_str(json).unwrap();
        assert!(entry.trashed);
    }

    #[test]
    fn index_entry_tolerates_int_trashed() {
        let json = r#"["u","t","title","loc","",1,0,"hash","N"]"#;
        let entry: IndexEntry = serde_json::from_str(json).unwrap();
        assert!(!entry.trashed);
    }
}
