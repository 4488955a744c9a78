//! Track descriptors and the preview records embedded in shard files.

use serde::{Deserialize, Serialize};

use crate::dbf::{DbfHeader, DbfRecord};

// ── Sub-type ─────────────────────────────────────────────────────────────────

/// The two song packaging conventions the catalog mixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubType {
    /// Single opaque `.emk` file.
    Emk,
    /// MIDI + lyrics + cursor triple.
    Ncn,
}

impl SubType {
    pub fn from_field(s: &str) -> Option<Self> {
        match s {
            "EMK" => Some(SubType::Emk),
            "NCN" => Some(SubType::Ncn),
            _     => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SubType::Emk => "EMK",
            SubType::Ncn => "NCN",
        }
    }
}

// ── Track ────────────────────────────────────────────────────────────────────

/// One catalog row.  `original_index` and `super_index` are absent until the
/// packer assigns them; once set, `original_index` is unique across the
/// build and `super_index` names the batch archive the song landed in.
#[derive(Debug, Clone)]
pub struct Track {
    pub title:     String,
    pub artist:    String,
    pub author:    String,
    pub lyr_title: String,
    pub code:      String,
    pub kind:      String,
    pub sub_type:  Option<SubType>,

    pub original_index: Option<u32>,
    pub super_index:    Option<u32>,
}

impl Track {
    /// Extract the semantic fields from a decoded record.  Missing columns
    /// yield empty strings; an unknown `SUB_TYPE` yields `None` and the
    /// packer will reject the track.
    pub fn from_record(header: &DbfHeader, record: &DbfRecord) -> Self {
        let field = |name: &str| record.get(header.field_index(name)).to_owned();
        let sub_type_raw = field("SUB_TYPE");
        Self {
            title:     field("TITLE"),
            artist:    field("ARTIST"),
            author:    field("AUTHOR"),
            lyr_title: field("LYR_TITLE"),
            code:      field("CODE"),
            kind:      field("TYPE"),
            sub_type:  SubType::from_field(&sub_type_raw),
            original_index: None,
            super_index:    None,
        }
    }

    /// The text the index builder tokenizes and the query engine filters on.
    pub fn search_text(&self) -> String {
        format!("{} {}", self.title, self.artist)
    }

    /// Preview record for shard embedding.  `None` until the packer has
    /// assigned both identity fields.
    pub fn preview(&self) -> Option<Preview> {
        Some(Preview {
            title:          self.title.clone(),
            artist:         self.artist.clone(),
            original_index: self.original_index?,
            super_index:    self.super_index?,
        })
    }
}

// ── Preview ──────────────────────────────────────────────────────────────────

/// Compact record copied into every shard posting that references the track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preview {
    #[serde(rename = "t")]
    pub title:          String,
    #[serde(rename = "a")]
    pub artist:         String,
    #[serde(rename = "i")]
    pub original_index: u32,
    #[serde(rename = "s")]
    pub super_index:    u32,
}

impl Preview {
    pub fn search_text(&self) -> String {
        format!("{} {}", self.title, self.artist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_type_parse() {
        assert_eq!(SubType::from_field("EMK"), Some(SubType::Emk));
        assert_eq!(SubType::from_field("NCN"), Some(SubType::Ncn));
        assert_eq!(SubType::from_field("MP3"), None);
        assert_eq!(SubType::from_field(""), None);
    }

    #[test]
    fn preview_requires_identity() {
        let mut track = Track {
            title:     "love".into(),
            artist:    "x".into(),
            author:    String::new(),
            lyr_title: String::new(),
            code:      "A0001".into(),
            kind:      "K".into(),
            sub_type:  Some(SubType::Ncn),
            original_index: None,
            super_index:    None,
        };
        assert!(track.preview().is_none());
        track.original_index = Some(7);
        track.super_index = Some(1);
        let p = track.preview().unwrap();
        assert_eq!((p.original_index, p.super_index), (7, 1));
    }

    #[test]
    fn preview_wire_names() {
        let p = Preview {
            title:          "t1".into(),
            artist:         "a1".into(),
            original_index: 3,
            super_index:    0,
        };
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"t":"t1","a":"a1","i":3,"s":0}"#);
    }
}
