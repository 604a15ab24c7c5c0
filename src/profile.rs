//! Sync Profile Metadata
//!
//! `syncProfile(profileId)` returns the profile as an XML document. Only the
//! `<key name=".." value=".."/>` elements matter here; they are flattened into
//! one map, nested sub-profiles included, later keys winning.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ProfileError;
use crate::transfer::Category;
use crate::transport::{cancellable, BusHandle, DaemonAddress, ReplyShape, SYNC_PROFILE};

pub const CATEGORY_KEY: &str = "category";
pub const ACCOUNT_ID_KEY: &str = "accountid";
pub const SERVICE_NAME_KEY: &str = "remote_service_name";
pub const DISPLAY_NAME_KEY: &str = "displayname";

/// Key/value pairs of a sync profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProfileFields(BTreeMap<String, String>);

impl ProfileFields {
    /// Parse a profile description. Any XML error rejects the whole document.
    pub fn parse(xml: &str) -> Result<Self, ProfileError> {
        let mut reader = Reader::from_str(xml);
        let mut fields = BTreeMap::new();
        let mut depth = 0usize;
        let mut seen_root = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(element)) => {
                    depth += 1;
                    seen_root = true;
                    insert_key(&mut fields, &element)?;
                }
                Ok(Event::Empty(element)) => {
                    seen_root = true;
                    insert_key(&mut fields, &element)?;
                }
                Ok(Event::End(_)) => {
                    depth = depth.saturating_sub(1);
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(ProfileError::Malformed(format!(
                        "at position {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
            }
        }

        if !seen_root {
            return Err(ProfileError::Malformed("no root element".into()));
        }
        if depth != 0 {
            return Err(ProfileError::Malformed("unclosed element".into()));
        }

        Ok(Self(fields))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn category(&self) -> Category {
        self.get(CATEGORY_KEY)
            .filter(|c| !c.is_empty())
            .map(|c| Category::from(c.to_string()))
            .unwrap_or_default()
    }

    /// Linked account, only when it is a positive id.
    pub fn account_id(&self) -> Option<u32> {
        self.get(ACCOUNT_ID_KEY)
            .and_then(|id| id.trim().parse::<u32>().ok())
            .filter(|id| *id > 0)
    }

    pub fn service_name(&self) -> Option<&str> {
        self.get(SERVICE_NAME_KEY).filter(|s| !s.is_empty())
    }

    pub fn display_name(&self) -> Option<&str> {
        self.get(DISPLAY_NAME_KEY).filter(|s| !s.is_empty())
    }
}

impl FromIterator<(String, String)> for ProfileFields {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn insert_key(
    fields: &mut BTreeMap<String, String>,
    element: &BytesStart<'_>,
) -> Result<(), ProfileError> {
    if element.name().as_ref() != b"key" {
        return Ok(());
    }

    let mut name = None;
    let mut value = String::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| ProfileError::Malformed(e.to_string()))?;
        let text = attr
            .unescape_value()
            .map_err(|e| ProfileError::Malformed(e.to_string()))?
            .into_owned();
        match attr.key.as_ref() {
            b"name" => name = Some(text),
            b"value" => value = text,
            _ => {}
        }
    }

    if let Some(name) = name {
        fields.insert(name, value);
    }
    Ok(())
}

/// Fetch and flatten a profile. Never fails: missing metadata is an empty map.
pub async fn resolve<H: BusHandle>(
    handle: &H,
    daemon: &DaemonAddress,
    profile_id: &str,
    cancel: &CancellationToken,
) -> ProfileFields {
    let reply = cancellable(cancel, handle.call(daemon, SYNC_PROFILE, profile_id, ReplyShape::Text))
        .await
        .and_then(|reply| reply.into_text());

    let xml = match reply {
        Ok(xml) => xml,
        Err(e) if e.is_cancelled() => {
            debug!("Profile lookup for {} cancelled", profile_id);
            return ProfileFields::default();
        }
        Err(e) => {
            warn!("Failed to retrieve profile {}: {}", profile_id, e);
            return ProfileFields::default();
        }
    };

    match ProfileFields::parse(&xml) {
        Ok(fields) => {
            debug!("Profile {} has {} keys", profile_id, fields.len());
            fields
        }
        Err(e) => {
            warn!("Ignoring profile {}: {}", profile_id, e);
            ProfileFields::default()
        }
    }
}
