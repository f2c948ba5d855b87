//! PROPFIND multistatus parsing.
//!
//! The XML is first read into a raw element tree, then [`normalize`] turns
//! that tree into a [`DavResult`]. All shape irregularities (one or many
//! responses, several propstat blocks, empty multistatus) are resolved there
//! and nowhere else.

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::warn;

use cloudstorage_common::{
    parse_date, CloudDirectory, CloudFile, CloudItem, Error, Result,
};

use crate::decode_html::decode_html_entities;
use crate::path::basename;

/// Raw XML element with namespace prefixes removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    /// First child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.as_str())
            .filter(|t| !t.is_empty())
    }
}

/// Read an XML document into a tree. The returned element is a synthetic
/// document node whose children are the top level elements.
pub fn parse_tree(xml: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack = vec![XmlElement::default()];
    let malformed = || Error::InvalidResponse("Malformed XML document".to_string());

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack.push(XmlElement::new(name));
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack
                    .last_mut()
                    .ok_or_else(malformed)?
                    .children
                    .push(XmlElement::new(name));
            }
            Ok(Event::Text(e)) => {
                let text = String::from_utf8_lossy(&e);
                stack.last_mut().ok_or_else(malformed)?.text.push_str(&text);
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e);
                stack.last_mut().ok_or_else(malformed)?.text.push_str(&text);
            }
            Ok(Event::End(_)) => {
                let element = stack.pop().ok_or_else(malformed)?;
                stack.last_mut().ok_or_else(malformed)?.children.push(element);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(Error::InvalidResponse(format!(
                    "Failed parsing XML at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(document), true) => Ok(document),
        _ => Err(malformed()),
    }
}

/// Properties of one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DavProps {
    pub is_collection: bool,
    pub last_modified: Option<String>,
}

/// One `response` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavResponse {
    pub href: String,
    pub props: DavProps,
}

/// Normalized multistatus document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DavResult {
    pub responses: Vec<DavResponse>,
}

fn propstat_status(propstat: &XmlElement) -> Option<u16> {
    // "HTTP/1.1 200 OK"
    propstat
        .child_text("status")?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

fn normalize_response(response: &XmlElement) -> Result<DavResponse> {
    let href = response
        .child_text("href")
        .ok_or_else(|| Error::InvalidResponse("Response without href".to_string()))?
        .to_string();

    let propstat = response
        .children_named("propstat")
        .find(|p| propstat_status(p).is_some_and(|s| (200..300).contains(&s)))
        .or_else(|| response.child("propstat"));

    let props = propstat
        .and_then(|p| p.child("prop"))
        .map(|prop| DavProps {
            is_collection: prop
                .child("resourcetype")
                .and_then(|r| r.child("collection"))
                .is_some(),
            last_modified: prop.child_text("getlastmodified").map(str::to_string),
        })
        .unwrap_or_default();

    Ok(DavResponse { href, props })
}

/// Turn a raw document tree into a [`DavResult`].
///
/// # Errors
/// - `InvalidResponse` if the document has no `multistatus` root or a
///   response lacks its `href`
pub fn normalize(document: &XmlElement) -> Result<DavResult> {
    let multistatus = document.child("multistatus").ok_or_else(|| {
        Error::InvalidResponse("Invalid response: No root multistatus found".to_string())
    })?;

    let responses = multistatus
        .children_named("response")
        .map(normalize_response)
        .collect::<Result<Vec<_>>>()?;

    Ok(DavResult { responses })
}

/// Parse a PROPFIND response body.
pub fn parse_xml(xml: &str) -> Result<DavResult> {
    normalize(&parse_tree(xml)?)
}

/// Build a listing item from resource properties and its decoded path.
pub fn prepare_item(props: &DavProps, raw_filename: &str) -> CloudItem {
    let path = decode_html_entities(raw_filename);
    let name = basename(&path).to_string();

    if props.is_collection {
        return CloudItem::Directory(CloudDirectory { path, name });
    }

    let last_modified = match props.last_modified.as_deref().map(parse_date) {
        Some(Ok(date)) => date,
        Some(Err(e)) => {
            warn!("Invalid modification date of {}: {}", path, e);
            DateTime::<Utc>::UNIX_EPOCH
        }
        None => {
            warn!("{} has no modification date", path);
            DateTime::<Utc>::UNIX_EPOCH
        }
    };

    CloudItem::File(CloudFile {
        path,
        name,
        last_modified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const LISTING: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
  <d:response>
    <d:href>/remote.php/webdav/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
        <d:getlastmodified>Tue, 05 Mar 2024 10:00:00 GMT</d:getlastmodified>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/webdav/todo.txt</d:href>
    <d:propstat>
      <d:prop>
        <oc:size/>
      </d:prop>
      <d:status>HTTP/1.1 404 Not Found</d:status>
    </d:propstat>
    <d:propstat>
      <d:prop>
        <d:resourcetype/>
        <d:getlastmodified>Tue, 05 Mar 2024 10:30:00 GMT</d:getlastmodified>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

    #[test]
    fn test_parse_listing() {
        let result = parse_xml(LISTING).unwrap();
        assert_eq!(result.responses.len(), 2);

        let dir = &result.responses[0];
        assert_eq!(dir.href, "/remote.php/webdav/");
        assert!(dir.props.is_collection);

        let file = &result.responses[1];
        assert!(!file.props.is_collection);
        assert_eq!(
            file.props.last_modified.as_deref(),
            Some("Tue, 05 Mar 2024 10:30:00 GMT")
        );
    }

    #[test]
    fn test_single_response_without_prefix() {
        let xml = r#"<multistatus xmlns="DAV:">
            <response>
                <href>/todo.txt</href>
                <propstat><prop><resourcetype/></prop><status>HTTP/1.1 200 OK</status></propstat>
            </response>
        </multistatus>"#;
        let result = parse_xml(xml).unwrap();
        assert_eq!(result.responses.len(), 1);
        assert_eq!(result.responses[0].href, "/todo.txt");
        assert_eq!(result.responses[0].props.last_modified, None);
    }

    #[test]
    fn test_empty_multistatus() {
        let result = parse_xml(r#"<d:multistatus xmlns:d="DAV:"/>"#).unwrap();
        assert!(result.responses.is_empty());

        let result = parse_xml(r#"<d:multistatus xmlns:d="DAV:"></d:multistatus>"#).unwrap();
        assert!(result.responses.is_empty());
    }

    #[test]
    fn test_missing_multistatus_root() {
        let err = parse_xml("<html><body>Login</body></html>").unwrap_err();
        assert!(err.to_string().contains("No root multistatus found"));
    }

    #[test]
    fn test_malformed_xml() {
        assert!(parse_xml("<d:multistatus><d:response></d:multistatus>").is_err());
    }

    #[test]
    fn test_prepare_file_item() {
        let props = DavProps {
            is_collection: false,
            last_modified: Some("Tue, 05 Mar 2024 10:30:00 GMT".to_string()),
        };
        let item = prepare_item(&props, "/Tom &amp; Jerry.txt");
        let file = item.into_file().unwrap();
        assert_eq!(file.path, "/Tom & Jerry.txt");
        assert_eq!(file.name, "Tom & Jerry.txt");
        assert_eq!(
            file.last_modified,
            Utc.with_ymd_and_hms(2024, 3, 5, 10, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_prepare_item_without_date_uses_epoch() {
        let item = prepare_item(&DavProps::default(), "/todo.txt");
        assert_eq!(item.into_file().unwrap().last_modified, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_prepare_directory_item() {
        let props = DavProps {
            is_collection: true,
            last_modified: None,
        };
        let item = prepare_item(&props, "/Documents");
        assert!(!item.is_file());
        assert_eq!(item.name(), "Documents");
    }
}
