//! WebDAV client for cloud file sync.
//!
//! Talks plain HTTP with Basic authentication: `PROPFIND` (depth 1) for
//! listings and metadata, `GET`, `PUT` and `DELETE` for content. Listing
//! responses are parsed by the [`dav`] module; URL handling lives in [`path`].

pub mod client;
pub mod dav;
pub mod decode_html;
pub mod path;

pub use client::{BasicAuth, WebDavClient, WebDavConfig};
pub use dav::{DavProps, DavResponse, DavResult};
pub use decode_html::decode_html_entities;
pub use path::{join_url, normalise_path};
