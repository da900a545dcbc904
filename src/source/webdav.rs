//! Remote vaults served over WebDAV (Nextcloud, rclone serve, ...).

use std::collections::{HashSet, VecDeque};

use quick_xml::events::Event;
use reqwest::{Client, Method, Url};
use tracing::{debug, info, warn};

use super::{Document, Listing};
use crate::error::SourceError;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:resourcetype/></d:prop></d:propfind>"#;

pub struct WebDavSource {
    client: Client,
    propfind: Method,
    root: Url,
    extension: String,
    credentials: Option<(String, Option<String>)>,
}

/// One `<response>` of a multistatus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavEntry {
    pub href: String,
    pub is_collection: bool,
}

impl WebDavSource {
    pub fn new(
        url: &str,
        extension: &str,
        credentials: Option<(String, Option<String>)>,
    ) -> Result<Self, SourceError> {
        let malformed = |reason: String| SourceError::Malformed {
            origin: url.to_string(),
            reason,
        };
        let mut root = Url::parse(url).map_err(|e| malformed(e.to_string()))?;
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }
        let propfind = Method::from_bytes(b"PROPFIND").map_err(|e| malformed(e.to_string()))?;

        Ok(Self {
            client: Client::new(),
            propfind,
            root,
            extension: extension.trim_start_matches('.').to_string(),
            credentials,
        })
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    pub async fn list(&self) -> Result<Listing, SourceError> {
        let mut listing = Listing::default();
        let mut queue = VecDeque::from([self.root.clone()]);
        let mut seen = HashSet::from([self.root.path().to_string()]);
        let mut files = Vec::new();

        while let Some(collection) = queue.pop_front() {
            let entries = match self.propfind(&collection).await {
                Ok(entries) => entries,
                // Only the root being unreachable fails the whole source.
                Err(err) if collection == self.root => return Err(err),
                Err(err) => {
                    warn!("{}", err);
                    listing.failures.push((collection.to_string(), err));
                    continue;
                }
            };

            for entry in entries {
                let Ok(url) = collection.join(&entry.href) else {
                    warn!("Ignoring unparsable href {:?}", entry.href);
                    continue;
                };
                if same_path(&url, &collection) {
                    continue;
                }
                if entry.is_collection {
                    if seen.insert(url.path().to_string()) {
                        queue.push_back(url);
                    }
                } else if self.matches(&url) {
                    files.push(url);
                }
            }
        }

        files.sort_by(|a, b| a.path().cmp(b.path()));
        info!("Found {} documents under {}", files.len(), self.root);

        for url in files {
            let name = document_name(&url);
            match self.fetch(&url).await {
                Ok(bytes) => {
                    debug!("Fetched {}", url);
                    listing.documents.push(Document::new(name, bytes));
                }
                Err(err) => {
                    warn!("{}", err);
                    listing.failures.push((name, err));
                }
            }
        }
        Ok(listing)
    }

    fn request(&self, method: Method, url: &Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url.clone());
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, password.as_ref()),
            None => builder,
        }
    }

    async fn propfind(&self, url: &Url) -> Result<Vec<DavEntry>, SourceError> {
        let http = |source| SourceError::Http {
            url: url.to_string(),
            source,
        };
        let response = self
            .request(self.propfind.clone(), url)
            .header("Depth", "1")
            .header("Content-Type", "application/xml")
            .body(PROPFIND_BODY)
            .send()
            .await
            .map_err(http)?;
        if !response.status().is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        let xml = response.text().await.map_err(http)?;
        parse_multistatus(&xml).map_err(|reason| SourceError::Malformed {
            origin: url.to_string(),
            reason,
        })
    }

    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, SourceError> {
        let http = |source| SourceError::Http {
            url: url.to_string(),
            source,
        };
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(http)?;
        if !response.status().is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        Ok(response.bytes().await.map_err(http)?.to_vec())
    }

    fn matches(&self, url: &Url) -> bool {
        url.path()
            .rsplit_once('.')
            .is_some_and(|(_, ext)| ext == self.extension)
    }
}

fn same_path(a: &Url, b: &Url) -> bool {
    a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
}

/// Last path segment, percent-decoded.
fn document_name(url: &Url) -> String {
    let raw = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or_default();
    urlencoding::decode(raw)
        .map(|name| name.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Parse a `207 Multi-Status` body into its `(href, is_collection)` entries.
pub fn parse_multistatus(xml: &str) -> Result<Vec<DavEntry>, String> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut current: Option<DavEntry> = None;
    let mut in_href = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"response" => {
                    current = Some(DavEntry {
                        href: String::new(),
                        is_collection: false,
                    })
                }
                b"href" if current.is_some() => in_href = true,
                b"collection" => {
                    if let Some(entry) = current.as_mut() {
                        entry.is_collection = true;
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"collection" => {
                if let Some(entry) = current.as_mut() {
                    entry.is_collection = true;
                }
            }
            Ok(Event::Text(e)) if in_href => {
                let text = e.unescape().map_err(|e| e.to_string())?;
                if let Some(entry) = current.as_mut() {
                    entry.href.push_str(text.trim());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"href" => in_href = false,
                b"response" => {
                    if let Some(entry) = current.take() {
                        if !entry.href.is_empty() {
                            entries.push(entry);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTISTATUS: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/dav/vault/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/vault/Les%20Races/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection></d:collection></d:resourcetype></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/vault/Orcs%20%26%20Gobelins.md</d:href>
    <d:propstat><d:prop><d:resourcetype/></d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

    #[test]
    fn parses_entries_and_collections() {
        let entries = parse_multistatus(MULTISTATUS).unwrap();
        assert_eq!(
            entries,
            vec![
                DavEntry {
                    href: "/dav/vault/".into(),
                    is_collection: true
                },
                DavEntry {
                    href: "/dav/vault/Les%20Races/".into(),
                    is_collection: true
                },
                DavEntry {
                    href: "/dav/vault/Orcs%20%26%20Gobelins.md".into(),
                    is_collection: false
                },
            ]
        );
    }

    #[test]
    fn unprefixed_namespace() {
        let xml = r#"<multistatus xmlns="DAV:"><response><href>a.md</href><propstat><prop><resourcetype/></prop></propstat></response></multistatus>"#;
        let entries = parse_multistatus(xml).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].is_collection);
    }

    #[test]
    fn names_are_decoded() {
        let url = Url::parse("https://dav.example.net/dav/vault/Orcs%20%26%20Gobelins.md").unwrap();
        assert_eq!(document_name(&url), "Orcs & Gobelins.md");
    }

    #[test]
    fn root_gets_trailing_slash() {
        let source = WebDavSource::new("https://dav.example.net/vault", "md", None).unwrap();
        assert_eq!(source.root().as_str(), "https://dav.example.net/vault/");
        let url = source.root().join("Orcs.md").unwrap();
        assert!(source.matches(&url));
        assert!(!source.matches(&source.root().join("notes.txt").unwrap()));
    }

    #[test]
    fn bad_url_is_malformed() {
        assert!(matches!(
            WebDavSource::new("not a url", "md", None),
            Err(SourceError::Malformed { .. })
        ));
    }

    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    type Route = fn(&str, &str) -> (u16, String);

    /// One-request-per-connection HTTP responder. Returns the base URL and
    /// the `METHOD path` lines it served.
    async fn dav_server(route: Route) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let log = Arc::new(Mutex::new(Vec::new()));
        let served = Arc::clone(&log);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let served = Arc::clone(&served);
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    let head_end = loop {
                        let n = socket.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                            break pos + 4;
                        }
                    };
                    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
                    let length = head
                        .lines()
                        .filter_map(|l| l.split_once(':'))
                        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    while buf.len() < head_end + length {
                        let n = socket.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                    }

                    let mut request_line = head.split_whitespace();
                    let method = request_line.next().unwrap_or_default().to_string();
                    let path = request_line.next().unwrap_or_default().to_string();
                    served.lock().unwrap().push(format!("{method} {path}"));

                    let (status, body) = route(&method, &path);
                    let response = format!(
                        "HTTP/1.1 {status} Canned\r\nContent-Type: application/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        (base, log)
    }

    fn multistatus(entries: &[(&str, bool)]) -> String {
        let responses: String = entries
            .iter()
            .map(|(href, collection)| {
                let kind = if *collection { "<d:collection/>" } else { "" };
                format!(
                    "<d:response><d:href>{href}</d:href><d:propstat><d:prop>\
                     <d:resourcetype>{kind}</d:resourcetype></d:prop></d:propstat></d:response>"
                )
            })
            .collect();
        format!(r#"<?xml version="1.0"?><d:multistatus xmlns:d="DAV:">{responses}</d:multistatus>"#)
    }

    fn vault_routes(method: &str, path: &str) -> (u16, String) {
        match (method, path) {
            ("PROPFIND", "/vault/") => (
                207,
                multistatus(&[
                    ("/vault/", true),
                    ("/vault/Orcs.md", false),
                    ("/vault/notes.txt", false),
                    ("/vault/sub/", true),
                    ("/vault/broken/", true),
                    ("/vault/missing.md", false),
                ]),
            ),
            ("PROPFIND", "/vault/sub/") => (
                207,
                multistatus(&[
                    ("/vault/sub/", true),
                    ("/vault/sub/Elfes%20Noirs.md", false),
                    ("/vault/", true),
                ]),
            ),
            ("PROPFIND", "/vault/broken/") => (500, String::new()),
            ("GET", "/vault/Orcs.md") => (200, "1. Économie\nCuir.".into()),
            ("GET", "/vault/sub/Elfes%20Noirs.md") => (200, "1. Magie\nOui.".into()),
            _ => (404, String::new()),
        }
    }

    fn local_source(base: &str) -> WebDavSource {
        let mut source = WebDavSource::new(&format!("{base}/vault"), "md", None).unwrap();
        source.client = Client::builder().no_proxy().build().unwrap();
        source
    }

    #[tokio::test]
    async fn walks_collections_and_records_failures() {
        let (base, log) = dav_server(vault_routes).await;
        let listing = local_source(&base).list().await.unwrap();

        let names: Vec<&str> = listing.documents.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Orcs.md", "Elfes Noirs.md"]);
        assert_eq!(listing.documents[1].bytes, "1. Magie\nOui.".as_bytes());

        assert_eq!(listing.failures.len(), 2);
        assert_eq!(listing.failures[0].0, format!("{base}/vault/broken/"));
        assert!(matches!(
            &listing.failures[0].1,
            SourceError::Status { status, .. } if status.as_u16() == 500
        ));
        assert_eq!(listing.failures[1].0, "missing.md");
        assert!(matches!(
            &listing.failures[1].1,
            SourceError::Status { status, .. } if status.as_u16() == 404
        ));

        let log = log.lock().unwrap();
        assert_eq!(log.iter().filter(|l| *l == "PROPFIND /vault/").count(), 1);
        assert!(!log.iter().any(|l| l.ends_with("notes.txt")));
    }

    #[tokio::test]
    async fn unreachable_root_fails_the_listing() {
        fn down(_: &str, _: &str) -> (u16, String) {
            (503, String::new())
        }
        let (base, _) = dav_server(down).await;
        assert!(matches!(
            local_source(&base).list().await,
            Err(SourceError::Status { status, .. }) if status.as_u16() == 503
        ));
    }
}
