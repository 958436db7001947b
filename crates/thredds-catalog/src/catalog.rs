//! THREDDS `catalog.xml` parsing.
//!
//! A catalog page contains three things we care about: the service tree
//! (to find the `HTTPServer` base path used to build download URLs), leaf
//! `<dataset>` elements carrying a `urlPath`, and `<catalogRef>` children
//! pointing at sub-catalogs. Everything else (metadata, dataSize, OPeNDAP
//! services) is ignored.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{CatalogError, CatalogResult};

/// Default HTTPServer base when the catalog does not advertise one.
const DEFAULT_FILESERVER_BASE: &str = "/thredds/fileServer/";

/// A leaf dataset entry: a downloadable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafDataset {
    pub name: String,
    pub url_path: String,
}

/// A reference to a sub-catalog, resolved to an absolute URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRef {
    pub title: String,
    pub url: String,
}

/// One parsed catalog page, in document order.
#[derive(Debug, Clone, Default)]
pub struct CatalogPage {
    /// Base path of the HTTPServer service, e.g. `/thredds/fileServer/`.
    pub http_base: Option<String>,
    pub datasets: Vec<LeafDataset>,
    pub refs: Vec<CatalogRef>,
}

impl CatalogPage {
    /// Parse a catalog document fetched from `catalog_url`.
    ///
    /// `catalog_url` is needed to resolve relative `catalogRef` hrefs.
    pub fn parse(catalog_url: &str, xml: &str) -> CatalogResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut page = CatalogPage::default();
        let mut saw_catalog = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    match e.local_name().as_ref() {
                        b"catalog" => saw_catalog = true,
                        b"service" => {
                            if let (Some(kind), Some(base)) =
                                (attr(&e, "serviceType"), attr(&e, "base"))
                            {
                                if kind.eq_ignore_ascii_case("httpserver") {
                                    page.http_base = Some(base);
                                }
                            }
                        }
                        b"dataset" => {
                            if let Some(url_path) = attr(&e, "urlPath") {
                                let name = attr(&e, "name")
                                    .unwrap_or_else(|| tail_segment(&url_path).to_string());
                                page.datasets.push(LeafDataset { name, url_path });
                            }
                        }
                        b"catalogRef" => {
                            // The href attribute is namespaced (xlink:href);
                            // match on the local name.
                            if let Some(href) = attr_local(&e, "href") {
                                page.refs.push(CatalogRef {
                                    title: attr_local(&e, "title").unwrap_or_default(),
                                    url: resolve_href(catalog_url, &href),
                                });
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(CatalogError::InvalidCatalog {
                        url: catalog_url.to_string(),
                        message: e.to_string(),
                    })
                }
            }
        }

        if !saw_catalog {
            return Err(CatalogError::InvalidCatalog {
                url: catalog_url.to_string(),
                message: "missing <catalog> root element".to_string(),
            });
        }

        Ok(page)
    }

    /// Build the download URL for a leaf dataset on this page.
    pub fn download_url(&self, catalog_url: &str, dataset: &LeafDataset) -> String {
        let base = self.http_base.as_deref().unwrap_or(DEFAULT_FILESERVER_BASE);
        format!(
            "{}{}{}",
            origin(catalog_url),
            base,
            dataset.url_path.trim_start_matches('/')
        )
    }
}

fn attr(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == name.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Attribute lookup ignoring any namespace prefix (for xlink attributes).
fn attr_local(e: &BytesStart<'_>, local: &str) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| {
            let key = a.key.as_ref();
            key == local.as_bytes()
                || key
                    .rsplit(|&b| b == b':')
                    .next()
                    .map_or(false, |tail| tail == local.as_bytes())
        })
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Scheme + authority of a URL, without the path.
fn origin(url: &str) -> &str {
    if let Some(scheme_end) = url.find("://") {
        let rest = &url[scheme_end + 3..];
        match rest.find('/') {
            Some(slash) => &url[..scheme_end + 3 + slash],
            None => url,
        }
    } else {
        url
    }
}

/// Resolve a `catalogRef` href against the URL of the page it appeared on.
fn resolve_href(catalog_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    if href.starts_with('/') {
        return format!("{}{}", origin(catalog_url), href);
    }
    match catalog_url.rfind('/') {
        Some(slash) => format!("{}/{}", &catalog_url[..slash], href),
        None => href.to_string(),
    }
}

fn tail_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<catalog xmlns="http://www.unidata.ucar.edu/namespaces/thredds/InvCatalog/v1.0"
         xmlns:xlink="http://www.w3.org/1999/xlink" name="Ocean archive">
  <service name="all" serviceType="Compound" base="">
    <service name="odap" serviceType="OPENDAP" base="/thredds/dodsC/"/>
    <service name="http" serviceType="HTTPServer" base="/thredds/fileServer/"/>
  </service>
  <dataset name="norkyst800m-1h" ID="fou-hi/norkyst800m-1h">
    <catalogRef xlink:href="2019/catalog.xml" xlink:title="2019" name=""/>
    <dataset name="NorKyst-800m.2024010100.nc"
             urlPath="fou-hi/norkyst800m-1h/NorKyst-800m.2024010100.nc"/>
    <dataset name="NorKyst-800m.2023123100.nc"
             urlPath="fou-hi/norkyst800m-1h/NorKyst-800m.2023123100.nc"/>
  </dataset>
</catalog>"#;

    const CATALOG_URL: &str =
        "https://thredds.example.org/thredds/catalog/fou-hi/norkyst800m-1h/catalog.xml";

    #[test]
    fn parses_services_datasets_and_refs() {
        let page = CatalogPage::parse(CATALOG_URL, SAMPLE).unwrap();

        assert_eq!(page.http_base.as_deref(), Some("/thredds/fileServer/"));
        assert_eq!(page.datasets.len(), 2);
        assert_eq!(page.datasets[0].name, "NorKyst-800m.2024010100.nc");
        assert_eq!(page.refs.len(), 1);
        assert_eq!(
            page.refs[0].url,
            "https://thredds.example.org/thredds/catalog/fou-hi/norkyst800m-1h/2019/catalog.xml"
        );
    }

    #[test]
    fn builds_download_urls_from_http_service() {
        let page = CatalogPage::parse(CATALOG_URL, SAMPLE).unwrap();
        let url = page.download_url(CATALOG_URL, &page.datasets[0]);
        assert_eq!(
            url,
            "https://thredds.example.org/thredds/fileServer/fou-hi/norkyst800m-1h/NorKyst-800m.2024010100.nc"
        );
    }

    #[test]
    fn absolute_and_rooted_hrefs_resolve() {
        assert_eq!(
            resolve_href(CATALOG_URL, "https://other.example.org/c.xml"),
            "https://other.example.org/c.xml"
        );
        assert_eq!(
            resolve_href(CATALOG_URL, "/thredds/catalog/other/catalog.xml"),
            "https://thredds.example.org/thredds/catalog/other/catalog.xml"
        );
    }

    #[test]
    fn rejects_non_catalog_documents() {
        let err = CatalogPage::parse(CATALOG_URL, "<html></html>").unwrap_err();
        assert!(matches!(err, CatalogError::InvalidCatalog { .. }));
    }
}
