//! Gelsenkirchen "Gesundheitskarte": one HTML table whose rows carry a
//! `data-gemap-marker` attribute with coordinates and address.

use std::collections::VecDeque;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{get_text, lenient_f64, FetchError, SourceAdapter};
use crate::identity::IdentityResolver;
use crate::model::{FacilityFragment, FacilityType, Fragment};

pub const SOURCE: &str = "gelsenkirchen_gesundheitskarte";

static POSTAL_CITY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{5})\s+(.+)$").unwrap());
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\+?\d[\d\s()/.-]{6,}").unwrap());
static ROW_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr[data-gemap-marker]").unwrap());
static CELL_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Marker {
    #[serde(deserialize_with = "lenient_f64")]
    pub lat: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub lng: Option<f64>,
    pub address: Option<String>,
}

/// Decode the entities the CMS leaves in marker attributes.
fn decode_entities(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Parse the single-quoted, possibly entity-escaped marker blob.
pub fn parse_marker(raw: &str) -> Option<Marker> {
    let s = decode_entities(raw).trim().replace('\'', "\"");
    if s.is_empty() {
        return None;
    }
    match serde_json::from_str(&s) {
        Ok(marker) => Some(marker),
        Err(e) => {
            warn!(marker = %raw, "Unparseable map marker: {}", e);
            None
        }
    }
}

/// `"Bochumer Straße 242, 45886 Gelsenkirchen"` → (street, postal, city).
///
/// When the second segment is not "5-digit code + city", postal and city
/// are both empty; the street is kept.
pub fn split_address(addr: &str) -> (String, String, String) {
    let mut parts = addr.split(',').map(str::trim);
    let street = parts.next().unwrap_or_default().to_string();
    let postal_city = parts.next().unwrap_or_default();

    match POSTAL_CITY_RE.captures(postal_city) {
        Some(caps) => (street, caps[1].to_string(), caps[2].to_string()),
        None => {
            if !addr.trim().is_empty() {
                debug!(address = %addr, "Address without postal code and city");
            }
            (street, String::new(), String::new())
        }
    }
}

fn text_lines(cell: &ElementRef) -> Vec<String> {
    cell.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn find_phone(text: &str) -> String {
    PHONE_RE
        .find(text)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// Extract one fragment per marker row of the page.
pub fn parse_page(html: &str, resolver: &IdentityResolver) -> Vec<FacilityFragment> {
    let document = Html::parse_document(html);
    let mut facilities = Vec::new();

    for row in document.select(&ROW_SELECTOR) {
        let cells: Vec<ElementRef> = row.select(&CELL_SELECTOR).collect();
        if cells.len() < 2 {
            continue;
        }

        let marker = row
            .value()
            .attr("data-gemap-marker")
            .and_then(parse_marker)
            .unwrap_or_default();
        let (street, postal_code, city) = split_address(marker.address.as_deref().unwrap_or(""));

        let lines = text_lines(&cells[0]);
        let name = lines.first().cloned().unwrap_or_default();
        let phone = find_phone(&lines.join(" "));

        let label = text_lines(&cells[1]).join(" ");
        let facility_type = FacilityType::from_label(&label);

        let source_key = resolver.resolve_facility_key(
            &name,
            &street,
            &postal_code,
            &city,
            marker.lat,
            marker.lng,
        );

        facilities.push(FacilityFragment {
            source: SOURCE.to_string(),
            source_key,
            name,
            facility_type,
            street,
            postal_code,
            city,
            phone,
            latitude: marker.lat,
            longitude: marker.lng,
            wheelchair_accessible: None,
        });
    }

    facilities
}

pub struct GesundheitskarteAdapter {
    client: reqwest::Client,
    url: String,
    resolver: IdentityResolver,
    /// Filled by the single page fetch.
    pending: Option<VecDeque<FacilityFragment>>,
}

impl GesundheitskarteAdapter {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        GesundheitskarteAdapter {
            client,
            url,
            resolver: IdentityResolver::new(SOURCE).with_name_folding(),
            pending: None,
        }
    }
}

#[async_trait]
impl SourceAdapter for GesundheitskarteAdapter {
    fn source(&self) -> &str {
        SOURCE
    }

    async fn next_fragment(&mut self) -> Result<Option<Fragment>, FetchError> {
        if self.pending.is_none() {
            let html = get_text(&self.client, &self.url).await?;
            let rows = parse_page(&html, &self.resolver);
            info!("Gesundheitskarte: {} marker rows", rows.len());
            self.pending = Some(rows.into());
        }

        Ok(self
            .pending
            .as_mut()
            .and_then(VecDeque::pop_front)
            .map(|facility| Fragment {
                facility,
                doctor: None,
            }))
    }
}
