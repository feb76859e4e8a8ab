//! KVWL physician search: a paginated search endpoint listing doctor ids,
//! plus one detail request per id.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{lenient_f64, lenient_string, post_json, FetchError, SourceAdapter, Throttle};
use crate::identity::IdentityResolver;
use crate::model::{DoctorFragment, FacilityFragment, FacilityType, Fragment};

pub const SOURCE: &str = "kvwl";

const UNKNOWN_PRACTICE: &str = "Unbekannte Praxis";
const UNKNOWN_DOCTOR: &str = "Unbekannt";

// ── Wire types ──

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchRequest {
    pub page_id: u32,
    pub page_size: usize,
    pub latitude: f64,
    pub longitude: f64,
    pub expertise_area_structure_id: String,
    pub doc_name_pattern: String,
    pub applicable_qualification_id: String,
    pub doc_gender: String,
    pub special_service_id: String,
    pub language_id: String,
    pub barrier_free_attribute_filter: IdFilter,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IdFilter {
    pub ids: Vec<String>,
}

impl SearchRequest {
    pub fn page(page_id: u32, page_size: usize, latitude: f64, longitude: f64) -> Self {
        SearchRequest {
            page_id,
            page_size,
            latitude,
            longitude,
            expertise_area_structure_id: String::new(),
            doc_name_pattern: String::new(),
            applicable_qualification_id: String::new(),
            doc_gender: String::new(),
            special_service_id: String::new(),
            language_id: String::new(),
            barrier_free_attribute_filter: IdFilter::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SearchResponse {
    pub doctor_abstracts: Option<DoctorAbstracts>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct DoctorAbstracts {
    pub doctor_abstract: Option<Vec<DoctorAbstract>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct DoctorAbstract {
    pub id: Option<Value>,
}

impl SearchResponse {
    pub fn into_abstracts(self) -> Vec<DoctorAbstract> {
        self.doctor_abstracts
            .and_then(|a| a.doctor_abstract)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
struct DetailRequest<'a> {
    #[serde(rename = "Id")]
    id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct DoctorDetail {
    pub id: Option<Value>,
    #[serde(deserialize_with = "lenient_string")]
    pub first_name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub last_name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub phone: Option<String>,
    pub practice: Option<Practice>,
    pub expertise_areas: Option<ExpertiseAreas>,
    pub barrier_free_attributes: Option<BarrierFreeAttributes>,
    pub location: Option<Location>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Practice {
    #[serde(rename = "practiceName", deserialize_with = "lenient_string")]
    pub practice_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ExpertiseAreas {
    pub expertise_area: Option<Vec<ExpertiseArea>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExpertiseArea {
    #[serde(deserialize_with = "lenient_string")]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct BarrierFreeAttributes {
    pub barrier_free_attribute: Option<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Location {
    #[serde(deserialize_with = "lenient_string")]
    pub street: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub postal_code: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub city: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub phone: Option<String>,
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Coordinates {
    #[serde(deserialize_with = "lenient_f64")]
    pub latitude: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub longitude: Option<f64>,
}

/// Render an id that may arrive as a string or a number.
fn id_string(value: Option<&Value>) -> Option<String> {
    let s = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn clean(s: Option<&String>) -> String {
    s.map(|s| s.trim().to_string()).unwrap_or_default()
}

// ── API seam ──

/// The two KVWL endpoints.
#[async_trait]
pub trait KvwlApi: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, FetchError>;
    async fn doctor(&self, id: &str) -> Result<DoctorDetail, FetchError>;
}

pub struct HttpKvwlApi {
    client: reqwest::Client,
    search_url: String,
    detail_url: String,
}

impl HttpKvwlApi {
    pub fn new(client: reqwest::Client, search_url: String, detail_url: String) -> Self {
        HttpKvwlApi {
            client,
            search_url,
            detail_url,
        }
    }
}

#[async_trait]
impl KvwlApi for HttpKvwlApi {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, FetchError> {
        post_json(&self.client, &self.search_url, request).await
    }

    async fn doctor(&self, id: &str) -> Result<DoctorDetail, FetchError> {
        post_json(&self.client, &self.detail_url, &DetailRequest { id }).await
    }
}

// ── Adapter ──

pub struct KvwlAdapter<A> {
    api: A,
    resolver: IdentityResolver,
    latitude: f64,
    longitude: f64,
    page_size: usize,
    /// Next page to request; `None` once a terminal page was seen.
    next_page: Option<u32>,
    pending: VecDeque<String>,
    throttle: Throttle,
}

impl<A: KvwlApi> KvwlAdapter<A> {
    pub fn new(api: A, latitude: f64, longitude: f64, page_size: usize, throttle: Throttle) -> Self {
        KvwlAdapter {
            api,
            resolver: IdentityResolver::new(SOURCE),
            latitude,
            longitude,
            page_size: page_size.max(1),
            next_page: Some(0),
            pending: VecDeque::new(),
            throttle,
        }
    }

    async fn fetch_page(&mut self, page: u32) -> Result<(), FetchError> {
        self.throttle.wait().await;
        let request = SearchRequest::page(page, self.page_size, self.latitude, self.longitude);
        let abstracts = self.api.search(&request).await?.into_abstracts();
        let count = abstracts.len();

        self.pending
            .extend(abstracts.iter().filter_map(|a| id_string(a.id.as_ref())));
        debug!(page, count, queued = self.pending.len(), "KVWL search page");

        self.next_page = if count < self.page_size {
            info!("KVWL search exhausted after page {}", page);
            None
        } else {
            Some(page + 1)
        };
        Ok(())
    }
}

#[async_trait]
impl<A: KvwlApi> SourceAdapter for KvwlAdapter<A> {
    fn source(&self) -> &str {
        SOURCE
    }

    async fn next_fragment(&mut self) -> Result<Option<Fragment>, FetchError> {
        loop {
            if let Some(id) = self.pending.pop_front() {
                self.throttle.wait().await;
                let detail = self.api.doctor(&id).await?;
                return Ok(Some(to_fragment(&self.resolver, &id, &detail)));
            }
            match self.next_page {
                Some(page) => self.fetch_page(page).await?,
                None => return Ok(None),
            }
        }
    }
}

/// Extraction layer: every absent field maps to its declared default here.
pub fn to_fragment(resolver: &IdentityResolver, requested_id: &str, detail: &DoctorDetail) -> Fragment {
    let location = detail.location.as_ref();
    let coords = location.and_then(|l| l.coordinates.as_ref());
    let latitude = coords.and_then(|c| c.latitude);
    let longitude = coords.and_then(|c| c.longitude);
    let street = clean(location.and_then(|l| l.street.as_ref()));
    let postal_code = clean(location.and_then(|l| l.postal_code.as_ref()));
    let city = clean(location.and_then(|l| l.city.as_ref()));

    let name = Some(clean(detail.practice.as_ref().and_then(|p| p.practice_name.as_ref())))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| UNKNOWN_PRACTICE.to_string());

    let phone = Some(clean(detail.phone.as_ref()))
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| clean(location.and_then(|l| l.phone.as_ref())));

    let wheelchair_accessible = detail
        .barrier_free_attributes
        .as_ref()
        .and_then(|b| b.barrier_free_attribute.as_ref())
        .filter(|attrs| !attrs.is_empty())
        .map(|_| true);

    let source_key =
        resolver.resolve_facility_key(&name, &street, &postal_code, &city, latitude, longitude);

    let facility = FacilityFragment {
        source: SOURCE.to_string(),
        source_key,
        name,
        facility_type: FacilityType::Arztpraxis,
        street,
        postal_code,
        city,
        phone,
        latitude,
        longitude,
        wheelchair_accessible,
    };

    let first_name = clean(detail.first_name.as_ref());
    let last_name = clean(detail.last_name.as_ref());
    let display = format!("{} {}", first_name, last_name).trim().to_string();

    let specialty = detail
        .expertise_areas
        .as_ref()
        .and_then(|e| e.expertise_area.as_ref())
        .and_then(|areas| {
            areas
                .iter()
                .map(|a| clean(a.name.as_ref()))
                .find(|s| !s.is_empty())
        });

    let doctor = DoctorFragment {
        source: SOURCE.to_string(),
        source_key: id_string(detail.id.as_ref()).unwrap_or_else(|| requested_id.to_string()),
        first_name,
        last_name,
        name: if display.is_empty() { UNKNOWN_DOCTOR.to_string() } else { display },
        specialty,
    };

    Fragment {
        facility,
        doctor: Some(doctor),
    }
}
