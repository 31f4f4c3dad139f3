//! Listings API client (AppSync GraphQL `searchJobCardsByLocation`).

use std::fmt;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, ORIGIN, REFERER};
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use crate::config::ListingsConfig;
use crate::credential::Credential;
use crate::error::{Result, WatchError};
use crate::extractor::CredentialVerifier;

pub const OPERATION_NAME: &str = "searchJobCardsByLocation";

const SEARCH_QUERY: &str = "query searchJobCardsByLocation($searchJobRequest: SearchJobRequest!) {
  searchJobCardsByLocation(searchJobRequest: $searchJobRequest) {
    nextToken
    jobCards {
      jobId jobTitle city state locationName
      totalPayRateMin totalPayRateMax currencyCode
      scheduleCount employmentType jobType distance
    }
  }
}";

/// One posting as returned by the listings API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
	#[serde(rename = "jobId")]
	pub id: String,
	#[serde(rename = "jobTitle", default)]
	pub title: String,
	#[serde(default)]
	pub city: Option<String>,
	#[serde(default)]
	pub state: Option<String>,
	#[serde(default)]
	pub location_name: Option<String>,
	#[serde(rename = "totalPayRateMin", default, deserialize_with = "lenient_number")]
	pub pay_min: Option<f64>,
	#[serde(rename = "totalPayRateMax", default, deserialize_with = "lenient_number")]
	pub pay_max: Option<f64>,
	#[serde(rename = "currencyCode", default)]
	pub currency: Option<String>,
	#[serde(default, deserialize_with = "lenient_number")]
	pub schedule_count: Option<f64>,
	#[serde(default)]
	pub employment_type: Option<String>,
	#[serde(default)]
	pub job_type: Option<String>,
	#[serde(default, deserialize_with = "lenient_text")]
	pub distance: Option<String>,
}

impl Listing {
	/// Minimal listing, mostly for tests and fixtures.
	pub fn with_id(id: impl Into<String>, title: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			title: title.into(),
			city: None,
			state: None,
			location_name: None,
			pay_min: None,
			pay_max: None,
			currency: None,
			schedule_count: None,
			employment_type: None,
			job_type: None,
			distance: None,
		}
	}

	/// `"City, ST"`, falling back to the site name.
	pub fn location(&self) -> Option<String> {
		match (non_empty(&self.city), non_empty(&self.state)) {
			(Some(city), Some(state)) => Some(format!("{}, {}", city, state)),
			(Some(city), None) => Some(city.to_string()),
			(None, Some(state)) => Some(state.to_string()),
			(None, None) => non_empty(&self.location_name).map(str::to_string),
		}
	}

	/// Pay range such as `"USD 18.50 - 21.00"`; a single figure when both ends match.
	pub fn pay_range(&self) -> Option<String> {
		let currency = non_empty(&self.currency).map(|c| format!("{} ", c)).unwrap_or_default();
		match (self.pay_min, self.pay_max) {
			(Some(min), Some(max)) if (max - min).abs() > f64::EPSILON => Some(format!("{}{:.2} - {:.2}", currency, min, max)),
			(Some(pay), _) | (None, Some(pay)) => Some(format!("{}{:.2}", currency, pay)),
			(None, None) => None,
		}
	}
}

fn non_empty(value: &Option<String>) -> Option<&str> {
	value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Numbers sometimes arrive as strings.
fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<f64>, D::Error> {
	Ok(match Option::<Value>::deserialize(deserializer)? {
		Some(Value::Number(n)) => n.as_f64(),
		Some(Value::String(s)) => s.trim().parse().ok(),
		_ => None,
	})
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
	Ok(match Option::<Value>::deserialize(deserializer)? {
		Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
		Some(Value::Number(n)) => Some(n.to_string()),
		_ => None,
	})
}

/// Authenticated client for the listings endpoint.
#[derive(Clone)]
pub struct ListingsClient {
	http: reqwest::Client,
	config: ListingsConfig,
}

impl fmt::Debug for ListingsClient {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ListingsClient").field("endpoint", &self.config.endpoint).finish()
	}
}

impl ListingsClient {
	pub fn new(config: ListingsConfig) -> Result<Self> {
		let http = reqwest::Client::builder().timeout(config.request_timeout).build()?;
		Ok(Self { http, config })
	}

	pub fn config(&self) -> &ListingsConfig {
		&self.config
	}

	/// First page of listings matching the configured filters.
	pub async fn fetch(&self, credential: &Credential) -> Result<Vec<Listing>> {
		self.fetch_page(credential, self.config.page_size).await
	}

	async fn fetch_page(&self, credential: &Credential, page_size: u32) -> Result<Vec<Listing>> {
		let body = self.request_body(page_size, Utc::now().date_naive());
		let mut request = self
			.http
			.post(&self.config.endpoint)
			.header(AUTHORIZATION, format!("Bearer {}", credential.bearer()))
			.json(&body);
		if let Some(origin) = &self.config.origin {
			request = request.header(ORIGIN, origin).header(REFERER, format!("{}/", origin.trim_end_matches('/')));
		}

		let response = request.send().await.map_err(|e| WatchError::ApiTransient(e.to_string()))?;
		let status = response.status();
		if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
			return Err(WatchError::ApiRejected { status: status.as_u16() });
		}
		if !status.is_success() {
			return Err(WatchError::ApiTransient(format!("listings API returned {}", status)));
		}

		let text = response.text().await.map_err(|e| WatchError::ApiTransient(e.to_string()))?;
		let listings = parse_response(status, &text)?;
		debug!(target = "jobwatch.poll", count = listings.len(), page_size, "listings fetched");
		Ok(listings)
	}

	/// GraphQL request body for `page_size` results, with the date window starting at `today`.
	pub fn request_body(&self, page_size: u32, today: NaiveDate) -> Value {
		let config = &self.config;
		let until = today.checked_add_days(Days::new(config.date_window_days.into())).unwrap_or(today);

		let mut search = json!({
			"locale": config.locale,
			"country": config.country,
			"pageSize": page_size,
			"dateFilters": [{
				"key": "firstDayOnSite",
				"range": {
					"startDate": today.format("%Y-%m-%d").to_string(),
					"endDate": until.format("%Y-%m-%d").to_string(),
				}
			}],
			"sorters": [{ "fieldName": "totalPayRateMax", "ascending": "false" }],
			"consolidateSchedule": true,
		});

		if let Some((minimum, maximum)) = config.hours_per_week {
			search["rangeFilters"] = json!([{
				"key": "hoursPerWeek",
				"range": { "minimum": minimum, "maximum": maximum }
			}]);
		}
		if let Some(geo) = config.geo {
			search["geoQueryClause"] = json!({
				"lat": geo.lat,
				"lng": geo.lng,
				"unit": "mi",
				"distance": geo.distance,
			});
		}

		json!({
			"operationName": OPERATION_NAME,
			"variables": { "searchJobRequest": search },
			"query": SEARCH_QUERY,
		})
	}

	/// Posting URL for a listing id.
	pub fn job_url(&self, listing: &Listing) -> String {
		format!("{}{}", self.config.job_url_base, listing.id)
	}
}

#[async_trait]
impl CredentialVerifier for ListingsClient {
	async fn verify(&self, credential: &Credential) -> Result<()> {
		let listings = self.fetch_page(credential, 1).await?;
		trace!(target = "jobwatch.token", returned = listings.len(), "credential verified against listings API");
		Ok(())
	}
}

#[derive(Deserialize)]
struct GraphQlResponse {
	#[serde(default)]
	data: Option<Value>,
	#[serde(default)]
	errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlError {
	#[serde(default)]
	message: String,
	#[serde(default)]
	error_type: Option<String>,
}

impl GraphQlError {
	fn is_unauthorized(&self) -> bool {
		let kind = self.error_type.as_deref().unwrap_or_default();
		kind.contains("Unauthorized") || self.message.contains("Unauthorized") || self.message.contains("Not Authorized")
	}
}

fn parse_response(status: StatusCode, text: &str) -> Result<Vec<Listing>> {
	let response: GraphQlResponse = serde_json::from_str(text).map_err(|e| WatchError::ApiTransient(format!("malformed listings response: {}", e)))?;

	if response.errors.iter().any(GraphQlError::is_unauthorized) {
		return Err(WatchError::ApiRejected { status: status.as_u16() });
	}
	if let Some(first) = response.errors.first() {
		return Err(WatchError::ApiTransient(format!("graphql error: {}", first.message)));
	}

	let cards = response
		.data
		.as_ref()
		.and_then(|data| data.get(OPERATION_NAME))
		.and_then(|result| result.get("jobCards"))
		.ok_or_else(|| WatchError::ApiTransient("listings response has no jobCards".into()))?;

	let cards = match cards {
		Value::Null => return Ok(Vec::new()),
		Value::Array(cards) => cards,
		other => return Err(WatchError::ApiTransient(format!("jobCards is not a list: {}", other))),
	};

	// One malformed card must not hide the rest of the page.
	let mut listings = Vec::with_capacity(cards.len());
	for (index, card) in cards.iter().enumerate() {
		match Listing::deserialize(card) {
			Ok(listing) => listings.push(listing),
			Err(e) => warn!(target = "jobwatch.poll", index, error = %e, "skipping malformed job card"),
		}
	}
	Ok(listings)
}
