//! Business payloads from the places provider and the flattened dataset row
//!
//! Provider payloads keep every field they were sent with (`extra`) so the
//! recovery snapshots hold the raw objects, not just the columns we keep.

use super::types::CellId;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Separator for the flattened category list
pub const CATEGORY_SEPARATOR: &str = "; ";

/// One page of search results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub businesses: Vec<BusinessSummary>,
    /// Provider-reported total for the query, capped by the provider
    #[serde(default)]
    pub total: Option<u64>,
}

impl SearchPage {
    pub fn len(&self) -> usize {
        self.businesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.businesses.is_empty()
    }
}

/// Search hit; only the identity is relied upon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub display_address: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

/// Full business detail as returned by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessDetails {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub review_count: Option<u32>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub coordinates: GeoPoint,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One row of the master dataset
///
/// Numeric columns read leniently: datasets written by other tools carry
/// counts as `12.0` and blanks as `nan`, both of which must still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRecord {
    /// Cell that first sighted the business
    pub cell_id: String,
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub rating: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_count")]
    pub review_count: Option<u32>,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub categories: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub zip_code: String,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub url: String,
}

impl BusinessRecord {
    pub fn from_details(cell: CellId, details: &BusinessDetails) -> Self {
        let categories = details
            .categories
            .iter()
            .map(|c| c.title.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(CATEGORY_SEPARATOR);

        Self {
            cell_id: cell.to_string(),
            id: details.id.clone(),
            name: details.name.clone(),
            rating: details.rating,
            review_count: details.review_count,
            price: details.price.clone().unwrap_or_default(),
            categories,
            address: details.location.display_address.join(", "),
            city: details.location.city.clone().unwrap_or_default(),
            state: details.location.state.clone().unwrap_or_default(),
            zip_code: details.location.zip_code.clone().unwrap_or_default(),
            latitude: details.coordinates.latitude,
            longitude: details.coordinates.longitude,
            phone: details.phone.clone().unwrap_or_default(),
            url: details.url.clone().unwrap_or_default(),
        }
    }

    pub fn category_list(&self) -> Vec<&str> {
        self.categories
            .split(CATEGORY_SEPARATOR)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect()
    }
}

/// Finite float, or `None` for blanks, `nan` and anything unparseable
fn parse_lenient_f64(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn de_lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.as_deref().and_then(parse_lenient_f64))
}

fn de_lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    let Some(raw) = raw.as_deref().map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    if let Ok(count) = raw.parse::<u32>() {
        return Ok(Some(count));
    }
    Ok(parse_lenient_f64(raw)
        .filter(|v| *v >= 0.0 && v.fract() == 0.0 && *v <= u32::MAX as f64)
        .map(|v| v as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL_JSON: &str = r#"{
        "id": "WavvLdfdP6g8aZTtbBQHTw",
        "alias": "faidleys-seafood-baltimore",
        "name": "Faidley's Seafood",
        "url": "https://www.yelp.com/biz/faidleys-seafood-baltimore",
        "phone": "+14107274898",
        "rating": 4.5,
        "review_count": 1721,
        "price": "$$",
        "categories": [
            {"alias": "seafood", "title": "Seafood"},
            {"alias": "seafoodmarkets", "title": "Seafood Markets"}
        ],
        "location": {
            "address1": "203 N Paca St",
            "city": "Baltimore",
            "state": "MD",
            "zip_code": "21201",
            "display_address": ["203 N Paca St", "Baltimore, MD 21201"]
        },
        "coordinates": {"latitude": 39.2914, "longitude": -76.6217},
        "transactions": ["pickup"]
    }"#;

    #[test]
    fn test_parse_details_keeps_unknown_fields() {
        let details: BusinessDetails = serde_json::from_str(DETAIL_JSON).unwrap();
        assert_eq!(details.name, "Faidley's Seafood");
        assert_eq!(details.extra["alias"], "faidleys-seafood-baltimore");
        assert_eq!(details.location.extra["address1"], "203 N Paca St");

        let raw = serde_json::to_value(&details).unwrap();
        assert_eq!(raw["transactions"][0], "pickup");
        assert_eq!(raw["location"]["address1"], "203 N Paca St");
    }

    #[test]
    fn test_record_from_details() {
        let details: BusinessDetails = serde_json::from_str(DETAIL_JSON).unwrap();
        let record = BusinessRecord::from_details(CellId::new(8, 6), &details);

        assert_eq!(record.cell_id, "8_6");
        assert_eq!(record.id, "WavvLdfdP6g8aZTtbBQHTw");
        assert_eq!(record.categories, "Seafood; Seafood Markets");
        assert_eq!(record.category_list(), vec!["Seafood", "Seafood Markets"]);
        assert_eq!(record.address, "203 N Paca St, Baltimore, MD 21201");
        assert_eq!(record.city, "Baltimore");
        assert_eq!(record.price, "$$");
        assert_eq!(record.latitude, Some(39.2914));
    }

    #[test]
    fn test_record_from_sparse_details() {
        let details: BusinessDetails =
            serde_json::from_str(r#"{"id": "x1", "name": "Corner Deli"}"#).unwrap();
        let record = BusinessRecord::from_details(CellId::new(0, 0), &details);

        assert_eq!(record.price, "");
        assert_eq!(record.categories, "");
        assert!(record.category_list().is_empty());
        assert_eq!(record.rating, None);
        assert_eq!(record.latitude, None);
    }

    #[test]
    fn test_search_page_tolerates_missing_fields() {
        let page: SearchPage =
            serde_json::from_str(r#"{"businesses": [{"id": "a"}, {"id": "b", "name": "B"}]}"#)
                .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page.total, None);
        assert_eq!(page.businesses[1].name.as_deref(), Some("B"));
    }

    #[test]
    fn test_record_numeric_columns_are_lenient() {
        let csv_text = "cell_id,id,name,rating,review_count,price,categories,address,city,state,zip_code,latitude,longitude,phone,url\n\
                        0_0,a,A,4.5,12.0,$,,,,,,39.3,-76.6,,\n\
                        0_0,b,B,nan,,,,,,,,not-a-number,,,\n\
                        0_0,c,C,,7,,,,,,,,,,\n";
        let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
        let records: Vec<BusinessRecord> = reader.deserialize().map(|r| r.unwrap()).collect();

        assert_eq!(records[0].review_count, Some(12));
        assert_eq!(records[0].rating, Some(4.5));
        assert_eq!(records[0].longitude, Some(-76.6));
        assert_eq!(records[1].rating, None);
        assert_eq!(records[1].review_count, None);
        assert_eq!(records[1].latitude, None);
        assert_eq!(records[2].review_count, Some(7));
    }
}
