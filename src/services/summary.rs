//! Dataset statistics for the end-of-run report

use crate::domain::business::BusinessRecord;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use tracing::info;

/// Number of cities listed in the summary
pub const TOP_CITIES: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    pub total: usize,
    pub rated: usize,
    pub avg_rating: Option<f64>,
    pub min_rating: Option<f64>,
    pub max_rating: Option<f64>,
    /// Most frequent cities, count descending then name ascending
    pub top_cities: Vec<(String, usize)>,
    /// Price tier ("$".."$$$$", "" for unknown) to count
    pub price_tiers: BTreeMap<String, usize>,
    pub categories: usize,
}

impl DatasetSummary {
    pub fn from_records(records: &[BusinessRecord]) -> Self {
        let ratings: Vec<f64> = records.iter().filter_map(|r| r.rating).collect();
        let avg_rating = if ratings.is_empty() {
            None
        } else {
            Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
        };
        let min_rating = ratings.iter().copied().reduce(f64::min);
        let max_rating = ratings.iter().copied().reduce(f64::max);

        let mut cities: FxHashMap<&str, usize> = FxHashMap::default();
        let mut price_tiers = BTreeMap::new();
        let mut categories: FxHashSet<&str> = FxHashSet::default();
        for record in records {
            if !record.city.is_empty() {
                *cities.entry(record.city.as_str()).or_default() += 1;
            }
            *price_tiers.entry(record.price.clone()).or_default() += 1;
            for category in record.category_list() {
                categories.insert(category);
            }
        }

        let mut top_cities: Vec<(String, usize)> =
            cities.into_iter().map(|(city, n)| (city.to_string(), n)).collect();
        top_cities.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_cities.truncate(TOP_CITIES);

        Self {
            total: records.len(),
            rated: ratings.len(),
            avg_rating,
            min_rating,
            max_rating,
            top_cities,
            price_tiers,
            categories: categories.len(),
        }
    }

    pub fn log(&self) {
        info!(
            total = %self.total,
            rated = %self.rated,
            avg_rating = ?self.avg_rating.map(|r| (r * 100.0).round() / 100.0),
            min_rating = ?self.min_rating,
            max_rating = ?self.max_rating,
            categories = %self.categories,
            "dataset_summary"
        );
        for (rank, (city, count)) in self.top_cities.iter().enumerate() {
            info!(rank = %(rank + 1), city = %city, count = %count, "dataset_top_city");
        }
        for (tier, count) in &self.price_tiers {
            let tier = if tier.is_empty() { "unknown" } else { tier.as_str() };
            info!(price = %tier, count = %count, "dataset_price_tier");
        }
    }
}
