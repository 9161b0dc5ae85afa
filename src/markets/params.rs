//! Canonical request descriptor and the normalizer that rewrites
//! client-supplied fields into the configured canonical form (§3, §6,
//! Glossary: "Param normalization").

use crate::config::ParamNormalizeConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct MarketsParams {
    pub vs_currency: String,
    pub order: String,
    pub page: u32,
    pub per_page: u32,
    pub category: Option<String>,
    pub ids: Option<Vec<String>>,
    pub sparkline: bool,
    pub price_change_percentage: Option<String>,
}

impl Default for MarketsParams {
    fn default() -> Self {
        Self {
            vs_currency: "usd".to_string(),
            order: "market_cap_desc".to_string(),
            page: 1,
            per_page: 100,
            category: None,
            ids: None,
            sparkline: false,
            price_change_percentage: None,
        }
    }
}

/// Rewrites selected fields to the canonical value from config so that
/// semantically equivalent client requests end up sharing cache keys.
/// `ids`/`page` are left alone — normalization only touches the fields
/// that affect which canonical page range a request maps onto.
pub struct ParamNormalizer {
    config: ParamNormalizeConfig,
}

impl ParamNormalizer {
    pub fn new(config: ParamNormalizeConfig) -> Self {
        Self { config }
    }

    pub fn normalize(&self, params: &MarketsParams) -> MarketsParams {
        let mut out = params.clone();

        if let Some(ref currency) = self.config.currency {
            out.vs_currency = currency.clone();
        }
        if let Some(ref order) = self.config.order {
            out.order = order.clone();
        }
        if let Some(per_page) = self.config.per_page {
            out.per_page = per_page;
        }
        if let Some(sparkline) = self.config.sparkline {
            out.sparkline = sparkline;
        }
        if let Some(ref pcp) = self.config.price_change_percentage {
            out.price_change_percentage = Some(pcp.clone());
        }
        if let Some(ref category) = self.config.category {
            out.category = Some(category.clone());
        }

        out
    }

    /// The canonical `per_page` used to derive page counts for
    /// `TopMarkets`, falling back to the request's own value.
    pub fn canonical_per_page(&self, params: &MarketsParams) -> u32 {
        self.config.per_page.unwrap_or(params.per_page).max(1)
    }
}
