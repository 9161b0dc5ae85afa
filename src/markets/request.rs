//! Produces canonical upstream request URLs (§2's "Request Builder",
//! §6's wire contract).

use crate::credentials::{Credential, CredentialKind};
use crate::markets::params::MarketsParams;

const DEFAULT_PRIMARY_BASE: &str = "https://pro-api.coingecko.com";
const DEFAULT_PUBLIC_BASE: &str = "https://api.coingecko.com";

pub struct RequestBuilder {
    primary_base: String,
    public_base: String,
}

impl RequestBuilder {
    pub fn new(override_primary: Option<String>, override_public: Option<String>) -> Self {
        Self {
            primary_base: override_primary.unwrap_or_else(|| DEFAULT_PRIMARY_BASE.to_string()),
            public_base: override_public.unwrap_or_else(|| DEFAULT_PUBLIC_BASE.to_string()),
        }
    }

    fn base_for(&self, kind: CredentialKind) -> &str {
        match kind {
            CredentialKind::Primary => &self.primary_base,
            CredentialKind::Secondary | CredentialKind::Anonymous => &self.public_base,
        }
    }

    /// `GET /api/v3/coins/markets` with the credential query parameter
    /// chosen by kind; omitted entirely for Anonymous.
    pub fn markets_url(&self, params: &MarketsParams, credential: &Credential) -> reqwest::Url {
        let base = self.base_for(credential.kind);
        let mut url = reqwest::Url::parse(base)
            .expect("configured base URL must be valid")
            .join("/api/v3/coins/markets")
            .expect("path join cannot fail");

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("vs_currency", &params.vs_currency);
            query.append_pair("order", &params.order);
            query.append_pair("page", &params.page.to_string());
            query.append_pair("per_page", &params.per_page.to_string());
            if let Some(ref category) = params.category {
                query.append_pair("category", category);
            }
            if let Some(ref ids) = params.ids {
                query.append_pair("ids", &ids.join(","));
            }
            query.append_pair("sparkline", if params.sparkline { "true" } else { "false" });
            if let Some(ref pcp) = params.price_change_percentage {
                query.append_pair("price_change_percentage", pcp);
            }

            match credential.kind {
                CredentialKind::Primary => {
                    query.append_pair("x_cg_pro_api_key", &credential.value);
                }
                CredentialKind::Secondary => {
                    query.append_pair("x_cg_demo_api_key", &credential.value);
                }
                CredentialKind::Anonymous => {}
            }
        }

        url
    }

    /// `GET /api/v3/token_lists/{platform}/all.json`, consumed by the
    /// per-platform token-list collaborator (§2, out of core scope).
    pub fn token_list_url(&self, platform: &str, credential: &Credential) -> reqwest::Url {
        let base = self.base_for(credential.kind);
        let mut url = reqwest::Url::parse(base)
            .expect("configured base URL must be valid")
            .join(&format!("/api/v3/token_lists/{platform}/all.json"))
            .expect("path join cannot fail");

        match credential.kind {
            CredentialKind::Primary => {
                url.query_pairs_mut().append_pair("x_cg_pro_api_key", &credential.value);
            }
            CredentialKind::Secondary => {
                url.query_pairs_mut().append_pair("x_cg_demo_api_key", &credential.value);
            }
            CredentialKind::Anonymous => {}
        }

        url
    }
}
