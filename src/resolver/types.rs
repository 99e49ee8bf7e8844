//! SerpAPI response types (only the fields the resolver reads)

use serde::Deserialize;

/// Top-level search response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub organic_results: Vec<OrganicResult>,
    /// Set by the service instead of results when a search fails
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub search_metadata: Option<SearchMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrganicResult {
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchMetadata {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}
