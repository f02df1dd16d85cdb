//! Category and license lookups used to turn manifest names into API slugs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::job::{BatchManifest, JobTemplate};
use crate::models::license::License;
use crate::services::remote::{ApiToken, RemoteError, SketchfabClient};

/// Upper bound on followed `next` links per listing.
const MAX_PAGES: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseInfo {
    #[serde(rename = "fullName")]
    pub full_name: String,
    pub slug: String,
}

#[derive(Deserialize)]
struct Page<T> {
    results: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to fetch catalog: {0}")]
    Remote(#[from] RemoteError),

    #[error("Unknown {kind}: {value}")]
    Unknown { kind: &'static str, value: String },

    #[error("Between one and two categories are required, got {0}")]
    CategoryCount(usize),

    #[error("License {0} requires a price")]
    MissingPrice(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    pub categories: Vec<Category>,
    pub licenses: Vec<LicenseInfo>,
}

impl Catalog {
    pub fn new(categories: Vec<Category>, licenses: Vec<LicenseInfo>) -> Self {
        Self {
            categories,
            licenses,
        }
    }

    /// Category slug for a display name (case-insensitive) or a slug.
    pub fn resolve_category(&self, input: &str) -> Result<String, CatalogError> {
        let input = input.trim();
        self.categories
            .iter()
            .find(|c| c.slug == input || c.name.eq_ignore_ascii_case(input))
            .map(|c| c.slug.clone())
            .ok_or_else(|| CatalogError::Unknown {
                kind: "category",
                value: input.to_string(),
            })
    }

    /// License for a full name (case-insensitive) or a slug.
    pub fn resolve_license(&self, input: &str) -> Result<License, CatalogError> {
        let input = input.trim();
        self.licenses
            .iter()
            .find(|l| l.slug == input || l.full_name.eq_ignore_ascii_case(input))
            .map(|l| License::from(l.slug.clone()))
            .ok_or_else(|| CatalogError::Unknown {
                kind: "license",
                value: input.to_string(),
            })
    }

    /// Resolve a manifest into the template shared by all jobs of the batch.
    pub fn template_from(&self, manifest: &BatchManifest) -> Result<JobTemplate, CatalogError> {
        let categories = manifest
            .categories
            .iter()
            .filter(|c| !c.trim().is_empty())
            .map(|c| self.resolve_category(c))
            .collect::<Result<Vec<_>, _>>()?;
        if categories.is_empty() || categories.len() > 2 {
            return Err(CatalogError::CategoryCount(categories.len()));
        }

        let license = self.resolve_license(&manifest.license)?;
        let price = manifest
            .price
            .clone()
            .filter(|p| !p.trim().is_empty());
        if license.is_priced() && price.is_none() {
            return Err(CatalogError::MissingPrice(license.slug().to_string()));
        }

        Ok(JobTemplate {
            description: manifest.description.clone(),
            tags: manifest.tags.clone(),
            categories,
            license,
            visibility: manifest.visibility(),
            password: manifest.password.clone(),
            price,
        })
    }
}

/// Fetch all categories and licenses.
pub async fn fetch_catalog(
    client: &SketchfabClient,
    token: &ApiToken,
) -> Result<Catalog, CatalogError> {
    let categories: Vec<Category> = fetch_all(client, token, "categories").await?;
    let licenses: Vec<LicenseInfo> = fetch_all(client, token, "licenses").await?;
    tracing::info!(
        categories = categories.len(),
        licenses = licenses.len(),
        "Fetched Sketchfab catalog"
    );
    Ok(Catalog::new(categories, licenses))
}

async fn fetch_all<T: DeserializeOwned>(
    client: &SketchfabClient,
    token: &ApiToken,
    path: &str,
) -> Result<Vec<T>, RemoteError> {
    let mut items = Vec::new();
    let mut next = Some(client.endpoint(path));
    let mut pages = 0;

    while let Some(url) = next.take() {
        let page: Page<T> = client.get_json(token, &url).await?;
        items.extend(page.results);
        pages += 1;
        if pages >= MAX_PAGES {
            tracing::warn!(path, pages, "Stopped following catalog pages");
            break;
        }
        next = page.next.filter(|n| !n.is_empty());
    }
    Ok(items)
}
