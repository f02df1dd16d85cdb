use std::path::{Path, PathBuf};
use std::sync::Arc;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::license::License;

/// Longest model name the API accepts.
pub const MAX_NAME_CHARS: usize = 48;

/// Truncate a model name to [`MAX_NAME_CHARS`] characters.
pub fn truncate_name(name: &str) -> String {
    name.chars().take(MAX_NAME_CHARS).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visibility {
    pub private: bool,
    pub published: bool,
    pub inspectable: bool,
}

impl Default for Visibility {
    fn default() -> Self {
        Self {
            private: false,
            published: false,
            inspectable: true,
        }
    }
}

/// Form values shared by every folder of a batch, with category and license
/// already resolved to slugs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTemplate {
    pub description: String,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub license: License,
    pub visibility: Visibility,
    pub password: Option<String>,
    pub price: Option<String>,
}

/// One model upload, fixed at submission time.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct JobDescriptor {
    #[garde(skip)]
    pub folder: PathBuf,

    #[garde(length(chars, min = 1, max = 48))]
    pub name: String,

    #[garde(skip)]
    pub description: String,

    #[garde(skip)]
    pub tags: Vec<String>,

    #[garde(length(min = 1, max = 2))]
    pub categories: Vec<String>,

    #[garde(skip)]
    pub license: License,

    #[garde(skip)]
    pub visibility: Visibility,

    /// Only kept when the model is private.
    #[garde(skip)]
    pub password: Option<String>,

    /// Raw price text as entered.
    #[garde(skip)]
    pub price: Option<String>,
}

impl JobDescriptor {
    pub fn new(folder: impl Into<PathBuf>, template: &JobTemplate) -> Self {
        let folder = folder.into();
        let name = truncate_name(&folder_display_name(&folder));
        let password = if template.visibility.private {
            template.password.clone().filter(|p| !p.is_empty())
        } else {
            None
        };
        let price = template
            .price
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        Self {
            folder,
            name,
            description: template.description.trim().to_string(),
            tags: template
                .tags
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            categories: template.categories.clone(),
            license: template.license.clone(),
            visibility: template.visibility,
            password,
            price,
        }
    }
}

fn folder_display_name(folder: &Path) -> String {
    folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| folder.to_string_lossy().into_owned())
}

/// An ordered set of jobs sharing one status table.
#[derive(Debug, Clone)]
pub struct Batch {
    pub name: Arc<str>,
    pub jobs: Vec<JobDescriptor>,
}

impl Batch {
    pub fn new(name: impl Into<Arc<str>>, jobs: Vec<JobDescriptor>) -> Self {
        Self {
            name: name.into(),
            jobs,
        }
    }

    pub fn from_folders<I, P>(name: impl Into<Arc<str>>, folders: I, template: &JobTemplate) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let jobs = folders
            .into_iter()
            .map(|folder| JobDescriptor::new(folder, template))
            .collect();
        Self::new(name, jobs)
    }

    /// Status table title, e.g. `"chairs - 12 Models"`.
    pub fn title(&self) -> String {
        format!("{} - {} Models", self.name, self.jobs.len())
    }
}

/// Batch manifest as written by hand; category and license may be given by
/// display name or slug.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchManifest {
    #[serde(default)]
    pub name: Option<String>,

    /// Directories searched recursively for model folders.
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    /// Model folders uploaded as-is.
    #[serde(default)]
    pub folders: Vec<PathBuf>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    pub categories: Vec<String>,

    pub license: String,

    #[serde(default)]
    pub private: bool,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub published: bool,

    #[serde(default = "default_inspectable")]
    pub inspectable: bool,

    #[serde(default)]
    pub price: Option<String>,
}

fn default_inspectable() -> bool {
    true
}

impl BatchManifest {
    pub fn visibility(&self) -> Visibility {
        Visibility {
            private: self.private,
            published: self.published,
            inspectable: self.inspectable,
        }
    }

    /// Batch label built from the root (or folder) names.
    pub fn label(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        let sources = if self.roots.is_empty() {
            &self.folders
        } else {
            &self.roots
        };
        let names: Vec<String> = sources.iter().map(|p| folder_display_name(p)).collect();
        if names.is_empty() {
            "batch".to_string()
        } else {
            names.join("; ")
        }
    }
}
