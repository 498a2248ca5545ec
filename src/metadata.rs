//! Run metadata.
//!
//! `Metadata` carries the descriptive context of one sweep. The text format
//! only has room for the banner, project and condition lines of its preamble;
//! the remaining fields travel with the CSV export, where the whole struct is
//! embedded as `# `-prefixed JSON.
//!
//! Defaults reproduce the placeholder preamble operators are used to seeing
//! in files that were never annotated.

use crate::config::MetadataConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// First preamble line of every data file
pub const DEFAULT_BANNER: &str = "Laptop Compatible \"Mobile\" Version of QKeithleyControlMaster";
/// Placeholder for `*! Project = ...`
pub const DEFAULT_PROJECT: &str = "Fill project details here";
/// Placeholder for `#! Fluence / Dose / Condition = ...`
pub const DEFAULT_CONDITION: &str = "Fill measurement details here";

/// Descriptive context for one sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    /// `*! <banner>`
    pub banner: String,
    /// `*! Project = <project>`
    pub project: String,
    /// `#! Fluence / Dose / Condition = <condition>`
    pub condition: String,
    /// Unique id of the run
    pub run_id: Uuid,
    /// Free-text notes from the operator.
    pub operator_notes: String,
    /// When the metadata was created.
    pub created_at: DateTime<Utc>,
    /// Version of the acquisition software.
    pub software_version: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            banner: DEFAULT_BANNER.to_string(),
            project: DEFAULT_PROJECT.to_string(),
            condition: DEFAULT_CONDITION.to_string(),
            run_id: Uuid::new_v4(),
            operator_notes: String::new(),
            created_at: Utc::now(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Metadata {
    /// Defaults overlaid with whatever the configuration provides
    pub fn from_config(config: &MetadataConfig) -> Self {
        let mut builder = MetadataBuilder::new();
        if let Some(project) = &config.project {
            builder = builder.project(project);
        }
        if let Some(condition) = &config.condition {
            builder = builder.condition(condition);
        }
        builder.build()
    }
}

/// A builder for constructing `Metadata` instances.
#[derive(Default)]
pub struct MetadataBuilder {
    inner: Metadata,
}

impl MetadataBuilder {
    /// Builder starting from the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Banner line
    pub fn banner(mut self, banner: &str) -> Self {
        self.inner.banner = banner.to_string();
        self
    }

    /// Project line
    pub fn project(mut self, project: &str) -> Self {
        self.inner.project = project.to_string();
        self
    }

    /// Condition line
    pub fn condition(mut self, condition: &str) -> Self {
        self.inner.condition = condition.to_string();
        self
    }

    /// Free-text notes
    pub fn operator_notes(mut self, notes: &str) -> Self {
        self.inner.operator_notes = notes.to_string();
        self
    }

    /// Finished metadata
    pub fn build(self) -> Metadata {
        self.inner
    }
}
