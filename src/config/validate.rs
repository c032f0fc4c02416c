//! Cross-reference and field validation for a loaded [`Config`].
//!
//! Every violation is collected before returning so the operator can fix the
//! whole file in one go.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;

use thiserror::Error;
use url::Url;

use super::{Config, Destination, StorageProvider};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigViolation {
    #[error("job {job:?} requires an output dir/name")]
    MissingOutput { job: String },

    #[error("job {job:?} requires at least one database or directory")]
    NoSources { job: String },

    #[error("job {job:?} requires at least one destination")]
    NoDestinations { job: String },

    #[error("job {job:?} references unknown database {name:?}")]
    UnknownDatabase { job: String, name: String },

    #[error("job {job:?} references unknown directory {name:?}")]
    UnknownDirectory { job: String, name: String },

    #[error("job {job:?} references unknown destination {name:?}")]
    UnknownDestination { job: String, name: String },

    #[error("job {job:?} lists {kind} {name:?} more than once")]
    DuplicateReference {
        job: String,
        kind: &'static str,
        name: String,
    },

    #[error("database {name:?}: {reason}")]
    InvalidDatabase { name: String, reason: String },

    #[error("directory {name:?}: {reason}")]
    InvalidDirectory { name: String, reason: String },

    #[error("destination {name:?}: {reason}")]
    InvalidDestination { name: String, reason: String },
}

/// Non-empty list of violations, rendered one per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ConfigViolation>);

impl ValidationErrors {
    #[cfg(test)]
    pub fn violations(&self) -> &[ConfigViolation] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {violation}")?;
        }
        Ok(())
    }
}

/// A configuration whose jobs only reference things that exist.
#[derive(Debug, Clone)]
pub struct ValidatedConfig(Config);

impl Deref for ValidatedConfig {
    type Target = Config;

    fn deref(&self) -> &Config {
        &self.0
    }
}

impl Config {
    pub fn validate(self) -> Result<ValidatedConfig, ValidationErrors> {
        let mut violations = Vec::new();
        self.check_sources(&mut violations);
        self.check_destinations(&mut violations);
        self.check_references(&mut violations);

        if violations.is_empty() {
            Ok(ValidatedConfig(self))
        } else {
            Err(ValidationErrors(violations))
        }
    }

    fn check_references(&self, out: &mut Vec<ConfigViolation>) {
        for (job_name, job) in &self.jobs {
            if job.output.dir.as_os_str().is_empty() || job.output.name.trim().is_empty() {
                out.push(ConfigViolation::MissingOutput { job: job_name.clone() });
            }
            if job.databases.is_empty() && job.directories.is_empty() {
                out.push(ConfigViolation::NoSources { job: job_name.clone() });
            }
            if job.destinations.is_empty() {
                out.push(ConfigViolation::NoDestinations { job: job_name.clone() });
            }

            for (kind, names) in [
                ("database", &job.databases),
                ("directory", &job.directories),
                ("destination", &job.destinations),
            ] {
                for name in repeated(names) {
                    out.push(ConfigViolation::DuplicateReference {
                        job: job_name.clone(),
                        kind,
                        name: name.to_string(),
                    });
                }
            }

            for name in &job.databases {
                if !self.sources.databases.contains_key(name) {
                    out.push(ConfigViolation::UnknownDatabase {
                        job: job_name.clone(),
                        name: name.clone(),
                    });
                }
            }
            for name in &job.directories {
                if !self.sources.directories.contains_key(name) {
                    out.push(ConfigViolation::UnknownDirectory {
                        job: job_name.clone(),
                        name: name.clone(),
                    });
                }
            }
            for name in &job.destinations {
                if !self.destinations.contains_key(name) {
                    out.push(ConfigViolation::UnknownDestination {
                        job: job_name.clone(),
                        name: name.clone(),
                    });
                }
            }
        }
    }

    fn check_sources(&self, out: &mut Vec<ConfigViolation>) {
        for (name, db) in &self.sources.databases {
            let mut invalid = |reason: &str| {
                out.push(ConfigViolation::InvalidDatabase {
                    name: name.clone(),
                    reason: reason.to_string(),
                })
            };
            if db.host.trim().is_empty() {
                invalid("host is required");
            }
            if db.port == 0 {
                invalid("port must be non-zero");
            }
            if db.user.trim().is_empty() {
                invalid("user is required");
            }
            if db.database_name.trim().is_empty() {
                invalid("name is required");
            }
        }

        for (name, dir) in &self.sources.directories {
            let reason = if dir.path.as_os_str().is_empty() {
                Some("path is required".to_string())
            } else if !dir.path.exists() {
                Some(format!("{} not found", dir.path.display()))
            } else if !dir.path.is_dir() {
                Some(format!("{} is not a directory", dir.path.display()))
            } else {
                None
            };
            if let Some(reason) = reason {
                out.push(ConfigViolation::InvalidDirectory {
                    name: name.clone(),
                    reason,
                });
            }
        }
    }

    fn check_destinations(&self, out: &mut Vec<ConfigViolation>) {
        for (name, dest) in &self.destinations {
            for reason in destination_problems(dest) {
                out.push(ConfigViolation::InvalidDestination {
                    name: name.clone(),
                    reason,
                });
            }
        }
    }
}

/// Names that occur more than once, each reported once, in first-seen order.
fn repeated(names: &[String]) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    let mut reported = BTreeSet::new();
    names
        .iter()
        .map(String::as_str)
        .filter(|name| !seen.insert(*name) && reported.insert(*name))
        .collect()
}

fn destination_problems(dest: &Destination) -> Vec<String> {
    let mut problems = Vec::new();
    if dest.bucket_name.trim().is_empty() {
        problems.push("bucketName is required".to_string());
    }
    if dest.access_key_id.trim().is_empty() {
        problems.push("accessKeyId is required".to_string());
    }
    if dest.secret_access_key.is_empty() {
        problems.push("secretAccessKey is required".to_string());
    }

    let region_missing = dest.region.as_deref().is_none_or(|r| r.trim().is_empty());
    let endpoint = dest.endpoint_url.as_deref().filter(|e| !e.trim().is_empty());
    match dest.provider {
        StorageProvider::S3 if region_missing => {
            problems.push("region is required for provider s3".to_string());
        }
        StorageProvider::Minio if endpoint.is_none() => {
            problems.push("endpointUrl is required for provider minio".to_string());
        }
        _ => {}
    }

    if let Some(endpoint) = endpoint {
        match Url::parse(endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {}
            Ok(_) => problems.push(format!("endpointUrl {endpoint:?} must be an http(s) URL")),
            Err(e) => problems.push(format!("endpointUrl {endpoint:?} is not a valid URL: {e}")),
        }
    }
    problems
}
