//! Leaked-volume janitor.
//!
//! Export jobs delete their volumes on every code path, but a killed process
//! or a failed cleanup call can still leave tool-tagged volumes behind,
//! billing until someone removes them. The janitor lists tagged volumes in
//! one zone, deletes the ones that are safe to delete, and fails when
//! deletable volumes remain after the sweep.

use thiserror::Error;
use tracing::{info, warn};

use crate::provider::{VOLUME_TAG, VolumeApi, VolumeRecord, VolumeState};

/// Summary of janitor work.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SweepSummary {
    /// Number of volumes deleted during the sweep.
    pub deleted_volumes: usize,
    /// Number of tagged volumes skipped because they were attached or
    /// already on their way out.
    pub skipped_volumes: usize,
}

/// Errors returned by the janitor.
#[derive(Debug, Error)]
pub enum JanitorError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the sweep configuration is missing required values.
    #[error("missing {field}")]
    InvalidConfig {
        /// Name of the missing field.
        field: String,
    },
    /// Raised when listing volumes fails.
    #[error("failed to list volumes in {zone}: {source}")]
    List {
        /// Zone the listing targeted.
        zone: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// Raised when a volume delete fails.
    #[error("failed to delete volume {volume_id}: {source}")]
    Delete {
        /// Volume the delete targeted.
        volume_id: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// Raised when deletable volumes remain after the sweep.
    #[error("volumes remain after janitor sweep: {remaining} deletable volume(s) still present")]
    NotClean {
        /// Number of deletable tagged volumes still visible.
        remaining: usize,
    },
}

/// Deletes leaked tool-tagged volumes through the provider's volume API.
#[derive(Clone, Debug)]
pub struct Janitor<A> {
    api: A,
    zone: String,
    tag: String,
}

impl<A: VolumeApi> Janitor<A> {
    /// Creates a janitor sweeping the given zone for volumes carrying the
    /// default tool tag.
    #[must_use]
    pub fn new(api: A, zone: impl Into<String>) -> Self {
        Self {
            api,
            zone: zone.into().trim().to_owned(),
            tag: String::from(VOLUME_TAG),
        }
    }

    /// Overrides the tag the sweep matches on.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into().trim().to_owned();
        self
    }

    /// Performs a sweep and returns how many volumes were deleted.
    ///
    /// Attached, detaching, and already-deleting volumes are skipped with a
    /// warning; only available and faulted volumes are deleted. The sweep
    /// fails when deletable tagged volumes remain afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`JanitorError`] when configuration is incomplete, a provider
    /// call fails, or deletable volumes remain after the sweep.
    pub async fn sweep(&self) -> Result<SweepSummary, JanitorError<A::Error>> {
        if self.zone.is_empty() {
            return Err(JanitorError::InvalidConfig {
                field: String::from("zone"),
            });
        }
        if self.tag.is_empty() {
            return Err(JanitorError::InvalidConfig {
                field: String::from("tag"),
            });
        }

        let mut deleted_volumes = 0;
        let mut skipped_volumes = 0;
        for record in self.list_tagged().await? {
            if Self::is_deletable(&record.state) {
                self.api
                    .delete_volume(&record.handle())
                    .await
                    .map_err(|source| JanitorError::Delete {
                        volume_id: record.id.clone(),
                        source,
                    })?;
                info!(volume_id = %record.id, zone = %record.zone, "deleted leaked volume");
                deleted_volumes += 1;
            } else {
                warn!(
                    volume_id = %record.id,
                    state = %record.state,
                    "skipping tagged volume not safe to delete"
                );
                skipped_volumes += 1;
            }
        }

        let remaining = self
            .list_tagged()
            .await?
            .iter()
            .filter(|record| Self::is_deletable(&record.state))
            .count();
        if remaining > 0 {
            return Err(JanitorError::NotClean { remaining });
        }

        Ok(SweepSummary {
            deleted_volumes,
            skipped_volumes,
        })
    }

    /// Lists volumes in the zone, keeping only ones that carry the tag. The
    /// listing call already filters server-side; the local filter guards
    /// against gateways that ignore the query parameter.
    async fn list_tagged(&self) -> Result<Vec<VolumeRecord>, JanitorError<A::Error>> {
        let volumes = self
            .api
            .list_volumes(&self.zone, &self.tag)
            .await
            .map_err(|source| JanitorError::List {
                zone: self.zone.clone(),
                source,
            })?;
        Ok(volumes
            .into_iter()
            .filter(|record| record.tags.iter().any(|tag| tag == &self.tag))
            .collect())
    }

    const fn is_deletable(state: &VolumeState) -> bool {
        matches!(state, VolumeState::Available | VolumeState::Error)
    }
}
