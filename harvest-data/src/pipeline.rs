//! End-to-end harvest of one layer.
//!
//! The pipeline probes the service, plans windows, downloads every window
//! into the scratch directory, then decodes, normalises and loads each page
//! in window order. The first non-empty batch provisions the table.

use std::fmt;

use harvest_core::{
    GeometryNormalizer, HarvestContext, IdentityModel, PaginationPlan, Pause, PlanError,
    PropertyName, RetryPolicy, SchemaDescriptor, Srid, TableRef,
};
use harvest_fs::ScratchDir;
use log::{error, info, warn};
use thiserror::Error;

use crate::page::decode_page;
use crate::store::{FeatureStore, IdempotentLoader, ProvisionError, SchemaInferencer};
use crate::wfs::{
    CapabilityProbe, FeatureFilter, FeatureQuery, FetchError, PageArtifact, ProbeError,
    RetryingFetcher, WfsService, WfsTransport,
};

/// Everything that identifies and shapes one harvest.
#[derive(Debug, Clone)]
pub struct HarvestRequest {
    /// Layer and date range being harvested.
    pub context: HarvestContext,
    /// Server-side restriction.
    pub filter: FeatureFilter,
    /// Property the server sorts by before slicing windows.
    pub sort_key: PropertyName,
    /// Reference requested from the server.
    pub request_srs: Srid,
    /// Reference stored in the table.
    pub target_srid: Srid,
    /// Duplicate-prevention strategy.
    pub identity: IdentityModel,
    /// Attribute used as identifier when features lack a GeoJSON `id`.
    pub id_property: Option<String>,
    /// Destination table.
    pub table: TableRef,
    /// Page cap to use instead of the advertised one.
    pub page_cap: Option<u64>,
}

/// Counters describing a finished harvest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestReport {
    /// Features the service reported as matching.
    pub matched: u64,
    /// Windows planned.
    pub windows: u64,
    /// Pages downloaded.
    pub pages_fetched: u64,
    /// Pages that could not be read or decoded.
    pub pages_skipped: u64,
    /// Features decoded from pages.
    pub features_decoded: u64,
    /// Geometries repaired.
    pub repaired: u64,
    /// Features dropped for missing identifiers or unrepairable geometry.
    pub dropped: u64,
    /// Rows written.
    pub inserted: u64,
    /// Records already stored.
    pub duplicates_skipped: u64,
    /// Batches rolled back.
    pub batches_failed: u64,
}

impl HarvestReport {
    /// Whether every page was processed and every batch committed.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.pages_skipped == 0 && self.batches_failed == 0
    }
}

impl fmt::Display for HarvestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "matched={} windows={} fetched={} skipped={} decoded={} repaired={} dropped={} \
             inserted={} duplicates={} failed_batches={}",
            self.matched,
            self.windows,
            self.pages_fetched,
            self.pages_skipped,
            self.features_decoded,
            self.repaired,
            self.dropped,
            self.inserted,
            self.duplicates_skipped,
            self.batches_failed
        )
    }
}

/// Fatal harvest failures.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The hit count could not be read.
    #[error(transparent)]
    Probe(#[from] ProbeError),
    /// The windows could not be planned.
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// A page exhausted its retries.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The table could not be provisioned.
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    /// The scratch directory could not be removed.
    #[error("failed to remove scratch directory {path}")]
    Cleanup {
        /// Scratch path.
        path: camino::Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Runs harvests against one service.
pub struct Harvester<'a> {
    transport: &'a dyn WfsTransport,
    service: &'a WfsService,
    policy: RetryPolicy,
    pause: &'a dyn Pause,
}

impl<'a> Harvester<'a> {
    /// Build a harvester.
    #[must_use]
    pub const fn new(
        transport: &'a dyn WfsTransport,
        service: &'a WfsService,
        policy: RetryPolicy,
        pause: &'a dyn Pause,
    ) -> Self {
        Self {
            transport,
            service,
            policy,
            pause,
        }
    }

    /// Harvest `request` into `store`, staging pages in `scratch`.
    ///
    /// The scratch directory is removed when the report is clean and kept
    /// otherwise so skipped pages can be inspected.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError`] when the count, a page fetch or provisioning
    /// fails. Undecodable pages and failed batches are counted instead.
    pub fn run(
        &self,
        request: &HarvestRequest,
        scratch: ScratchDir,
        store: &mut FeatureStore,
    ) -> Result<HarvestReport, HarvestError> {
        let context = &request.context;
        let probe = CapabilityProbe::new(self.transport, self.service, context);
        let page_cap = request.page_cap.unwrap_or_else(|| probe.server_limit());
        let matched = probe.count_max_result(&request.filter, &self.policy, self.pause)?;
        let plan = PaginationPlan::new(matched, page_cap, request.sort_key.clone())?;
        info!(
            "{context} planned {} windows of up to {page_cap} features",
            plan.windows.len()
        );

        let mut report = HarvestReport {
            matched,
            windows: plan.windows.len() as u64,
            ..HarvestReport::default()
        };

        let artifacts = self.fetch_all(request, &plan, &scratch)?;
        report.pages_fetched = artifacts.len() as u64;

        self.load_all(request, &artifacts, &scratch, store, &mut report)?;

        if report.is_clean() {
            let path = scratch.path().to_path_buf();
            scratch
                .remove()
                .map_err(|source| HarvestError::Cleanup { path, source })?;
        } else {
            warn!(
                "{context} keeping scratch directory {} for inspection",
                scratch.path()
            );
        }
        info!("{context} harvest finished: {report}");
        Ok(report)
    }

    fn fetch_all(
        &self,
        request: &HarvestRequest,
        plan: &PaginationPlan,
        scratch: &ScratchDir,
    ) -> Result<Vec<PageArtifact>, FetchError> {
        let query = FeatureQuery {
            filter: request.filter.clone(),
            srs: request.request_srs,
            sort_key: plan.sort_key.clone(),
        };
        let fetcher =
            RetryingFetcher::new(self.transport, self.policy, self.pause, scratch, &request.context);
        plan.windows
            .iter()
            .map(|window| {
                let url = self.service.page_url(&request.context, &query, window);
                fetcher.fetch(&url, window)
            })
            .collect()
    }

    fn load_all(
        &self,
        request: &HarvestRequest,
        artifacts: &[PageArtifact],
        scratch: &ScratchDir,
        store: &mut FeatureStore,
        report: &mut HarvestReport,
    ) -> Result<(), ProvisionError> {
        let context = &request.context;
        let normalizer = GeometryNormalizer::new(context.clone(), request.target_srid);
        let inferencer = SchemaInferencer::new(context, request.identity);
        let loader = IdempotentLoader::new(context, request.identity);
        let mut descriptor: Option<SchemaDescriptor> = None;

        for artifact in artifacts {
            let decoded = scratch
                .read(&artifact.name)
                .map_err(|err| err.to_string())
                .and_then(|bytes| {
                    decode_page(
                        &bytes,
                        request.id_property.as_deref(),
                        request.request_srs,
                        context,
                    )
                        .map_err(|err| err.to_string())
                });
            let page = match decoded {
                Ok(page) => page,
                Err(reason) => {
                    warn!("{context} skipping page {}: {reason}", artifact.sequence);
                    report.pages_skipped += 1;
                    continue;
                }
            };
            report.features_decoded += page.features.len() as u64;

            let batch = normalizer.normalize_page(page);
            report.repaired += batch.repaired;
            report.dropped += batch.dropped;
            if batch.records.is_empty() {
                continue;
            }

            let target = match descriptor.take() {
                Some(existing) => existing,
                None => inferencer.provision(
                    store,
                    &request.table,
                    request.target_srid,
                    &batch.records,
                )?,
            };
            match loader.load(store, &target, &batch.records) {
                Ok(summary) => {
                    report.inserted += summary.inserted;
                    report.duplicates_skipped += summary.duplicates;
                }
                Err(err) => {
                    error!("{context} page {} failed to load: {err}", artifact.sequence);
                    report.batches_failed += 1;
                }
            }
            descriptor = Some(target);
        }
        Ok(())
    }
}
