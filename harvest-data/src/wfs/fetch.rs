//! Page downloads under a retry budget.

use camino::Utf8PathBuf;
use harvest_core::{FetchWindow, HarvestContext, Pause, RetryPolicy, retry_with_policy};
use harvest_fs::{ScratchDir, page_file_name};
use log::info;
use url::Url;

use super::probe::get_checked;
use super::{FetchError, WfsTransport};

/// Raw page body persisted in the scratch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageArtifact {
    /// Window sequence number, 1-based.
    pub sequence: u64,
    /// File name inside the scratch directory.
    pub name: String,
    /// Full path of the artefact.
    pub path: Utf8PathBuf,
    /// Body length in bytes.
    pub bytes: usize,
    /// Attempts the download took.
    pub attempts: u32,
}

/// Fetches page windows and writes each body to `{harvest}_part{seq}.geojson`.
///
/// Every window gets a fresh retry state; transport failures and exception
/// reports are retried after the policy delay until the budget runs out.
pub struct RetryingFetcher<'a> {
    transport: &'a dyn WfsTransport,
    policy: RetryPolicy,
    pause: &'a dyn Pause,
    scratch: &'a ScratchDir,
    context: &'a HarvestContext,
}

impl<'a> RetryingFetcher<'a> {
    /// Build a fetcher writing into `scratch`.
    #[must_use]
    pub const fn new(
        transport: &'a dyn WfsTransport,
        policy: RetryPolicy,
        pause: &'a dyn Pause,
        scratch: &'a ScratchDir,
        context: &'a HarvestContext,
    ) -> Self {
        Self {
            transport,
            policy,
            pause,
            scratch,
            context,
        }
    }

    /// Download `url` for `window` and persist the body.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Exhausted`] when every attempt failed and
    /// [`FetchError::WriteArtifact`] when the body cannot be written.
    pub fn fetch(&self, url: &Url, window: &FetchWindow) -> Result<PageArtifact, FetchError> {
        let operation = format!("page {}", window.sequence);
        let retried = retry_with_policy(&self.policy, self.pause, self.context, &operation, |_| {
            get_checked(self.transport, url)
        })
        .map_err(|exhausted| FetchError::Exhausted {
            url: url.to_string(),
            attempts: exhausted.attempts,
            source: exhausted.last_error,
        })?;

        let name = page_file_name(&self.context.artifact_stem(), window.sequence);
        let path = self
            .scratch
            .write(&name, &retried.value)
            .map_err(|source| FetchError::WriteArtifact {
                path: self.scratch.path().join(&name),
                source,
            })?;
        info!(
            "{} fetched page {} ({} bytes, attempt {})",
            self.context,
            window.sequence,
            retried.value.len(),
            retried.attempts
        );
        Ok(PageArtifact {
            sequence: window.sequence,
            name,
            path,
            bytes: retried.value.len(),
            attempts: retried.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wfs::test_support::{ScriptedTransport, deforestation_page};
    use crate::wfs::TransportError;
    use harvest_core::HarvestRange;
    use harvest_core::test_support::RecordingPause;
    use rstest::{fixture, rstest};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Scratch {
        _root: TempDir,
        dir: ScratchDir,
    }

    #[fixture]
    fn scratch() -> Scratch {
        let root = TempDir::new().expect("create temp dir");
        let path = Utf8PathBuf::from_path_buf(root.path().join("scratch")).expect("utf8 path");
        let dir = ScratchDir::create(&path).expect("create scratch dir");
        Scratch { _root: root, dir }
    }

    #[fixture]
    fn ctx() -> HarvestContext {
        HarvestContext::new("deter-amz", "deter_amz").with_range(HarvestRange::new("2024-01-01", "2024-01-31"))
    }

    fn window(sequence: u64) -> FetchWindow {
        FetchWindow {
            sequence,
            start: (sequence - 1) * 10,
            count: 10,
            size: 10,
        }
    }

    fn url() -> Url {
        Url::parse("https://example.org/geoserver/deter-amz/deter_amz/wfs").expect("valid url")
    }

    fn flaky(failures: usize) -> ScriptedTransport {
        ScriptedTransport::new(move |url, call| {
            if call < failures {
                Err(TransportError::Timeout {
                    url: url.to_string(),
                    timeout_secs: 600,
                })
            } else {
                Ok(deforestation_page("f", 0..3).into_bytes())
            }
        })
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(4)]
    fn succeeds_after_transient_failures(
        scratch: Scratch,
        ctx: HarvestContext,
        #[case] failures: usize,
    ) {
        let transport = flaky(failures);
        let pause = RecordingPause::default();
        let policy = RetryPolicy::new(5, Duration::from_secs(5)).expect("non-zero attempts");
        let fetcher = RetryingFetcher::new(&transport, policy, &pause, &scratch.dir, &ctx);

        let artifact = fetcher.fetch(&url(), &window(2)).expect("fetch succeeds");

        assert_eq!(transport.calls().len(), failures + 1);
        assert_eq!(pause.delays().len(), failures);
        assert_eq!(artifact.name, "deter-amz_deter_amz_2024-01-01_2024-01-31_part2.geojson");
        assert_eq!(
            scratch.dir.read(&artifact.name).expect("artefact readable"),
            deforestation_page("f", 0..3).into_bytes()
        );
    }

    #[rstest]
    fn exhaustion_reports_attempts_and_last_error(scratch: Scratch, ctx: HarvestContext) {
        let transport = flaky(usize::MAX);
        let pause = RecordingPause::default();
        let policy = RetryPolicy::new(3, Duration::from_secs(5)).expect("non-zero attempts");
        let fetcher = RetryingFetcher::new(&transport, policy, &pause, &scratch.dir, &ctx);

        let err = fetcher.fetch(&url(), &window(1)).expect_err("budget runs out");

        let FetchError::Exhausted { attempts, source, .. } = err else {
            panic!("expected exhaustion, got {err:?}");
        };
        assert_eq!(attempts, 3);
        assert!(matches!(source, TransportError::Timeout { .. }));
        assert_eq!(pause.delays(), vec![Duration::from_secs(5); 2]);
        assert!(scratch.dir.list().expect("list scratch").is_empty());
    }
}
