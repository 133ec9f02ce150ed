//! Offset pagination over a sorted feature collection.
//!
//! Windows are derived from a single count taken at the start of the
//! harvest. They are only a faithful partition while the dataset stays
//! unchanged, which is why every window also carries the sort key.

use thiserror::Error;

use crate::PropertyName;

/// Page cap assumed when the service does not advertise one.
pub const DEFAULT_PAGE_CAP: u64 = 100_000;

/// Default property used to order features between pages.
const DEFAULT_SORT_KEY: &str = "uid";

/// One slice of the result set, fetched in a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    /// 1-based position in the plan; also numbers the page artefact.
    pub sequence: u64,
    /// Offset of the first feature, as sent in `startIndex`.
    pub start: u64,
    /// Number of features requested, as sent in `count`.
    pub count: u64,
    /// Number of features the window is expected to contain.
    pub size: u64,
}

impl FetchWindow {
    /// Offset one past the last feature covered by the window.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start + self.size
    }
}

/// Errors raised while planning windows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// The service advertised, or the operator configured, a zero page cap.
    #[error("page cap must be greater than zero")]
    ZeroPageCap,
}

/// Ordered windows plus the sort key that makes them reproducible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationPlan {
    /// Property the service sorts by before slicing.
    pub sort_key: PropertyName,
    /// Windows in fetch order.
    pub windows: Vec<FetchWindow>,
}

impl PaginationPlan {
    /// Plan windows for `total` features with pages of at most `page_cap`.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::ZeroPageCap`] when `page_cap` is zero.
    pub fn new(total: u64, page_cap: u64, sort_key: PropertyName) -> Result<Self, PlanError> {
        Ok(Self {
            sort_key,
            windows: plan_windows(total, page_cap)?,
        })
    }

    /// Total number of features covered by the plan.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.windows.iter().map(|w| w.size).sum()
    }
}

/// Default sort key: the `uid` property.
#[must_use]
pub fn default_sort_key() -> PropertyName {
    PropertyName::from_static(DEFAULT_SORT_KEY)
}

impl Default for PaginationPlan {
    fn default() -> Self {
        Self {
            sort_key: default_sort_key(),
            windows: Vec::new(),
        }
    }
}

/// Split `[0, total)` into consecutive windows of `page_cap` features.
///
/// The last window is clipped to the remaining features while still
/// requesting a full page.
///
/// # Errors
///
/// Returns [`PlanError::ZeroPageCap`] when `page_cap` is zero.
///
/// # Examples
///
/// ```
/// use harvest_core::plan_windows;
///
/// let windows = plan_windows(250_000, 100_000)?;
/// let bounds: Vec<_> = windows.iter().map(|w| (w.start, w.end())).collect();
/// assert_eq!(bounds, [(0, 100_000), (100_000, 200_000), (200_000, 250_000)]);
/// assert_eq!(windows[2].count, 100_000);
/// # Ok::<(), harvest_core::PlanError>(())
/// ```
pub fn plan_windows(total: u64, page_cap: u64) -> Result<Vec<FetchWindow>, PlanError> {
    if page_cap == 0 {
        return Err(PlanError::ZeroPageCap);
    }
    let mut windows = Vec::new();
    let mut start = 0_u64;
    let mut sequence = 1_u64;
    while start < total {
        let size = page_cap.min(total - start);
        windows.push(FetchWindow {
            sequence,
            start,
            count: page_cap,
            size,
        });
        start += size;
        sequence += 1;
    }
    Ok(windows)
}
