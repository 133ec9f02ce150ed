//! Identity of a single harvest run.
//!
//! Every component receives a [`HarvestContext`] when it is constructed and
//! prefixes its log lines with it, so interleaved output from several runs
//! stays attributable without any process-wide logger state.

use std::fmt;

/// Inclusive range of filter values a harvest is restricted to.
///
/// The bounds are kept as the operator supplied them; they may be years
/// (`2019`) or ISO dates (`2019-08-01`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestRange {
    /// Lower bound, inclusive.
    pub start: String,
    /// Upper bound, inclusive.
    pub end: String,
}

impl HarvestRange {
    /// Build a range from its two bounds.
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// Names the layer being harvested and, optionally, the filtered range.
///
/// # Examples
///
/// ```
/// use harvest_core::{HarvestContext, HarvestRange};
///
/// let ctx = HarvestContext::new("prodes-cerrado-nb", "yearly_deforestation")
///     .with_range(HarvestRange::new("2019", "2023"));
/// assert_eq!(ctx.type_name(), "prodes-cerrado-nb:yearly_deforestation");
/// assert_eq!(ctx.table_name(), "prodes_cerrado_nb_yearly_deforestation");
/// assert_eq!(
///     ctx.artifact_stem(),
///     "prodes-cerrado-nb_yearly_deforestation_2019_2023"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestContext {
    workspace: String,
    layer: String,
    range: Option<HarvestRange>,
}

impl HarvestContext {
    /// Create a context for `workspace:layer` without a range restriction.
    pub fn new(workspace: impl Into<String>, layer: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            layer: layer.into(),
            range: None,
        }
    }

    /// Attach the filtered range to the context.
    #[must_use]
    pub fn with_range(mut self, range: HarvestRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Service workspace (namespace prefix).
    #[must_use]
    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    /// Layer name within the workspace.
    #[must_use]
    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// Range restriction, when one was supplied.
    #[must_use]
    pub const fn range(&self) -> Option<&HarvestRange> {
        self.range.as_ref()
    }

    /// Qualified feature type name as the service expects it.
    #[must_use]
    pub fn type_name(&self) -> String {
        format!("{}:{}", self.workspace, self.layer)
    }

    /// Destination table name derived from workspace and layer.
    ///
    /// Hyphens become underscores so the name needs no quoting in ad-hoc
    /// queries.
    #[must_use]
    pub fn table_name(&self) -> String {
        format!("{}_{}", self.workspace, self.layer).replace('-', "_")
    }

    /// Stem used to name page artefacts on disk.
    ///
    /// Characters outside `[A-Za-z0-9._-]` are replaced with `_`.
    #[must_use]
    pub fn artifact_stem(&self) -> String {
        let raw = match &self.range {
            Some(range) => format!(
                "{}_{}_{}_{}",
                self.workspace, self.layer, range.start, range.end
            ),
            None => format!("{}_{}", self.workspace, self.layer),
        };
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for HarvestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}", self.workspace, self.layer)?;
        if let Some(range) = &self.range {
            write!(f, " {}..={}", range.start, range.end)?;
        }
        f.write_str("]")
    }
}
