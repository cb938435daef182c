//! Filtering of remote job log output.
//!
//! Remote logs carry the whole pipeline run (environment install,
//! compose startup, teardown). Only the segment between the build-start
//! and build-end markers is diagnostic for a failed unit of work, and
//! within it the lines announcing skipped sibling parameterizations are
//! noise. [`BuildLogFilter`] is fed lines in order and says which to
//! keep; it is stateful so a paginated fetch can stop early once the
//! end marker has been seen.

/// Line marking entry into the build phase.
pub const BUILD_START_MARKER: &str = "Entering phase BUILD";

/// Line marking completion of the build phase.
pub const BUILD_END_MARKER: &str = "Phase complete: BUILD";

/// Suffix on lines reporting a skipped sibling parameterization.
pub const SKIPPED_SUFFIX: &str = " SKIPPED";

/// Stateful filter over job log lines, fed in order.
#[derive(Debug, Default)]
pub struct BuildLogFilter {
    started: bool,
    finished: bool,
}

impl BuildLogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer the next line; returns `true` if it belongs in the
    /// diagnostic output.
    pub fn offer(&mut self, line: &str) -> bool {
        if line.contains(BUILD_END_MARKER) {
            self.finished = true;
        }
        if line.contains(BUILD_START_MARKER) {
            self.started = true;
        }
        let skipped = line.trim_end_matches(['\r', '\n']).ends_with(SKIPPED_SUFFIX);
        self.started && !self.finished && !skipped
    }

    /// Whether the build-end marker has been seen; nothing after it is
    /// ever kept, so fetching more lines is pointless.
    pub fn finished(&self) -> bool {
        self.finished
    }
}

/// Filter a complete sequence of lines, keeping the build segment.
pub fn filter_build_segment<'a, I>(lines: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut filter = BuildLogFilter::new();
    lines
        .into_iter()
        .filter(|line| filter.offer(line))
        .collect()
}
