//! Report rendering
//!
//! A finished run is condensed into a serializable [`RunSummary`] and printed
//! in one of the three [`OutputFormat`]s.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::container::ComponentSet;
use crate::engine::{TaxonomyReport, UnitStatus};
use crate::error::ErrorCategory;
use crate::extractors::{
    Arcrole, Calculation, Definition, Element, Network, Presentation, RoleType,
    StandardExtractors, TableGroup,
};
use crate::resolver::ResolverStats;

/// Component counts of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComponentStats {
    pub elements: usize,
    pub roles: usize,
    pub arcroles: usize,
    pub definitions: usize,
    pub calculations: usize,
    pub presentations: usize,
    pub table_groups: usize,
    /// Elements with at least one label
    pub labelled_elements: usize,
    /// Elements that can carry a label
    pub label_capable: usize,
    pub orphan_labels: usize,
    pub orphan_generic_labels: usize,
}

impl ComponentStats {
    pub fn collect(set: &ComponentSet, extractors: &StandardExtractors) -> Self {
        let elements = set.components::<Element>();
        let labelled_elements = elements
            .iter()
            .filter(|e| e.data().is_some_and(|data| !data.labels.is_empty()))
            .count();

        Self {
            elements: elements.len(),
            roles: set.components::<RoleType>().len(),
            arcroles: set.components::<Arcrole>().len(),
            definitions: set.components::<Network<Definition>>().len(),
            calculations: set.components::<Network<Calculation>>().len(),
            presentations: set.components::<Network<Presentation>>().len(),
            table_groups: set.components::<TableGroup>().len(),
            labelled_elements,
            label_capable: elements.len(),
            orphan_labels: extractors.labels.orphan_labels().len(),
            orphan_generic_labels: extractors.generic_labels.orphan_labels().len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorSummary {
    pub stage: String,
    pub document: Option<String>,
    pub category: ErrorCategory,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimingSummary {
    pub name: String,
    pub elapsed_ms: u128,
}

/// Everything the binary reports about one run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub entry: String,
    pub schemas: usize,
    pub duration_ms: u128,
    /// Unit count per final status
    pub units: BTreeMap<String, usize>,
    pub errors: Vec<ErrorSummary>,
    pub timings: Vec<TimingSummary>,
    pub components: ComponentStats,
    pub resolver: ResolverStats,
}

impl RunSummary {
    pub fn new(entry: &str, report: &TaxonomyReport, extractors: &StandardExtractors) -> Self {
        let mut units = BTreeMap::new();
        for unit in &report.units {
            *units.entry(status_name(unit.status).to_string()).or_insert(0) += 1;
        }

        Self {
            entry: entry.to_string(),
            schemas: report.schema_set.len(),
            duration_ms: report.duration.as_millis(),
            units,
            errors: report
                .errors
                .iter()
                .map(|e| ErrorSummary {
                    stage: e.stage.to_string(),
                    document: e.document.clone(),
                    category: e.category(),
                    message: e.error.to_string(),
                })
                .collect(),
            timings: report
                .timings
                .iter()
                .map(|t| TimingSummary {
                    name: t.name.clone(),
                    elapsed_ms: t.elapsed.as_millis(),
                })
                .collect(),
            components: ComponentStats::collect(&report.schema_set, extractors),
            resolver: report.resolver_stats.clone(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

fn status_name(status: UnitStatus) -> &'static str {
    match status {
        UnitStatus::Pending => "pending",
        UnitStatus::Reading => "reading",
        UnitStatus::Success => "success",
        UnitStatus::Error => "error",
    }
}

/// Formats run summaries for the terminal
pub struct Output {
    verbosity: VerbosityLevel,
    format: OutputFormat,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel, format: OutputFormat) -> Self {
        Self {
            verbosity,
            format,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    pub fn with_colors(mut self, show_colors: bool) -> Self {
        self.show_colors = show_colors;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn render(&self, summary: &RunSummary) -> Result<String, serde_json::Error> {
        Ok(match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(summary)?,
            OutputFormat::Summary => self.format_summary_line(summary),
            OutputFormat::Human => self.format_human(summary),
        })
    }

    fn format_summary_line(&self, summary: &RunSummary) -> String {
        format!(
            "{} schemas, {} elements, {} errors in {}",
            summary.schemas,
            summary.components.elements,
            summary.errors.len(),
            format_duration(Duration::from_millis(summary.duration_ms as u64))
        )
    }

    fn format_human(&self, summary: &RunSummary) -> String {
        let mut output = String::new();

        if self.verbosity == VerbosityLevel::Quiet {
            if !summary.is_clean() {
                output.push_str(&format!("Errors: {}\n", summary.errors.len()));
                output.push_str(&self.format_errors(summary));
            }
            return output;
        }

        output.push_str("Taxonomy Summary:\n");
        output.push_str(&format!("  Entry: {}\n", summary.entry));
        output.push_str(&format!("  Schemas: {}\n", summary.schemas));
        output.push_str(&format!(
            "  Duration: {}\n",
            format_duration(Duration::from_millis(summary.duration_ms as u64))
        ));
        if summary.is_clean() {
            output.push_str(&format!("  {}\n", self.colorize("No errors", "32")));
        } else {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Errors:", "31"),
                summary.errors.len()
            ));
        }

        output.push_str(&self.format_components(&summary.components));

        if self.verbosity >= VerbosityLevel::Verbose {
            output.push_str("\nExtractor Timings:\n");
            for timing in &summary.timings {
                output.push_str(&format!(
                    "  {:<14} {}\n",
                    timing.name,
                    format_duration(Duration::from_millis(timing.elapsed_ms as u64))
                ));
            }
        }

        if self.verbosity == VerbosityLevel::Debug {
            output.push_str(&self.format_debug_info(summary));
        }

        if !summary.is_clean() {
            output.push_str("\nErrors:\n");
            output.push_str(&self.format_errors(summary));
        }

        output
    }

    fn format_components(&self, components: &ComponentStats) -> String {
        let mut output = String::from("\nComponents:\n");
        let rows = [
            ("Elements", components.elements),
            ("Roles", components.roles),
            ("Arcroles", components.arcroles),
            ("Definitions", components.definitions),
            ("Calculations", components.calculations),
            ("Presentations", components.presentations),
            ("Table groups", components.table_groups),
        ];
        for (name, count) in rows {
            output.push_str(&format!("  {:<14} {}\n", format!("{}:", name), count));
        }
        output.push_str(&format!(
            "  {:<14} {}/{}\n",
            "Labelled:", components.labelled_elements, components.label_capable
        ));
        if components.orphan_labels > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Orphan labels:", "33"),
                components.orphan_labels
            ));
        }
        if components.orphan_generic_labels > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Orphan generic labels:", "33"),
                components.orphan_generic_labels
            ));
        }
        output
    }

    fn format_errors(&self, summary: &RunSummary) -> String {
        summary
            .errors
            .iter()
            .map(|e| {
                format!(
                    "  {} {}: {}\n",
                    self.colorize("✗", "31"),
                    e.stage,
                    e.message
                )
            })
            .collect()
    }

    fn format_debug_info(&self, summary: &RunSummary) -> String {
        let mut output = String::from("\nDebug Information:\n");
        for (status, count) in &summary.units {
            output.push_str(&format!("  Units {}: {}\n", status, count));
        }
        let resolver = &summary.resolver;
        output.push_str(&format!(
            "  Reads: {} local, {} archive, {} mirror, {} cache, {} downloaded\n",
            resolver.local_reads,
            resolver.archive_reads,
            resolver.mirror_hits,
            resolver.cache_hits,
            resolver.remote_downloads
        ));
        output
    }
}

pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{:.0}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}
