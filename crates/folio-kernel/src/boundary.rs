//! Unit boundary markers on the first and last page of a unit.
//!
//! The pattern set is configuration, not code: what counts as a unit title,
//! a section navigation list or a summary differs per document family. The
//! defaults match chapter-style books.

use crate::error::KernelError;
use crate::finding::{FailureClass, Finding};
use crate::markup::position_at;
use crate::verdict::Verdict;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Named capture holding the unit number in `opening_title`.
pub const NUMBER_GROUP: &str = "number";
/// Named capture holding the list body in `navigation_list`.
pub const BODY_GROUP: &str = "body";

/// Uncompiled boundary patterns as they appear in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryPatternSet {
    pub opening_title: String,
    pub navigation_list: String,
    pub navigation_item: String,
    pub summary_markers: Vec<String>,
}

impl Default for BoundaryPatternSet {
    fn default() -> Self {
        Self {
            opening_title: r"(?is)<h[1-2][^>]*>\s*(?:<[^>]+>\s*)*chapter\s+(?P<number>\d+)\b"
                .to_string(),
            navigation_list: r#"(?is)<(?:ul|ol|nav)\b[^>]*class\s*=\s*"[^"]*section-navigation[^"]*"[^>]*>(?P<body>.*?)</(?:ul|ol|nav)>"#
                .to_string(),
            navigation_item: r"(?i)<li[\s>]".to_string(),
            summary_markers: vec![
                r"(?i)snapshot\s+review".to_string(),
                r"(?i)\b(?:chapter|unit)\s+summary\b".to_string(),
                r"(?i)\bkey\s+(?:points|takeaways)\b".to_string(),
            ],
        }
    }
}

impl BoundaryPatternSet {
    pub fn compile(&self) -> Result<BoundaryPatterns, KernelError> {
        let opening_title = compile_with_group("boundary.opening_title", &self.opening_title, NUMBER_GROUP)?;
        let navigation_list =
            compile_with_group("boundary.navigation_list", &self.navigation_list, BODY_GROUP)?;
        let navigation_item = compile("boundary.navigation_item", &self.navigation_item)?;
        if self.summary_markers.is_empty() {
            return Err(KernelError::InvalidConfig {
                field: "boundary.summary_markers".to_string(),
                message: "at least one summary marker is required".to_string(),
            });
        }
        let summary_markers = self
            .summary_markers
            .iter()
            .map(|p| compile("boundary.summary_markers", p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BoundaryPatterns {
            opening_title,
            navigation_list,
            navigation_item,
            summary_markers,
        })
    }
}

fn compile(field: &str, pattern: &str) -> Result<Regex, KernelError> {
    Regex::new(pattern).map_err(|e| KernelError::InvalidPattern {
        field: field.to_string(),
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

fn compile_with_group(field: &str, pattern: &str, group: &str) -> Result<Regex, KernelError> {
    let re = compile(field, pattern)?;
    if !re.capture_names().flatten().any(|name| name == group) {
        return Err(KernelError::InvalidPattern {
            field: field.to_string(),
            pattern: pattern.to_string(),
            message: format!("missing named capture group `{group}`"),
        });
    }
    Ok(re)
}

/// Where a page sits within its unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PagePosition {
    First,
    Interior,
    Last,
    /// Single-page unit: both first and last.
    Only,
}

impl PagePosition {
    pub fn of(page: u32, first: u32, last: u32) -> Self {
        match (page == first, page == last) {
            (true, true) => Self::Only,
            (true, false) => Self::First,
            (false, true) => Self::Last,
            (false, false) => Self::Interior,
        }
    }

    pub fn is_first(self) -> bool {
        matches!(self, Self::First | Self::Only)
    }

    pub fn is_last(self) -> bool {
        matches!(self, Self::Last | Self::Only)
    }
}

/// A unit-title match inside page content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleMatch {
    pub number: u32,
    /// `line:column` of the match.
    pub location: String,
}

#[derive(Debug, Clone)]
pub struct BoundaryPatterns {
    opening_title: Regex,
    navigation_list: Regex,
    navigation_item: Regex,
    summary_markers: Vec<Regex>,
}

impl BoundaryPatterns {
    /// Every unit title found in `content`, in document order.
    pub fn titles(&self, content: &str) -> Vec<TitleMatch> {
        self.opening_title
            .captures_iter(content)
            .filter_map(|caps| {
                let number = caps.name(NUMBER_GROUP)?;
                let whole = caps.get(0)?;
                Some(TitleMatch {
                    number: number.as_str().parse().ok()?,
                    location: position_at(content, whole.start()).to_string(),
                })
            })
            .collect()
    }

    /// Items in the first navigation list, or `None` when there is no list.
    pub fn navigation_items(&self, content: &str) -> Option<usize> {
        let caps = self.navigation_list.captures(content)?;
        let body = caps.name(BODY_GROUP).map(|m| m.as_str()).unwrap_or("");
        Some(self.navigation_item.find_iter(body).count())
    }

    /// Title carrying `unit_number` and a navigation list with at least
    /// one item.
    pub fn validate_opening(&self, content: &str, unit_number: u32) -> bool {
        self.titles(content).iter().any(|t| t.number == unit_number)
            && self.navigation_items(content).is_some_and(|n| n > 0)
    }

    pub fn validate_closing(&self, content: &str) -> bool {
        self.summary_markers.iter().any(|re| re.is_match(content))
    }

    /// True when `content` opens the unit numbered `unit_number + 1`.
    pub fn detect_leaked_next_unit_opening(&self, content: &str, unit_number: u32) -> bool {
        self.leaked_title(content, unit_number).is_some()
    }

    fn leaked_title(&self, content: &str, unit_number: u32) -> Option<TitleMatch> {
        let next = unit_number.checked_add(1)?;
        self.titles(content).into_iter().find(|t| t.number == next)
    }

    /// Run every boundary check that applies at `position`.
    pub fn check_boundaries(
        &self,
        scope: &str,
        position: PagePosition,
        content: &str,
        unit_number: u32,
    ) -> BoundaryReport {
        let mut report = BoundaryReport::empty(position);
        if position.is_first() {
            self.opening_into(&mut report, scope, content, unit_number);
        }
        if position.is_last() {
            self.closing_into(&mut report, scope, content, unit_number);
        }
        report.settle()
    }

    /// Opening check only, as applied while a first page is still being
    /// regenerated. Missing pieces are page-level and retryable.
    pub fn check_opening(&self, scope: &str, content: &str, unit_number: u32) -> BoundaryReport {
        let mut report = BoundaryReport::empty(PagePosition::First);
        self.opening_into(&mut report, scope, content, unit_number);
        report.settle()
    }

    /// Closing marker and next-unit leak on the last page.
    pub fn check_closing(&self, scope: &str, content: &str, unit_number: u32) -> BoundaryReport {
        let mut report = BoundaryReport::empty(PagePosition::Last);
        self.closing_into(&mut report, scope, content, unit_number);
        report.settle()
    }

    fn opening_into(&self, report: &mut BoundaryReport, scope: &str, content: &str, unit_number: u32) {
        let titles = self.titles(content);
        let title_found = titles.iter().any(|t| t.number == unit_number);
        let items = self.navigation_items(content);
        let found = title_found && items.is_some_and(|n| n > 0);
        report.opening_found = Some(found);
        if found {
            return;
        }
        let mut missing = Vec::new();
        if !title_found {
            missing.push(format!("unit title for {unit_number}"));
        }
        match items {
            None => missing.push("navigation list".to_string()),
            Some(0) => missing.push("navigation list items".to_string()),
            Some(_) => {}
        }
        report.findings.push(
            Finding::error(
                FailureClass::BoundaryMissingOpening,
                scope,
                format!("first page lacks its opening: missing {}", missing.join(" and ")),
            )
            .with_details(json!({
                "expectedNumber": unit_number,
                "titlesFound": titles,
                "navigationItems": items,
            })),
        );
    }

    fn closing_into(&self, report: &mut BoundaryReport, scope: &str, content: &str, unit_number: u32) {
        let found = self.validate_closing(content);
        report.closing_found = Some(found);
        if !found {
            report.findings.push(Finding::warning(
                FailureClass::BoundaryMissingClosing,
                scope,
                "last page has no recognized summary marker",
            ));
        }

        if let Some(leak) = self.leaked_title(content, unit_number) {
            report.findings.push(
                Finding::error(
                    FailureClass::BoundaryLeak,
                    scope,
                    format!(
                        "last page of unit {unit_number} contains the opening of unit {} at {}",
                        leak.number, leak.location
                    ),
                )
                .with_location(leak.location.clone())
                .with_details(json!({
                    "unitNumber": unit_number,
                    "nextUnitNumber": leak.number,
                    "closingFound": found,
                })),
            );
            report.leak = Some(leak);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryReport {
    pub position: PagePosition,
    /// `None` when the opening check does not apply.
    pub opening_found: Option<bool>,
    pub closing_found: Option<bool>,
    pub leak: Option<TitleMatch>,
    pub status: Verdict,
    pub findings: Vec<Finding>,
}

impl BoundaryReport {
    fn empty(position: PagePosition) -> Self {
        Self {
            position,
            opening_found: None,
            closing_found: None,
            leak: None,
            status: Verdict::Pass,
            findings: Vec::new(),
        }
    }

    fn settle(mut self) -> Self {
        self.status = self
            .findings
            .iter()
            .map(|f| if f.is_error() { Verdict::Fail } else { Verdict::Warn })
            .max()
            .unwrap_or(Verdict::Pass);
        self
    }

    pub fn has_leak(&self) -> bool {
        self.leak.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> BoundaryPatterns {
        BoundaryPatternSet::default()
            .compile()
            .expect("default patterns compile")
    }

    const OPENING: &str = r#"<h1 class="chapter-header"><span>Chapter 2</span> Rights</h1>
<ul class="section-navigation"><li>2.1 Scope</li><li>2.2 Duties</li></ul>"#;

    #[test]
    fn opening_needs_own_number_and_navigation_items() {
        let p = patterns();
        assert!(p.validate_opening(OPENING, 2));
        assert!(!p.validate_opening(OPENING, 3));
        assert!(!p.validate_opening("<h1>Chapter 2</h1><p>no list</p>", 2));
        assert!(!p.validate_opening(
            "<h1>Chapter 2</h1><ul class=\"section-navigation\"></ul>",
            2
        ));
    }

    #[test]
    fn closing_accepts_any_summary_marker() {
        let p = patterns();
        assert!(p.validate_closing("<h2>Snapshot Review</h2>"));
        assert!(p.validate_closing("<h2>Chapter summary</h2>"));
        assert!(!p.validate_closing("<p>The end.</p>"));
    }

    #[test]
    fn last_page_with_next_unit_title_is_a_fatal_leak() {
        let p = patterns();
        let content = "<h2>Snapshot Review</h2><p>...</p><h1>Chapter 3</h1><p>Next starts</p>";
        assert!(p.detect_leaked_next_unit_opening(content, 2));

        let report = p.check_boundaries("u2/page-0015", PagePosition::Last, content, 2);
        assert_eq!(report.status, Verdict::Fail);
        assert_eq!(report.closing_found, Some(true));
        assert!(report.has_leak());
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].class, FailureClass::BoundaryLeak);
        assert_eq!(report.findings[0].location.as_deref(), Some("1:35"));
    }

    #[test]
    fn missing_closing_only_warns() {
        let report = patterns().check_boundaries("u2/page-0015", PagePosition::Last, "<p>x</p>", 2);
        assert_eq!(report.status, Verdict::Warn);
        assert_eq!(report.findings[0].class, FailureClass::BoundaryMissingClosing);
        assert!(!report.findings[0].is_error());
    }

    #[test]
    fn interior_pages_are_not_checked() {
        let report = patterns().check_boundaries("u2/page-0003", PagePosition::Interior, "<p>x</p>", 2);
        assert_eq!(report.status, Verdict::Pass);
        assert_eq!(report.opening_found, None);
        assert_eq!(report.closing_found, None);
    }

    #[test]
    fn single_page_unit_checks_both_ends() {
        let content = format!("{OPENING}<h2>Key takeaways</h2>");
        let report = patterns().check_boundaries("u2/page-0001", PagePosition::Only, &content, 2);
        assert_eq!(report.status, Verdict::Pass, "{:?}", report.findings);
        assert_eq!(report.opening_found, Some(true));
        assert_eq!(report.closing_found, Some(true));
    }

    #[test]
    fn split_checks_cover_one_end_each() {
        let p = patterns();
        let content = format!("{OPENING}<p>body</p>");
        let opening = p.check_opening("u2/page-0001", &content, 2);
        assert_eq!(opening.status, Verdict::Pass);
        assert_eq!(opening.closing_found, None);

        let closing = p.check_closing("u2/page-0001", &content, 2);
        assert_eq!(closing.status, Verdict::Warn);
        assert_eq!(closing.opening_found, None);
        assert!(!closing.has_leak());
    }

    #[test]
    fn patterns_must_declare_their_capture_groups() {
        let set = BoundaryPatternSet {
            opening_title: r"chapter\s+\d+".to_string(),
            ..BoundaryPatternSet::default()
        };
        assert!(matches!(set.compile(), Err(KernelError::InvalidPattern { .. })));
    }

    #[test]
    fn position_of_page_in_unit() {
        assert_eq!(PagePosition::of(5, 5, 5), PagePosition::Only);
        assert_eq!(PagePosition::of(5, 5, 9), PagePosition::First);
        assert_eq!(PagePosition::of(9, 5, 9), PagePosition::Last);
        assert_eq!(PagePosition::of(7, 5, 9), PagePosition::Interior);
    }
}
