//! Structural well-formedness of generated artifacts.
//!
//! The result is binary: any error fails the artifact. Checks run over the
//! markup token stream in one pass:
//!
//! - balanced nesting (mismatched, unclosed and stray closers)
//! - heading sequence (forward skips, decreases, orphaned sub-levels)
//! - required markers present exactly once and never empty
//! - content-bearing elements and lists never empty

use crate::error::KernelError;
use crate::markup::{MarkupToken, Position, TokenKind, class_list, decode_entities, is_void, lex};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

const LIST_TAGS: &[&str] = &["ul", "ol"];
const LIST_ITEM_TAG: &str = "li";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralCode {
    UnbalancedNesting,
    InvalidHeadingJump,
    OrphanedHeading,
    MissingRequiredMarker,
    DuplicateRequiredMarker,
    EmptyMarker,
    EmptyList,
}

impl StructuralCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnbalancedNesting => "unbalanced_nesting",
            Self::InvalidHeadingJump => "invalid_heading_jump",
            Self::OrphanedHeading => "orphaned_heading",
            Self::MissingRequiredMarker => "missing_required_marker",
            Self::DuplicateRequiredMarker => "duplicate_required_marker",
            Self::EmptyMarker => "empty_marker",
            Self::EmptyList => "empty_list",
        }
    }
}

impl Display for StructuralCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralError {
    pub code: StructuralCode,
    /// Absent for whole-document conditions such as a missing marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Position>,
    pub message: String,
}

impl StructuralError {
    fn at(code: StructuralCode, location: Position, message: String) -> Self {
        Self {
            code,
            location: Some(location),
            message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureReport {
    pub status: StructureStatus,
    pub errors: Vec<StructuralError>,
}

impl StructureReport {
    pub fn passed(&self) -> bool {
        self.status == StructureStatus::Pass
    }
}

/// Selects elements by class name or by tag name.
///
/// Written in configuration as `class:NAME` or `tag:NAME`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MarkerSelector {
    Class(String),
    Tag(String),
}

impl MarkerSelector {
    fn matches(&self, name: &str, attrs: &str) -> bool {
        match self {
            Self::Class(class) => class_list(attrs).iter().any(|c| c == class),
            Self::Tag(tag) => tag == name,
        }
    }
}

impl Display for MarkerSelector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Class(name) => write!(f, "class:{name}"),
            Self::Tag(name) => write!(f, "tag:{name}"),
        }
    }
}

impl FromStr for MarkerSelector {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| KernelError::InvalidConfig {
            field: "structure.required_markers".to_string(),
            message: format!("`{s}`: {message}"),
        };
        let (kind, name) = s
            .split_once(':')
            .ok_or_else(|| invalid("expected `class:NAME` or `tag:NAME`"))?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(invalid("selector name must be a single word"));
        }
        match kind.trim() {
            "class" => Ok(Self::Class(name.to_string())),
            "tag" => Ok(Self::Tag(name.to_ascii_lowercase())),
            _ => Err(invalid("selector kind must be `class` or `tag`")),
        }
    }
}

impl TryFrom<String> for MarkerSelector {
    type Error = KernelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MarkerSelector> for String {
    fn from(value: MarkerSelector) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureRules {
    /// Markers that must occur exactly once and carry content.
    pub required_markers: Vec<MarkerSelector>,
    /// Forward heading skips permitted in addition to single steps,
    /// e.g. `[1, 3]`.
    pub allowed_heading_skips: Vec<[u8; 2]>,
    /// Largest permitted drop in heading level; 0 disables the check.
    pub max_heading_decrease: u8,
    /// Tags that must carry text or child elements.
    pub non_empty: Vec<String>,
    /// Level every other heading descends from. Defaults to the first
    /// heading seen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_heading_level: Option<u8>,
}

impl Default for StructureRules {
    fn default() -> Self {
        Self {
            required_markers: vec![
                MarkerSelector::Class("page-container".to_string()),
                MarkerSelector::Class("page-content".to_string()),
            ],
            allowed_heading_skips: Vec::new(),
            max_heading_decrease: 1,
            non_empty: ["p", "li", "h1", "h2", "h3", "h4", "h5", "h6"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            first_heading_level: None,
        }
    }
}

impl StructureRules {
    pub fn validate(&self) -> Result<(), KernelError> {
        let level_ok = |l: u8| (1..=6).contains(&l);
        for [from, to] in &self.allowed_heading_skips {
            if !level_ok(*from) || !level_ok(*to) || to <= from {
                return Err(KernelError::InvalidConfig {
                    field: "structure.allowed_heading_skips".to_string(),
                    message: format!("[{from}, {to}] is not a forward skip between h1..h6"),
                });
            }
        }
        if let Some(level) = self.first_heading_level
            && !level_ok(level)
        {
            return Err(KernelError::InvalidConfig {
                field: "structure.first_heading_level".to_string(),
                message: format!("{level} is outside 1..=6"),
            });
        }
        Ok(())
    }

    fn skip_allowed(&self, from: u8, to: u8) -> bool {
        to <= from + 1 || self.allowed_heading_skips.contains(&[from, to])
    }
}

struct OpenElement {
    name: String,
    position: Position,
    has_content: bool,
    has_item: bool,
    required: bool,
}

struct HeadingTracker {
    root: Option<u8>,
    previous: Option<u8>,
    seen: [bool; 7],
}

fn heading_level(name: &str) -> Option<u8> {
    let digit = name.strip_prefix('h')?;
    match digit.parse::<u8>() {
        Ok(level @ 1..=6) if digit.len() == 1 => Some(level),
        _ => None,
    }
}

/// Validate an artifact against `rules`.
///
/// Pure: the same artifact always yields the same report.
pub fn validate_structure(artifact: &str, rules: &StructureRules) -> StructureReport {
    let tokens = lex(artifact);
    let mut errors = Vec::new();
    let mut stack: Vec<OpenElement> = Vec::new();
    let mut marker_hits: Vec<Vec<Position>> = vec![Vec::new(); rules.required_markers.len()];
    let mut headings = HeadingTracker {
        root: rules.first_heading_level,
        previous: None,
        seen: [false; 7],
    };

    for token in &tokens {
        match &token.kind {
            TokenKind::Start {
                name,
                attrs,
                self_closing,
            } => {
                if let Some(parent) = stack.last_mut() {
                    parent.has_content = true;
                    if name == LIST_ITEM_TAG && LIST_TAGS.contains(&parent.name.as_str()) {
                        parent.has_item = true;
                    }
                }
                let mut required = false;
                for (index, selector) in rules.required_markers.iter().enumerate() {
                    if selector.matches(name, attrs) {
                        marker_hits[index].push(token.position);
                        required = true;
                    }
                }
                if let Some(level) = heading_level(name) {
                    check_heading(level, token, rules, &mut headings, &mut errors);
                }
                if !*self_closing && !is_void(name) {
                    stack.push(OpenElement {
                        name: name.clone(),
                        position: token.position,
                        has_content: false,
                        has_item: false,
                        required,
                    });
                }
            }
            TokenKind::End { name } => {
                if is_void(name) {
                    continue;
                }
                let Some(depth) = stack.iter().rposition(|open| &open.name == name) else {
                    errors.push(StructuralError::at(
                        StructuralCode::UnbalancedNesting,
                        token.position,
                        format!("closing </{name}> has no matching opening tag"),
                    ));
                    continue;
                };
                while stack.len() > depth + 1 {
                    if let Some(open) = stack.pop() {
                        errors.push(StructuralError::at(
                            StructuralCode::UnbalancedNesting,
                            open.position,
                            format!(
                                "<{}> is not closed before </{name}> at {}",
                                open.name, token.position
                            ),
                        ));
                    }
                }
                if let Some(open) = stack.pop() {
                    check_closed(&open, rules, &mut errors);
                }
            }
            TokenKind::Text(text) => {
                if let Some(top) = stack.last_mut()
                    && !decode_entities(text).trim().is_empty()
                {
                    top.has_content = true;
                }
            }
            TokenKind::Ignored => {}
        }
    }

    for open in stack.into_iter().rev() {
        errors.push(StructuralError::at(
            StructuralCode::UnbalancedNesting,
            open.position,
            format!("<{}> is never closed", open.name),
        ));
    }

    for (selector, hits) in rules.required_markers.iter().zip(&marker_hits) {
        match hits.as_slice() {
            [] => errors.push(StructuralError {
                code: StructuralCode::MissingRequiredMarker,
                location: None,
                message: format!("required marker {selector} is missing"),
            }),
            [_] => {}
            [first, rest @ ..] => {
                for extra in rest {
                    errors.push(StructuralError::at(
                        StructuralCode::DuplicateRequiredMarker,
                        *extra,
                        format!("required marker {selector} repeats; first occurrence at {first}"),
                    ));
                }
            }
        }
    }

    let status = if errors.is_empty() {
        StructureStatus::Pass
    } else {
        StructureStatus::Fail
    };
    StructureReport { status, errors }
}

fn check_heading(
    level: u8,
    token: &MarkupToken<'_>,
    rules: &StructureRules,
    tracker: &mut HeadingTracker,
    errors: &mut Vec<StructuralError>,
) {
    let root = *tracker.root.get_or_insert(level);
    let has_parent = (1..level).any(|l| tracker.seen[usize::from(l)]);

    if level > root && !has_parent {
        errors.push(StructuralError::at(
            StructuralCode::OrphanedHeading,
            token.position,
            format!("h{level} has no enclosing heading at a shallower level (root h{root})"),
        ));
    } else if let Some(previous) = tracker.previous {
        if level > previous && !rules.skip_allowed(previous, level) {
            errors.push(StructuralError::at(
                StructuralCode::InvalidHeadingJump,
                token.position,
                format!("heading jumps from h{previous} to h{level}"),
            ));
        } else if rules.max_heading_decrease > 0
            && previous > level
            && previous - level > rules.max_heading_decrease
        {
            errors.push(StructuralError::at(
                StructuralCode::InvalidHeadingJump,
                token.position,
                format!(
                    "heading drops from h{previous} to h{level}; at most {} level(s) allowed",
                    rules.max_heading_decrease
                ),
            ));
        }
    }

    // A shallower heading closes every deeper section.
    for deeper in usize::from(level) + 1..tracker.seen.len() {
        tracker.seen[deeper] = false;
    }
    tracker.seen[usize::from(level)] = true;
    tracker.previous = Some(level);
}

fn check_closed(open: &OpenElement, rules: &StructureRules, errors: &mut Vec<StructuralError>) {
    if LIST_TAGS.contains(&open.name.as_str()) && !open.has_item {
        errors.push(StructuralError::at(
            StructuralCode::EmptyList,
            open.position,
            format!("<{}> has no <{LIST_ITEM_TAG}> items", open.name),
        ));
        return;
    }
    let must_carry = open.required || rules.non_empty.iter().any(|t| *t == open.name);
    if must_carry && !open.has_content {
        errors.push(StructuralError::at(
            StructuralCode::EmptyMarker,
            open.position,
            format!("<{}> is empty", open.name),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> String {
        format!(
            "<!DOCTYPE html><html><body><div class=\"page-container\">\
             <main class=\"page-content\">{body}</main></div></body></html>"
        )
    }

    fn codes(report: &StructureReport) -> Vec<StructuralCode> {
        report.errors.iter().map(|e| e.code).collect()
    }

    #[test]
    fn well_formed_page_passes_and_is_idempotent() {
        let artifact = page("<h1>Title</h1><p>Intro<br/>text</p><h2>Part</h2><ul><li>one</li></ul>");
        let rules = StructureRules::default();
        let first = validate_structure(&artifact, &rules);
        assert_eq!(first.status, StructureStatus::Pass, "{:?}", first.errors);
        assert!(first.errors.is_empty());
        assert_eq!(validate_structure(&artifact, &rules), first);
    }

    #[test]
    fn mismatched_and_unclosed_tags_are_unbalanced() {
        let report = validate_structure(&page("<p>text<em>x</p>"), &StructureRules::default());
        assert_eq!(codes(&report), vec![StructuralCode::UnbalancedNesting]);
        assert!(report.errors[0].message.contains("<em>"));

        let report = validate_structure(&page("<p>a</p></section>"), &StructureRules::default());
        assert_eq!(codes(&report), vec![StructuralCode::UnbalancedNesting]);
    }

    #[test]
    fn forward_skip_needs_permission() {
        let artifact = page("<h1>A</h1><h3>B</h3>");
        let report = validate_structure(&artifact, &StructureRules::default());
        assert_eq!(codes(&report), vec![StructuralCode::InvalidHeadingJump]);

        let rules = StructureRules {
            allowed_heading_skips: vec![[1, 3]],
            ..StructureRules::default()
        };
        assert!(validate_structure(&artifact, &rules).passed());
    }

    #[test]
    fn decrease_of_more_than_one_level_is_a_jump() {
        let artifact = page("<h1>A</h1><h2>B</h2><h3>C</h3><h4>D</h4><h2>E</h2>");
        let report = validate_structure(&artifact, &StructureRules::default());
        assert_eq!(codes(&report), vec![StructuralCode::InvalidHeadingJump]);

        let rules = StructureRules {
            max_heading_decrease: 0,
            ..StructureRules::default()
        };
        assert!(validate_structure(&artifact, &rules).passed());
    }

    #[test]
    fn sub_level_without_parent_is_orphaned() {
        let rules = StructureRules {
            first_heading_level: Some(1),
            ..StructureRules::default()
        };
        let report = validate_structure(&page("<h2>Lost</h2><p>x</p>"), &rules);
        assert_eq!(codes(&report), vec![StructuralCode::OrphanedHeading]);
    }

    #[test]
    fn required_marker_missing_or_duplicated() {
        let report = validate_structure("<main class=\"page-content\"><p>x</p></main>", &StructureRules::default());
        assert_eq!(codes(&report), vec![StructuralCode::MissingRequiredMarker]);
        assert_eq!(report.errors[0].location, None);

        let doubled = "<div class=\"page-container\"><main class=\"page-content\"><p>a</p></main>\
                       <main class=\"page-content\"><p>b</p></main></div>";
        let report = validate_structure(doubled, &StructureRules::default());
        assert_eq!(codes(&report), vec![StructuralCode::DuplicateRequiredMarker]);
    }

    #[test]
    fn empty_elements_and_lists_are_reported() {
        let report = validate_structure(&page("<p>  </p><ol></ol><h2>&nbsp;</h2>"), &StructureRules::default());
        assert_eq!(
            codes(&report),
            vec![
                StructuralCode::EmptyMarker,
                StructuralCode::EmptyList,
                StructuralCode::EmptyMarker
            ]
        );
    }

    #[test]
    fn selectors_parse_from_config_strings() {
        assert_eq!(
            "class:chapter-header".parse::<MarkerSelector>(),
            Ok(MarkerSelector::Class("chapter-header".to_string()))
        );
        assert_eq!("tag:MAIN".parse::<MarkerSelector>(), Ok(MarkerSelector::Tag("main".to_string())));
        assert!("id:x".parse::<MarkerSelector>().is_err());
        assert!("class:".parse::<MarkerSelector>().is_err());
    }

    #[test]
    fn rules_reject_backward_skips() {
        let rules = StructureRules {
            allowed_heading_skips: vec![[3, 1]],
            ..StructureRules::default()
        };
        assert!(rules.validate().is_err());
    }
}
