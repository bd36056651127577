use std::collections::HashMap;
use std::fmt;

use anyhow::{Result, bail};
use thiserror::Error;
use tracing::{debug, warn};

use crate::util::truncate_at_char_boundary;

pub const ASSESSMENT_SCAN_BYTES: usize = 8 * 1024;
const MAX_TEMPLATE_DEPTH: usize = 40;

/// A label that belongs to the scale that resolved it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualityLabel(String);

impl QualityLabel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct RatingScale {
    labels: Vec<String>,
    ordinals: HashMap<String, usize>,
}

impl RatingScale {
    /// Labels are given worst to best and must be unique.
    pub fn new<S: AsRef<str>>(labels: &[S]) -> Result<Self> {
        if labels.is_empty() {
            bail!("rating scale must contain at least one label");
        }

        let mut normalized = Vec::with_capacity(labels.len());
        let mut ordinals = HashMap::with_capacity(labels.len());
        for (ordinal, label) in labels.iter().enumerate() {
            let label = label.as_ref().trim().to_lowercase();
            if label.is_empty() {
                bail!("rating scale contains an empty label at position {ordinal}");
            }
            if ordinals.insert(label.clone(), ordinal).is_some() {
                bail!("rating scale contains duplicate label '{label}'");
            }
            normalized.push(label);
        }

        Ok(Self {
            labels: normalized,
            ordinals,
        })
    }

    pub fn ordinal(&self, label: &str) -> Option<usize> {
        self.ordinals.get(label).copied()
    }

    pub fn label_at(&self, ordinal: usize) -> Option<QualityLabel> {
        self.labels.get(ordinal).cloned().map(QualityLabel)
    }

    /// Lowercases and trims `raw`; anything off the scale is rejected.
    pub fn resolve(&self, raw: &str) -> Option<QualityLabel> {
        let normalized = raw.trim().to_lowercase();
        self.ordinal(&normalized).and_then(|ordinal| self.label_at(ordinal))
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub name: String,
    pub params: Vec<TemplateParam>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateParam {
    pub name: Option<String>,
    pub value: String,
}

impl Template {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|param| param.name.as_deref() == Some(name))
            .map(|param| param.value.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateParseError {
    #[error("template nesting exceeds {0} levels")]
    TooDeep(usize),
}

/// Every `{{...}}` in `wikitext`, nested ones included, in order of their opening braces.
/// Unterminated openings are treated as plain text.
pub fn parse_templates(wikitext: &str) -> Result<Vec<Template>, TemplateParseError> {
    let bytes = wikitext.as_bytes();
    let pair = |offset: usize, byte: u8| {
        offset + 1 < bytes.len() && bytes[offset] == byte && bytes[offset + 1] == byte
    };

    let mut open = Vec::<OpenTemplate>::new();
    let mut found = Vec::<(usize, Template)>::new();
    let mut cursor = 0usize;

    while cursor < bytes.len() {
        if pair(cursor, b'{') {
            if open.len() >= MAX_TEMPLATE_DEPTH {
                return Err(TemplateParseError::TooDeep(MAX_TEMPLATE_DEPTH));
            }
            open.push(OpenTemplate::new(cursor));
            cursor += 2;
            continue;
        }

        let Some(current) = open.last_mut() else {
            cursor += 1;
            continue;
        };

        if pair(cursor, b'[') {
            current.link_depth += 1;
            cursor += 2;
            continue;
        }
        if pair(cursor, b']') && current.link_depth > 0 {
            current.link_depth -= 1;
            cursor += 2;
            continue;
        }

        match bytes[cursor] {
            // Links never span lines.
            b'\n' => current.link_depth = 0,
            _ if current.link_depth > 0 => {}
            b'}' if pair(cursor, b'}') => {
                if let Some(mut closed) = open.pop() {
                    closed.end_segment(cursor);
                    found.push((closed.start, build_template(wikitext, &closed.segments)));
                }
                cursor += 2;
                continue;
            }
            b'|' => {
                current.end_segment(cursor);
                current.segment_start = cursor + 1;
            }
            b'=' if current.equals_at.is_none() && !current.segments.is_empty() => {
                current.equals_at = Some(cursor);
            }
            _ => {}
        }
        cursor += 1;
    }

    found.sort_by_key(|(start, _)| *start);
    Ok(found.into_iter().map(|(_, template)| template).collect())
}

/// A template whose closing `}}` has not been seen yet.
struct OpenTemplate {
    start: usize,
    segments: Vec<(usize, usize, Option<usize>)>,
    segment_start: usize,
    equals_at: Option<usize>,
    link_depth: usize,
}

impl OpenTemplate {
    fn new(start: usize) -> Self {
        Self {
            start,
            segments: Vec::new(),
            segment_start: start + 2,
            equals_at: None,
            link_depth: 0,
        }
    }

    fn end_segment(&mut self, end: usize) {
        self.segments.push((self.segment_start, end, self.equals_at.take()));
    }
}

fn build_template(wikitext: &str, segments: &[(usize, usize, Option<usize>)]) -> Template {
    let mut iter = segments.iter();
    let name = iter
        .next()
        .map(|(start, end, _)| wikitext[*start..*end].trim().to_string())
        .unwrap_or_default();

    let params = iter
        .map(|(start, end, equals_at)| match equals_at {
            Some(equals) => TemplateParam {
                name: Some(wikitext[*start..*equals].trim().to_string()),
                value: wikitext[equals + 1..*end].to_string(),
            },
            None => TemplateParam {
                name: None,
                value: wikitext[*start..*end].to_string(),
            },
        })
        .collect();

    Template { name, params }
}

pub fn is_assessment_banner(template_name: &str) -> bool {
    let normalized = template_name.trim().to_lowercase().replace('_', " ");
    normalized.starts_with("wikiproject")
        || normalized.starts_with("wp")
        || normalized.contains("wiki project")
}

#[derive(Debug, Clone)]
pub struct AssessmentExtractor {
    scale: RatingScale,
}

impl AssessmentExtractor {
    pub fn new(scale: RatingScale) -> Self {
        Self { scale }
    }

    pub fn scale(&self) -> &RatingScale {
        &self.scale
    }

    /// Best rating across all WikiProject banners, `None` meaning "na".
    pub fn extract(&self, wikitext: &str) -> Option<QualityLabel> {
        let scanned = truncate_at_char_boundary(wikitext, ASSESSMENT_SCAN_BYTES);
        let templates = match parse_templates(scanned) {
            Ok(templates) => templates,
            Err(err) => {
                warn!(error = %err, "failed to parse talk page wikitext");
                return None;
            }
        };

        let best = templates
            .iter()
            .filter(|template| is_assessment_banner(&template.name))
            .filter_map(|template| template.param("class"))
            .filter_map(|value| self.class_ordinal(value))
            .max()?;

        debug!(ordinal = best, "resolved assessment rating");
        self.scale.label_at(best)
    }

    fn class_ordinal(&self, raw: &str) -> Option<usize> {
        let value = raw.trim().to_lowercase();
        if let Some(ordinal) = self.scale.ordinal(&value) {
            return Some(ordinal);
        }
        match value.as_str() {
            "bplus" | "b+" => self.scale.ordinal("b"),
            "a-class" | "aclass" => self.scale.ordinal("a"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ASSESSMENT_SCAN_BYTES, AssessmentExtractor, RatingScale, TemplateParseError,
        is_assessment_banner, parse_templates,
    };

    fn en_scale() -> RatingScale {
        RatingScale::new(&["stub", "start", "c", "b", "ga", "a", "fa"]).expect("valid scale")
    }

    fn extract(wikitext: &str) -> String {
        AssessmentExtractor::new(en_scale())
            .extract(wikitext)
            .map(|label| label.to_string())
            .unwrap_or_else(|| "na".to_string())
    }

    #[test]
    fn scale_rejects_duplicates_and_empty_lists() {
        assert!(RatingScale::new(&["stub", "b", "STUB"]).is_err());
        assert!(RatingScale::new::<&str>(&[]).is_err());
    }

    #[test]
    fn scale_maps_labels_to_ordinals_both_ways() {
        let scale = en_scale();
        assert_eq!(scale.ordinal("ga"), Some(4));
        assert_eq!(scale.label_at(6).map(|label| label.to_string()), Some("fa".to_string()));
        assert_eq!(scale.resolve("  GA ").map(|label| label.to_string()), Some("ga".to_string()));
        assert!(scale.resolve("list").is_none());
    }

    #[test]
    fn parse_templates_handles_links_and_nested_templates() {
        let templates = parse_templates(
            "{{WikiProject Banner Shell|1={{WikiProject Chicago|class=B|importance=[[Low|low]]}}}}",
        )
        .expect("parse");

        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].name, "WikiProject Banner Shell");
        assert_eq!(templates[1].name, "WikiProject Chicago");
        assert_eq!(templates[1].param("class"), Some("B"));
        assert_eq!(templates[1].param("importance"), Some("[[Low|low]]"));
    }

    #[test]
    fn parse_templates_ignores_unterminated_openings() {
        let templates = parse_templates("{{broken | class=b\n{{WPBiography|class=start}}").expect("parse");
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].name, "WPBiography");
    }

    #[test]
    fn parse_templates_reports_excessive_nesting() {
        let wikitext = format!("{}x{}", "{{a|".repeat(64), "}}".repeat(64));
        assert_eq!(parse_templates(&wikitext), Err(TemplateParseError::TooDeep(40)));
        assert_eq!(extract(&wikitext), "na");
    }

    #[test]
    fn many_unterminated_openings_do_not_hide_a_later_banner() {
        let wikitext = format!("{}{{{{WikiProject X|class=b}}}}", "{{a ".repeat(36));
        let templates = parse_templates(&wikitext).expect("parse");
        assert_eq!(templates.len(), 1);
        assert_eq!(extract(&wikitext), "b");
    }

    #[test]
    fn unclosed_link_does_not_swallow_the_closing_braces() {
        assert_eq!(extract("{{WikiProject X|class=c|note=[[broken\n}}"), "c");
    }

    #[test]
    fn banner_names_follow_all_naming_conventions() {
        assert!(is_assessment_banner("WikiProject_Biography"));
        assert!(is_assessment_banner(" WPMILHIST"));
        assert!(is_assessment_banner("Chicago Wiki Project"));
        assert!(!is_assessment_banner("Talk header"));
    }

    #[test]
    fn highest_rating_across_banners_wins() {
        let wikitext = "{{WikiProject Football|class=b}}\n{{WikiProject Chicago|class=GA}}\n{{WPBio|class=start}}";
        assert_eq!(extract(wikitext), "ga");
    }

    #[test]
    fn aliases_map_to_scale_labels() {
        assert_eq!(extract("{{WikiProject Ships|class=B+}}"), "b");
        assert_eq!(extract("{{WikiProject Ships|class=bplus}}"), "b");
        assert_eq!(extract("{{WikiProject Ships|class=A-Class}}{{WPBio|class=c}}"), "a");
    }

    #[test]
    fn non_banner_templates_and_unknown_classes_yield_na() {
        assert_eq!(extract("{{Talk header}}{{Infobox|class=fa}}"), "na");
        assert_eq!(extract("{{WikiProject Lists|class=list}}"), "na");
        assert_eq!(extract("{{WikiProject Lists|importance=high}}"), "na");
        assert_eq!(extract(""), "na");
    }

    #[test]
    fn banners_past_the_scan_limit_are_ignored() {
        let mut wikitext = "x".repeat(ASSESSMENT_SCAN_BYTES);
        wikitext.push_str("{{WikiProject Biography|class=fa}}");
        assert_eq!(extract(&wikitext), "na");
    }

    #[test]
    fn extract_never_returns_off_scale_labels() {
        let scale = en_scale();
        let extractor = AssessmentExtractor::new(scale.clone());
        let inputs = [
            "{{WikiProject X|class=}}",
            "{{WikiProject X|class=fl}}",
            "{{WikiProject X|class= Start }}",
            "{{WikiProject X|class=a|class=stub}}",
            "{{{{WikiProject X|class=c}}",
            "}}{{WikiProject X|class=b",
        ];
        for input in inputs {
            if let Some(label) = extractor.extract(input) {
                assert!(scale.ordinal(label.as_str()).is_some(), "{input} -> {label}");
            }
        }
    }
}
