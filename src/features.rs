use anyhow::{Context, Result};
use regex::Regex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QualityFeatures {
    pub length: usize,
    pub num_references: usize,
    pub num_pagelinks: usize,
    pub num_imagelinks: usize,
    pub num_headings_lvl2: usize,
    pub num_headings_lvl3: usize,
}

pub const METRIC_LENGTH: &str = "length";
pub const METRIC_LENGTH_TO_REFS: &str = "lengthToRefs";
pub const METRIC_COMPLETENESS: &str = "completeness";
pub const METRIC_IMAGES: &str = "numImages";
pub const METRIC_HEADINGS: &str = "headings";

impl QualityFeatures {
    /// Derived metrics in reporting order.
    pub fn metrics(&self) -> [(&'static str, f64); 5] {
        let length = self.length as f64;
        let log_length = if self.length > 0 { length.log2() } else { 0.0 };

        [
            (METRIC_LENGTH, log_length),
            (METRIC_LENGTH_TO_REFS, length / (1.0 + self.num_references as f64)),
            (METRIC_COMPLETENESS, 0.4 * self.num_pagelinks as f64),
            (METRIC_IMAGES, self.num_imagelinks as f64),
            (
                METRIC_HEADINGS,
                self.num_headings_lvl2 as f64 + 0.5 * self.num_headings_lvl3 as f64,
            ),
        ]
    }
}

/// Counts structural features of raw article wikitext.
#[derive(Debug)]
pub struct WikitextFeatureExtractor {
    comment: Regex,
    reference: Regex,
    link: Regex,
    heading_lvl2: Regex,
    heading_lvl3: Regex,
    image_prefixes: Vec<String>,
}

impl WikitextFeatureExtractor {
    pub fn new(localized_image_prefixes: &[String]) -> Result<Self> {
        let mut image_prefixes = vec!["file".to_string(), "image".to_string()];
        image_prefixes.extend(
            localized_image_prefixes
                .iter()
                .map(|prefix| prefix.trim().to_lowercase())
                .filter(|prefix| !prefix.is_empty()),
        );

        Ok(Self {
            comment: Regex::new(r"(?s)<!--.*?-->").context("failed to compile comment regex")?,
            reference: Regex::new(r"(?i)<ref(?:\s[^>]*)?/?>")
                .context("failed to compile reference regex")?,
            link: Regex::new(r"\[\[([^\[\]|#]*)").context("failed to compile link regex")?,
            heading_lvl2: Regex::new(r"(?m)^==[^=](?:.*[^=])?==[ \t]*$")
                .context("failed to compile level-2 heading regex")?,
            heading_lvl3: Regex::new(r"(?m)^===[^=](?:.*[^=])?===[ \t]*$")
                .context("failed to compile level-3 heading regex")?,
            image_prefixes,
        })
    }

    pub fn measure(&self, wikitext: &str) -> QualityFeatures {
        let body = self.comment.replace_all(wikitext, "");

        let mut num_pagelinks = 0usize;
        let mut num_imagelinks = 0usize;
        for captures in self.link.captures_iter(&body) {
            let target = captures.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            match target.split_once(':') {
                Some((prefix, _)) if self.is_image_prefix(prefix) => num_imagelinks += 1,
                Some(_) => {}
                None if !target.is_empty() => num_pagelinks += 1,
                None => {}
            }
        }

        QualityFeatures {
            length: body.chars().count(),
            num_references: self.reference.find_iter(&body).count(),
            num_pagelinks,
            num_imagelinks,
            num_headings_lvl2: self.heading_lvl2.find_iter(&body).count(),
            num_headings_lvl3: self.heading_lvl3.find_iter(&body).count(),
        }
    }

    fn is_image_prefix(&self, prefix: &str) -> bool {
        let prefix = prefix.trim().to_lowercase();
        self.image_prefixes.iter().any(|known| *known == prefix)
    }
}
