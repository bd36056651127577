use crate::rating::QualityLabel;

/// Reported for every record; view counts do not feed the bucket.
pub const POPULARITY_LABEL: &str = "High";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum QualityBucket {
    High,
    Medium,
    Low,
}

impl QualityBucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }

    pub fn score(self) -> i64 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Classification {
    pub bucket: QualityBucket,
    pub score: i64,
}

/// `Stub`/`Start` capitalized, other labels uppercased, missing as `NA`.
pub fn display_label(label: Option<&QualityLabel>) -> String {
    match label.map(QualityLabel::as_str) {
        None => "NA".to_string(),
        Some(value @ ("stub" | "start")) => {
            let mut chars = value.chars();
            chars
                .next()
                .map(|first| first.to_uppercase().chain(chars).collect())
                .unwrap_or_default()
        }
        Some(value) => value.to_uppercase(),
    }
}

pub fn classify(rating: Option<&QualityLabel>, prediction: Option<&QualityLabel>) -> Classification {
    let rating = display_label(rating);
    let prediction = display_label(prediction);
    let bucket = bucket_for(&rating, &prediction);

    Classification {
        bucket,
        score: bucket.score(),
    }
}

fn bucket_for(rating: &str, prediction: &str) -> QualityBucket {
    if matches!(rating, "FA" | "A" | "GA") || matches!(prediction, "FA" | "GA") {
        QualityBucket::High
    } else if matches!(prediction, "B" | "C") {
        QualityBucket::Medium
    } else if matches!(rating, "B" | "C") && matches!(prediction, "NA" | "Start" | "Stub") {
        QualityBucket::Medium
    } else {
        QualityBucket::Low
    }
}

#[cfg(test)]
mod tests {
    use super::{QualityBucket, classify, display_label};
    use crate::rating::{QualityLabel, RatingScale};

    fn label(raw: &str) -> Option<QualityLabel> {
        RatingScale::new(&["stub", "start", "c", "b", "ga", "a", "fa"])
            .expect("valid scale")
            .resolve(raw)
    }

    fn bucket(rating: &str, prediction: &str) -> (QualityBucket, i64) {
        let rating = label(rating);
        let prediction = label(prediction);
        let result = classify(rating.as_ref(), prediction.as_ref());
        (result.bucket, result.score)
    }

    #[test]
    fn display_labels_follow_casing_rules() {
        assert_eq!(display_label(label("stub").as_ref()), "Stub");
        assert_eq!(display_label(label("start").as_ref()), "Start");
        assert_eq!(display_label(label("ga").as_ref()), "GA");
        assert_eq!(display_label(None), "NA");
    }

    #[test]
    fn featured_rating_is_high() {
        assert_eq!(bucket("fa", "na"), (QualityBucket::High, 3));
        assert_eq!(bucket("a", "stub"), (QualityBucket::High, 3));
        assert_eq!(bucket("stub", "ga"), (QualityBucket::High, 3));
    }

    #[test]
    fn a_class_prediction_alone_is_not_high() {
        assert_eq!(bucket("na", "a"), (QualityBucket::Low, 1));
    }

    #[test]
    fn mid_prediction_is_medium() {
        assert_eq!(bucket("na", "b"), (QualityBucket::Medium, 2));
        assert_eq!(bucket("stub", "c"), (QualityBucket::Medium, 2));
    }

    #[test]
    fn mid_rating_needs_weak_or_missing_prediction() {
        assert_eq!(bucket("b", "na"), (QualityBucket::Medium, 2));
        assert_eq!(bucket("c", "start"), (QualityBucket::Medium, 2));
        assert_eq!(bucket("b", "a"), (QualityBucket::Low, 1));
    }

    #[test]
    fn nothing_known_is_low() {
        assert_eq!(bucket("na", "na"), (QualityBucket::Low, 1));
        assert_eq!(bucket("start", "stub"), (QualityBucket::Low, 1));
    }

    #[test]
    fn every_combination_lands_in_exactly_one_bucket() {
        let labels = ["na", "stub", "start", "c", "b", "ga", "a", "fa"];
        for rating in labels {
            for prediction in labels {
                let (bucket, score) = bucket(rating, prediction);
                assert_eq!(bucket.score(), score);
                assert!((1..=3).contains(&score), "{rating}/{prediction}");
            }
        }
    }
}
