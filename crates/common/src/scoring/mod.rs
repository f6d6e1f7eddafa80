//! Pitch deck scoring rubric
//!
//! Provides:
//! - The nine weighted rubric categories
//! - The persisted Scoring Result shape
//! - Server-side overall score aggregation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rubric category, in the order the report presents them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    ProblemStatement,
    SolutionProduct,
    MarketOpportunity,
    BusinessModel,
    CompetitiveLandscape,
    Team,
    TractionMilestones,
    FinancialProjections,
    ClarityPresentation,
}

impl Category {
    /// All categories in rubric order
    pub const ALL: [Category; 9] = [
        Category::ProblemStatement,
        Category::SolutionProduct,
        Category::MarketOpportunity,
        Category::BusinessModel,
        Category::CompetitiveLandscape,
        Category::Team,
        Category::TractionMilestones,
        Category::FinancialProjections,
        Category::ClarityPresentation,
    ];

    /// JSON key used in LLM responses and persisted results
    pub fn key(&self) -> &'static str {
        match self {
            Category::ProblemStatement => "problemStatement",
            Category::SolutionProduct => "solutionProduct",
            Category::MarketOpportunity => "marketOpportunity",
            Category::BusinessModel => "businessModel",
            Category::CompetitiveLandscape => "competitiveLandscape",
            Category::Team => "team",
            Category::TractionMilestones => "tractionMilestones",
            Category::FinancialProjections => "financialProjections",
            Category::ClarityPresentation => "clarityPresentation",
        }
    }

    /// Human-readable name
    pub fn label(&self) -> &'static str {
        match self {
            Category::ProblemStatement => "Problem Statement",
            Category::SolutionProduct => "Solution/Product",
            Category::MarketOpportunity => "Market Opportunity",
            Category::BusinessModel => "Business Model",
            Category::CompetitiveLandscape => "Competitive Landscape",
            Category::Team => "Team",
            Category::TractionMilestones => "Traction/Milestones",
            Category::FinancialProjections => "Financial Projections",
            Category::ClarityPresentation => "Clarity & Presentation",
        }
    }

    /// Weight in whole percent; the nine weights sum to exactly 100
    pub fn weight_percent(&self) -> u32 {
        match self {
            Category::ProblemStatement => 10,
            Category::SolutionProduct => 15,
            Category::MarketOpportunity => 20,
            Category::BusinessModel => 15,
            Category::CompetitiveLandscape => 10,
            Category::Team => 10,
            Category::TractionMilestones => 10,
            Category::FinancialProjections => 5,
            Category::ClarityPresentation => 5,
        }
    }

    /// Weight as a fraction of 1.0
    pub fn weight(&self) -> f64 {
        f64::from(self.weight_percent()) / 100.0
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.key() == key)
    }
}

/// Investment recommendation tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    #[serde(rename = "Strong Buy")]
    StrongBuy,
    #[serde(rename = "Hold")]
    Hold,
    #[serde(rename = "Pass")]
    Pass,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::StrongBuy => "Strong Buy",
            Recommendation::Hold => "Hold",
            Recommendation::Pass => "Pass",
        }
    }

    /// Case- and spacing-insensitive parse ("strong_buy", "STRONG BUY", ...)
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "strongbuy" => Some(Recommendation::StrongBuy),
            "hold" => Some(Recommendation::Hold),
            "pass" => Some(Recommendation::Pass),
            _ => None,
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scored rubric category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAssessment {
    pub category: Category,
    /// 0..=10
    pub score: u8,
    pub feedback: String,
    /// False when the model omitted the category and it was scored as 0
    pub assessed: bool,
}

/// Validated analysis of one deck
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringResult {
    /// Always nine entries, in rubric order
    pub categories: Vec<CategoryAssessment>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendation: Recommendation,
    /// 0..=100
    pub confidence: u8,
    pub due_diligence: String,
    pub processed_at: String,
    /// Derived by [`overall_score`], never taken from the model
    pub overall_score: u8,
}

impl ScoringResult {
    pub fn category(&self, category: Category) -> Option<&CategoryAssessment> {
        self.categories.iter().find(|c| c.category == category)
    }

    /// Category scores keyed by category, for aggregation
    pub fn score_map(&self) -> BTreeMap<Category, f64> {
        self.categories
            .iter()
            .filter(|c| c.assessed)
            .map(|c| (c.category, f64::from(c.score)))
            .collect()
    }

    /// Recompute and store the overall score from the category scores
    pub fn recompute_overall(&mut self) {
        self.overall_score = overall_score(&self.score_map());
    }
}

/// Weighted 0-100 score from per-category 0-10 scores.
///
/// Categories absent from `scores`, or with a non-finite or out-of-range value,
/// contribute 0 while their weight still counts toward the total.
pub fn overall_score(scores: &BTreeMap<Category, f64>) -> u8 {
    // score/10 * weight_percent/100 * 100 == score * weight_percent / 10; summing the
    // integer products first keeps whole-number inputs exact before rounding.
    let weighted: f64 = Category::ALL
        .iter()
        .map(|category| {
            let score = scores
                .get(category)
                .copied()
                .filter(|s| s.is_finite() && (0.0..=10.0).contains(s))
                .unwrap_or(0.0);
            score * f64::from(category.weight_percent())
        })
        .sum();

    (weighted / 10.0).round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_scores(score: f64) -> BTreeMap<Category, f64> {
        Category::ALL.iter().map(|c| (*c, score)).collect()
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total: u32 = Category::ALL.iter().map(|c| c.weight_percent()).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_uniform_scores() {
        assert_eq!(overall_score(&all_scores(10.0)), 100);
        assert_eq!(overall_score(&all_scores(0.0)), 0);
        assert_eq!(overall_score(&all_scores(7.0)), 70);
    }

    #[test]
    fn test_weighted_formula() {
        let scores: BTreeMap<Category, f64> = [
            (Category::ProblemStatement, 8.0),
            (Category::SolutionProduct, 7.0),
            (Category::MarketOpportunity, 9.0),
            (Category::BusinessModel, 6.0),
            (Category::CompetitiveLandscape, 5.0),
            (Category::Team, 8.0),
            (Category::TractionMilestones, 4.0),
            (Category::FinancialProjections, 3.0),
            (Category::ClarityPresentation, 9.0),
        ]
        .into_iter()
        .collect();

        // 0.8*10 + 0.7*15 + 0.9*20 + 0.6*15 + 0.5*10 + 0.8*10 + 0.4*10 + 0.3*5 + 0.9*5 = 68.5
        assert_eq!(overall_score(&scores), 69);
    }

    #[test]
    fn test_missing_categories_keep_their_weight() {
        let mut scores = all_scores(10.0);
        scores.remove(&Category::MarketOpportunity);
        assert_eq!(overall_score(&scores), 80);

        // Only one category present
        let only_team: BTreeMap<Category, f64> = [(Category::Team, 10.0)].into_iter().collect();
        assert_eq!(overall_score(&only_team), 10);
    }

    #[test]
    fn test_any_subset_of_missing_categories_stays_in_range() {
        for mask in 0u32..(1 << 9) {
            let scores: BTreeMap<Category, f64> = Category::ALL
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(i, c)| (*c, (i as f64 + mask as f64) % 11.0))
                .collect();

            let expected: f64 = scores
                .iter()
                .map(|(c, s)| s * f64::from(c.weight_percent()))
                .sum::<f64>()
                / 10.0;
            let score = overall_score(&scores);
            assert_eq!(f64::from(score), expected.round(), "mask {mask:#b}");
            assert!(score <= 100);
        }
    }

    #[test]
    fn test_invalid_scores_contribute_zero() {
        let mut scores = all_scores(10.0);
        scores.insert(Category::Team, 42.0);
        scores.insert(Category::BusinessModel, f64::NAN);
        scores.insert(Category::FinancialProjections, -3.0);
        assert_eq!(overall_score(&scores), 70);
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let scores = all_scores(6.0);
        assert_eq!(overall_score(&scores), overall_score(&scores));
    }

    #[test]
    fn test_recommendation_parse() {
        assert_eq!(Recommendation::parse("Strong Buy"), Some(Recommendation::StrongBuy));
        assert_eq!(Recommendation::parse("strong_buy"), Some(Recommendation::StrongBuy));
        assert_eq!(Recommendation::parse("HOLD"), Some(Recommendation::Hold));
        assert_eq!(Recommendation::parse("pass"), Some(Recommendation::Pass));
        assert_eq!(Recommendation::parse("Buy"), None);
    }

    #[test]
    fn test_category_keys_round_trip() {
        for category in Category::ALL {
            assert_eq!(Category::from_key(category.key()), Some(category));
            let json = serde_json::to_value(category).unwrap();
            assert_eq!(json, category.key());
        }
    }
}
