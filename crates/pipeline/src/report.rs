//! PDF report rendering
//!
//! Output depends only on the [`ReportMeta`] and [`ScoringResult`] passed in,
//! so identical inputs give byte-identical documents.

use crate::errors::RenderError;
use deckforge_common::scoring::ScoringResult;
use lopdf::{dictionary, Document, Object, Stream};
use std::fmt::Write;
use std::path::Path;
use tempfile::TempPath;
use uuid::Uuid;

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN_X: f32 = 56.0;
const TOP: f32 = 780.0;
const BOTTOM: f32 = 64.0;
const FOOTER_Y: f32 = 32.0;
const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN_X;

const DISCLAIMER: &str = "This report was generated automatically from the text of the submitted \
deck by a language model. Scores are indicative only and are not investment advice. Verify every \
claim independently before making a decision.";

/// Document details that are not part of the analysis itself
#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub job_id: Uuid,
    pub deck_name: String,
}

#[derive(Clone, Copy)]
enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }
}

/// Page-by-page content stream builder
struct Layout {
    pages: Vec<String>,
    current: String,
    y: f32,
}

impl Layout {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: String::new(),
            y: TOP,
        }
    }

    fn new_page(&mut self) {
        if !self.current.is_empty() {
            self.pages.push(std::mem::take(&mut self.current));
        }
        self.y = TOP;
    }

    fn ensure(&mut self, height: f32) {
        if self.y - height < BOTTOM {
            self.new_page();
        }
    }

    fn gap(&mut self, height: f32) {
        self.y -= height;
    }

    fn line(&mut self, font: Font, size: f32, indent: f32, text: &str) {
        let leading = size * 1.4;
        self.ensure(leading);
        self.y -= leading;
        let _ = writeln!(
            self.current,
            "BT /{} {:.1} Tf {:.2} {:.2} Td ({}) Tj ET",
            font.resource(),
            size,
            MARGIN_X + indent,
            self.y,
            escape(text)
        );
    }

    fn paragraph(&mut self, font: Font, size: f32, indent: f32, text: &str) {
        for line in wrap(text, max_chars(size, indent)) {
            self.line(font, size, indent, &line);
        }
    }

    /// Bulleted item with a hanging indent
    fn bullet(&mut self, marker: &str, size: f32, text: &str) {
        let indent = 18.0;
        let mut lines = wrap(text, max_chars(size, indent)).into_iter();
        if let Some(first) = lines.next() {
            self.ensure(size * 1.4);
            let _ = writeln!(
                self.current,
                "BT /F1 {:.1} Tf {:.2} {:.2} Td ({}) Tj ET",
                size,
                MARGIN_X + 4.0,
                self.y - size * 1.4,
                escape(marker)
            );
            self.line(Font::Regular, size, indent, &first);
        }
        for line in lines {
            self.line(Font::Regular, size, indent, &line);
        }
    }

    fn heading(&mut self, text: &str) {
        self.ensure(60.0);
        self.gap(8.0);
        self.line(Font::Bold, 15.0, 0.0, text);
        self.gap(4.0);
    }

    fn finish(mut self) -> Vec<String> {
        self.new_page();
        if self.pages.is_empty() {
            self.pages.push(String::new());
        }
        self.pages
    }
}

/// Approximate Helvetica capacity of a line
fn max_chars(size: f32, indent: f32) -> usize {
    (((CONTENT_WIDTH - indent) / (size * 0.5)) as usize).max(10)
}

/// Greedy word wrap; words longer than a line are split
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for raw_line in text.lines() {
        let mut current = String::new();
        for word in raw_line.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > width {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                lines.push(word.drain(..width).collect());
            }
            let word: String = word.into_iter().collect();
            if current.is_empty() {
                current = word;
            } else if current.chars().count() + 1 + word.chars().count() <= width {
                current.push(' ');
                current.push_str(&word);
            } else {
                lines.push(std::mem::replace(&mut current, word));
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }
    lines
}

/// Map text onto the WinAnsi-safe ASCII subset and escape PDF string delimiters
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{201C}' | '\u{201D}' => out.push('"'),
            '\u{2013}' | '\u{2014}' | '\u{2022}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            c if c.is_ascii() && !c.is_control() => out.push(c),
            c if c.is_whitespace() => out.push(' '),
            _ => out.push('?'),
        }
    }
    out
}

/// Renders a scoring result to PDF
#[derive(Debug, Clone)]
pub struct ReportRenderer {
    title: String,
}

impl Default for ReportRenderer {
    fn default() -> Self {
        Self {
            title: "Pitch Deck Analysis".to_string(),
        }
    }
}

impl ReportRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn layout(&self, meta: &ReportMeta, result: &ScoringResult) -> Vec<String> {
        let mut layout = Layout::new();

        // Summary page
        layout.line(Font::Bold, 22.0, 0.0, &self.title);
        layout.gap(6.0);
        layout.paragraph(Font::Regular, 11.0, 0.0, &format!("Deck: {}", meta.deck_name));
        layout.line(Font::Regular, 9.0, 0.0, &format!("Report ID: {}", meta.job_id));
        layout.line(Font::Regular, 9.0, 0.0, &format!("Processed: {}", result.processed_at));

        layout.heading("Summary");
        layout.line(Font::Bold, 13.0, 0.0, &format!("Recommendation: {}", result.recommendation));
        layout.line(Font::Bold, 13.0, 0.0, &format!("Overall score: {}/100", result.overall_score));
        layout.line(Font::Regular, 11.0, 0.0, &format!("Confidence: {}%", result.confidence));

        layout.heading("Scores by category");
        for assessment in &result.categories {
            let score = if assessment.assessed {
                format!("{}/10", assessment.score)
            } else {
                "0/10 (not assessed)".to_string()
            };
            layout.line(
                Font::Regular,
                10.0,
                0.0,
                &format!(
                    "{} ({}%): {}",
                    assessment.category.label(),
                    assessment.category.weight_percent(),
                    score
                ),
            );
        }

        layout.heading("Disclaimer");
        layout.paragraph(Font::Regular, 9.0, 0.0, DISCLAIMER);

        // Category detail
        layout.new_page();
        layout.line(Font::Bold, 18.0, 0.0, "Category Assessments");
        for assessment in &result.categories {
            layout.heading(&format!(
                "{} ({}% weight)",
                assessment.category.label(),
                assessment.category.weight_percent()
            ));
            let score = if assessment.assessed {
                format!("Score: {}/10", assessment.score)
            } else {
                "Score: 0/10 (not covered in the analysis)".to_string()
            };
            layout.line(Font::Bold, 11.0, 0.0, &score);
            let feedback = if assessment.feedback.is_empty() {
                "No feedback provided."
            } else {
                assessment.feedback.as_str()
            };
            layout.paragraph(Font::Regular, 10.0, 0.0, feedback);
        }

        layout.new_page();
        layout.line(Font::Bold, 18.0, 0.0, "Strengths and Weaknesses");
        layout.heading("Strengths");
        for (i, strength) in result.strengths.iter().enumerate() {
            layout.bullet(&format!("{}.", i + 1), 10.0, strength);
        }
        layout.heading("Weaknesses");
        for (i, weakness) in result.weaknesses.iter().enumerate() {
            layout.bullet(&format!("{}.", i + 1), 10.0, weakness);
        }

        layout.heading("Due Diligence Recommendations");
        layout.paragraph(Font::Regular, 10.0, 0.0, &result.due_diligence);

        layout.finish()
    }

    /// Render to PDF bytes
    pub fn render(&self, meta: &ReportMeta, result: &ScoringResult) -> Result<Vec<u8>, RenderError> {
        let pages = self.layout(meta, result);
        let total = pages.len();

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let regular_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => regular_id,
                "F2" => bold_id,
            },
        });

        let mut page_ids = Vec::with_capacity(total);
        for (i, body) in pages.into_iter().enumerate() {
            let mut content = body;
            let footer = format!("Page {} of {}", i + 1, total);
            let _ = writeln!(
                content,
                "BT /F1 9.0 Tf {:.2} {:.2} Td ({}) Tj ET",
                PAGE_WIDTH - MARGIN_X - footer.len() as f32 * 4.5,
                FOOTER_Y,
                footer
            );
            let _ = writeln!(
                content,
                "BT /F1 9.0 Tf {:.2} {:.2} Td ({}) Tj ET",
                MARGIN_X,
                FOOTER_Y,
                escape(&self.title)
            );

            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), (PAGE_WIDTH as i64).into(), (PAGE_HEIGHT as i64).into()],
                "Resources" => resources_id,
                "Contents" => content_id,
            });
            page_ids.push(page_id);
        }

        let kids: Vec<Object> = page_ids.iter().map(|id| (*id).into()).collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_ids.len() as i64,
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal(format!("{} - {}", self.title, meta.deck_name)),
            "Producer" => Object::string_literal("DeckForge"),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer)?;
        Ok(buffer)
    }

    /// Render into a temp file under `dir`; the file is removed when the path is dropped
    pub async fn render_to_temp(
        &self,
        dir: &Path,
        meta: &ReportMeta,
        result: &ScoringResult,
    ) -> Result<TempPath, RenderError> {
        let bytes = self.render(meta, result)?;

        tokio::fs::create_dir_all(dir).await?;
        let path = tempfile::Builder::new()
            .prefix("report-")
            .suffix(".pdf")
            .tempfile_in(dir)?
            .into_temp_path();
        tokio::fs::write(&path, &bytes).await?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckforge_common::scoring::{Category, CategoryAssessment, Recommendation};

    fn result() -> ScoringResult {
        let mut result = ScoringResult {
            categories: Category::ALL
                .iter()
                .map(|c| CategoryAssessment {
                    category: *c,
                    score: 7,
                    feedback: format!("{} is covered (well) \u{2014} mostly.", c.label()),
                    assessed: *c != Category::FinancialProjections,
                })
                .collect(),
            strengths: vec!["Strong team".into(), "Big market".into(), "Clear ask".into()],
            weaknesses: vec!["Thin traction".into(), "Crowded".into(), "Vague financials".into()],
            recommendation: Recommendation::StrongBuy,
            confidence: 81,
            due_diligence: "Call three reference customers.\nReview the cap table.".into(),
            processed_at: "2024-05-01T12:00:00Z".into(),
            overall_score: 0,
        };
        result.recompute_overall();
        result
    }

    fn meta() -> ReportMeta {
        ReportMeta {
            job_id: Uuid::nil(),
            deck_name: "Acme Series A.pptx".into(),
        }
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let renderer = ReportRenderer::new();
        let input = result();
        let a = renderer.render(&meta(), &input).unwrap();
        let b = renderer.render(&meta(), &input).unwrap();
        assert_eq!(a, b);
        assert_eq!(input, result());
    }

    #[test]
    fn test_pages_are_numbered() {
        let bytes = ReportRenderer::new().render(&meta(), &result()).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        let pages = doc.get_pages();
        assert!(pages.len() >= 3, "expected summary, categories and findings pages");

        let total = pages.len();
        for (number, page_id) in pages {
            let content = doc.get_page_content(page_id).unwrap();
            let text = String::from_utf8_lossy(&content);
            assert!(text.contains(&format!("(Page {} of {})", number, total)), "page {number}");
        }
    }

    #[test]
    fn test_summary_page_content() {
        let bytes = ReportRenderer::new().render(&meta(), &result()).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        let first = *doc.get_pages().get(&1).unwrap();
        let text = String::from_utf8_lossy(&doc.get_page_content(first).unwrap()).to_string();

        assert!(text.contains("(Recommendation: Strong Buy)"));
        assert!(text.contains("(Confidence: 81%)"));
        assert!(text.contains("Overall score: "));
        assert!(text.contains("not assessed"));
    }

    #[test]
    fn test_long_feedback_spills_onto_more_pages() {
        let mut long = result();
        for c in &mut long.categories {
            c.feedback = "word ".repeat(600);
        }
        let short_pages = Document::load_mem(&ReportRenderer::new().render(&meta(), &result()).unwrap())
            .unwrap()
            .get_pages()
            .len();
        let long_pages = Document::load_mem(&ReportRenderer::new().render(&meta(), &long).unwrap())
            .unwrap()
            .get_pages()
            .len();
        assert!(long_pages > short_pages);
    }

    #[test]
    fn test_escape_and_wrap() {
        assert_eq!(escape("a (b) \\ \u{2019}c\u{2019} \u{00e9}"), "a \\(b\\) \\\\ 'c' ?");
        let lines = wrap("alpha beta gamma delta", 11);
        assert_eq!(lines, vec!["alpha beta", "gamma delta"]);
        assert_eq!(wrap("abcdefghijkl", 5), vec!["abcde", "fghij", "kl"]);
    }

    #[tokio::test]
    async fn test_temp_report_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = ReportRenderer::new()
            .render_to_temp(dir.path(), &meta(), &result())
            .await
            .unwrap();
        let on_disk = path.to_path_buf();
        assert!(std::fs::read(&on_disk).unwrap().starts_with(b"%PDF-1.5"));
        drop(path);
        assert!(!on_disk.exists());
    }
}
