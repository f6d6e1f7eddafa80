//! Scoring prompt

use crate::extraction::Slide;
use deckforge_common::scoring::Category;
use std::fmt::Write;

pub const SYSTEM_PROMPT: &str = "You are an experienced venture capital analyst. \
You evaluate startup pitch decks rigorously and fairly, and you always answer \
with a single JSON object and nothing else.";

/// One chat completion request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
}

/// Build the scoring request for a deck.
///
/// `processed_at` is echoed back by the model as `processedAt`.
pub fn build_request(slides: &[Slide], processed_at: &str) -> CompletionRequest {
    let mut prompt = String::from(
        "Evaluate the following startup pitch deck as a potential investor.\n\n\
         Score each category from 0 (absent or very weak) to 10 (exceptional) using this rubric:\n",
    );

    for category in Category::ALL {
        let _ = writeln!(
            prompt,
            "- {} (key \"{}\", weight {}%)",
            category.label(),
            category.key(),
            category.weight_percent()
        );
    }

    prompt.push_str(
        "\nRespond with exactly one JSON object of this shape:\n\
         {\n  \"categories\": {\n",
    );
    for (i, category) in Category::ALL.iter().enumerate() {
        let comma = if i + 1 < Category::ALL.len() { "," } else { "" };
        let _ = writeln!(
            prompt,
            "    \"{}\": {{ \"score\": <integer 0-10>, \"feedback\": \"<2-4 sentences>\" }}{}",
            category.key(),
            comma
        );
    }
    let _ = write!(
        prompt,
        "  }},\n  \"strengths\": [\"<3 to 5 short strengths, most important first>\"],\n  \
         \"weaknesses\": [\"<3 to 5 short weaknesses, most important first>\"],\n  \
         \"recommendation\": \"Strong Buy\" | \"Hold\" | \"Pass\",\n  \
         \"confidence\": <integer 0-100>,\n  \
         \"dueDiligence\": \"<what an investor should verify next>\",\n  \
         \"processedAt\": \"{}\"\n}}\n\n\
         Use only the information in the deck. Escape any double quotes inside strings.\n\n\
         Deck content ({} slides):\n",
        processed_at,
        slides.len()
    );

    for slide in slides {
        let _ = write!(prompt, "\n--- Slide {} ---\n", slide.slide);
        let text = slide.text.trim();
        prompt.push_str(if text.is_empty() { "(no text)" } else { text });
        prompt.push('\n');
        if let Some(notes) = slide.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            let _ = writeln!(prompt, "Speaker notes: {}", notes);
        }
    }

    CompletionRequest {
        system: SYSTEM_PROMPT.to_string(),
        prompt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slide(n: u32, text: &str, notes: Option<&str>) -> Slide {
        Slide {
            slide: n,
            text: text.to_string(),
            notes: notes.map(String::from),
            stats: None,
        }
    }

    #[test]
    fn test_prompt_embeds_rubric_and_slides() {
        let slides = vec![
            slide(1, "Acme Robotics", Some("Founder story")),
            slide(2, "  ", None),
        ];
        let request = build_request(&slides, "2024-05-01T12:00:00Z");

        for category in Category::ALL {
            assert!(request.prompt.contains(category.key()));
        }
        assert!(request.prompt.contains("weight 20%"));
        assert!(request.prompt.contains("--- Slide 1 ---\nAcme Robotics"));
        assert!(request.prompt.contains("Speaker notes: Founder story"));
        assert!(request.prompt.contains("--- Slide 2 ---\n(no text)"));
        assert!(request.prompt.contains("\"processedAt\": \"2024-05-01T12:00:00Z\""));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let slides = vec![slide(1, "A", None)];
        assert_eq!(build_request(&slides, "t"), build_request(&slides, "t"));
    }
}
