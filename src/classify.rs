//! Segmentation of raw generative output into structured content.
//!
//! Two explicit passes over the text: first the fenced code block, then
//! the `[Explanation]...[/Explanation]` block. Only the first occurrence
//! of each is recognized; an opener without a matching closer is treated
//! as not found and left in place.

use crate::knowledge::ResponseKind;
use std::ops::Range;

const FENCE: &str = "```";
const EXPLANATION_OPEN: &str = "[Explanation]";
const EXPLANATION_CLOSE: &str = "[/Explanation]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub kind: ResponseKind,
    pub content: String,
    pub explanation: String,
}

/// Classify raw fallback text into (kind, content, explanation).
///
/// If a code block is present its inner text wins as the content and the
/// rest of the response is discarded; otherwise the content is whatever
/// remains after excising the explanation block.
pub fn classify(raw_text: &str) -> Classified {
    let code = find_code_block(raw_text);
    let explanation = find_explanation_block(raw_text);

    if let Some((_, code_text)) = code {
        return Classified {
            kind: ResponseKind::Code,
            content: code_text,
            explanation: explanation.map(|(_, text)| text).unwrap_or_default(),
        };
    }

    match explanation {
        Some((span, text)) => {
            let mut remainder = String::with_capacity(raw_text.len());
            remainder.push_str(&raw_text[..span.start]);
            remainder.push_str(&raw_text[span.end..]);

            Classified {
                kind: ResponseKind::Text,
                content: remainder.trim().to_string(),
                explanation: text,
            }
        }
        None => Classified {
            kind: ResponseKind::Text,
            content: raw_text.trim().to_string(),
            explanation: String::new(),
        },
    }
}

/// Locate the first fenced code block. Returns the byte span of the
/// whole block and its inner text with any language tag stripped.
fn find_code_block(text: &str) -> Option<(Range<usize>, String)> {
    let open = text.find(FENCE)?;
    let inner_start = open + FENCE.len();
    let close_rel = text[inner_start..].find(FENCE)?;
    let inner = &text[inner_start..inner_start + close_rel];

    // A language tag only exists when the opener line ends before the
    // closer; a single word alone on that line is the tag, anything
    // else is code.
    let inner = match inner.find('\n') {
        Some(newline) if is_language_tag(inner[..newline].trim()) => &inner[newline + 1..],
        _ => inner,
    };

    let span = open..inner_start + close_rel + FENCE.len();
    Some((span, inner.trim().to_string()))
}

fn is_language_tag(candidate: &str) -> bool {
    candidate
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '+' || c == '#')
}

/// Locate the first `[Explanation]...[/Explanation]` block. Returns the
/// byte span of the whole block and its trimmed inner text.
fn find_explanation_block(text: &str) -> Option<(Range<usize>, String)> {
    let open = text.find(EXPLANATION_OPEN)?;
    let inner_start = open + EXPLANATION_OPEN.len();
    let close_rel = text[inner_start..].find(EXPLANATION_CLOSE)?;
    let inner = &text[inner_start..inner_start + close_rel];

    let span = open..inner_start + close_rel + EXPLANATION_CLOSE.len();
    Some((span, inner.trim().to_string()))
}
