//! Visual-order repair for right-to-left tokens.
//!
//! Some extraction engines emit Hebrew and Arabic runs in visual order. This pass reverses
//! the characters of every token that contains a Hebrew (U+0590..=U+05FF) or Arabic
//! (U+0600..=U+06FF) character and, when every token is directional, also reverses the
//! token order. It is a heuristic and not an implementation of the Unicode bidi algorithm:
//! digits embedded in a directional token are reversed with it, and mixed-direction lines
//! keep their token order.

fn is_rtl_char(character: char) -> bool {
    matches!(character, '\u{0590}'..='\u{05FF}' | '\u{0600}'..='\u{06FF}')
}

fn is_rtl_token(token: &str) -> bool {
    token.chars().any(is_rtl_char)
}

pub fn fix_rtl(text: &str) -> String {
    if text.trim().is_empty() || !is_rtl_token(text) {
        return text.to_string();
    }

    let mut tokens = text
        .split_whitespace()
        .map(|token| {
            if is_rtl_token(token) {
                token.chars().rev().collect::<String>()
            } else {
                token.to_string()
            }
        })
        .collect::<Vec<String>>();

    if tokens.iter().all(|token| is_rtl_token(token)) {
        tokens.reverse();
    }

    tokens.join(" ")
}
