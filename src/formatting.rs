//! Transcript formatting for web display.

/// Line-break markup substituted for `\n` in transcripts.
pub const LINE_BREAK_MARKUP: &str = "<br>";

/// Prepare a raw transcript for the browser.
///
/// Blank input yields an empty string. Otherwise surrounding whitespace is
/// trimmed and each `\n` becomes [`LINE_BREAK_MARKUP`]. Nothing else is
/// touched: no normalization, no escaping, no truncation.
pub fn format_transcript(transcript: &str) -> String {
    let trimmed = transcript.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    trimmed.replace('\n', LINE_BREAK_MARKUP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert_eq!(format_transcript(""), "");
        assert_eq!(format_transcript("  \n\t "), "");
    }

    #[test]
    fn test_trims_surrounding_whitespace() {
        assert_eq!(format_transcript(" നമസ്കാരം "), "നമസ്കാരം");
    }

    #[test]
    fn test_replaces_every_newline_and_nothing_else() {
        let raw = "ഒന്ന്\nരണ്ട്\n\nമൂന്ന് <b>&</b>";
        let formatted = format_transcript(raw);

        assert_eq!(formatted, "ഒന്ന്<br>രണ്ട്<br><br>മൂന്ന് <b>&</b>");
        assert!(!formatted.contains('\n'));
        assert_eq!(formatted.replace(LINE_BREAK_MARKUP, "\n"), raw);
    }
}
