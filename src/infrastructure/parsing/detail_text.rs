//! Activity field extraction from the detail modal text

use crate::infrastructure::config::qkb;

/// Returns the activity description that follows the `Objekti i aktivitetit` label.
///
/// Lines after the label are trimmed and joined with single spaces until a blank
/// line or one of the labels that follow the field. Missing label yields "".
pub fn extract_activity(modal_text: &str) -> String {
    extract_field(modal_text, qkb::ACTIVITY_LABEL, qkb::DETAIL_BOUNDARY_LABELS)
}

pub fn extract_field(text: &str, label: &str, boundaries: &[&str]) -> String {
    let mut lines = text.lines().skip_while(|line| !line.contains(label));
    if lines.next().is_none() {
        return String::new();
    }

    lines
        .map(str::trim)
        .take_while(|line| !line.is_empty() && !boundaries.contains(line))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const FULL_DUMP: &str = "Detaje subjekti
Emri i subjektit
ALPHA SOFT SHPK
NIPT
L91234567A
Objekti i aktivitetit
Zhvillim software dhe aplikacione web,
konsulence ne teknologji informacioni.
Administrator/ Ortak/ Aksionar
Arben Hoxha
Qyteti
Tiranë";

    #[rstest]
    #[case::stops_at_boundary_label(
        FULL_DUMP,
        "Zhvillim software dhe aplikacione web, konsulence ne teknologji informacioni."
    )]
    #[case::stops_at_blank_line(
        "Objekti i aktivitetit\n  Hosting   \n\nPronësia\nPrivate",
        "Hosting"
    )]
    #[case::label_with_suffix("Objekti i aktivitetit:\nProgramim\nEkstrakt RPP", "Programim")]
    #[case::label_missing("Emri\nBeta\nQyteti\nDurrës", "")]
    #[case::label_at_end("Objekti i aktivitetit", "")]
    #[case::boundary_right_after_label("Objekti i aktivitetit\nQyteti\nFier", "")]
    fn extracts_activity(#[case] dump: &str, #[case] expected: &str) {
        assert_eq!(extract_activity(dump), expected);
    }

    #[test]
    fn first_label_wins() {
        let dump = "Objekti i aktivitetit\nCloud\n\nObjekti i aktivitetit\nOther";
        assert_eq!(extract_activity(dump), "Cloud");
    }

    #[test]
    fn boundary_must_match_whole_line() {
        let dump = "Objekti i aktivitetit\nSherbime ne Qytetin e Tiranes\nEkstrakt historik";
        assert_eq!(extract_activity(dump), "Sherbime ne Qytetin e Tiranes");
    }
}
