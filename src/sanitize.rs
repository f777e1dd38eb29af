use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Canonical form used as the deduplication key for place names: accents
/// stripped, hyphens turned into spaces, title cased.
pub fn sanitize_place(place: &str) -> String {
    let stripped: String = place
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c == '-' { ' ' } else { c })
        .collect();
    title_case(&stripped)
}

// Uppercases the first letter of every run of letters and lowercases the rest,
// so "o'higgins" becomes "O'Higgins" and "ÎLE-DE-FRANCE" becomes "Ile De France".
fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut previous_is_letter = false;
    for c in value.chars() {
        if c.is_alphabetic() {
            if previous_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            out.push(c);
            previous_is_letter = false;
        }
    }
    out
}
