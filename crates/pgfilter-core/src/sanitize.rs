//! Text sanitizing shared by the admission controller and the event sink.

/// Collapse `text` onto a single line.
///
/// Carriage returns are dropped, newlines and every other control character
/// except tab become a space. NUL never survives, so the result can also be
/// embedded in a NUL-terminated protocol string.
pub fn single_line(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '\r')
        .map(|c| if c.is_control() && c != '\t' { ' ' } else { c })
        .collect()
}
