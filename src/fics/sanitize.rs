//! Line sanitizer: strips protocol noise from raw server output.
//!
//! FICS output arrives with `\n\r` line endings, stray bells, NUL padding,
//! an echo-suppression sequence and the `fics%` prompt itself. None of that
//! is meaningful to the decoder.

/// Echo-suppression sequence emitted around hidden input.
const ECHO_SUPPRESS: &[u8] = b"\\   ";

/// Command prompt marker.
pub const PROMPT: &str = "fics%";

/// Remove control noise and the prompt marker, then trim surrounding
/// whitespace.
///
/// Removal repeats until nothing matches, so removing one pattern can never
/// leave another behind and `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(raw: &[u8]) -> Vec<u8> {
    let mut out: Vec<u8> = raw.iter().copied().filter(|&b| !is_noise_byte(b)).collect();
    loop {
        let before = out.len();
        out = remove_all(&out, ECHO_SUPPRESS);
        out = remove_all(&out, PROMPT.as_bytes());
        if out.len() == before {
            break;
        }
    }
    out.trim_ascii().to_vec()
}

/// C0 control bytes other than newline and tab (BEL, NUL, CR, ...).
fn is_noise_byte(b: u8) -> bool {
    b.is_ascii_control() && b != b'\n' && b != b'\t'
}

fn remove_all(haystack: &[u8], needle: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}
