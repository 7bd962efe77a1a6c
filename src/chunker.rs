//! Greedy word-boundary text segmentation.
//!
//! Documents are split left to right into chunks of at most `max_len`
//! characters. A chunk boundary prefers the last whitespace inside the
//! window; only when a window contains no whitespace at all is a token cut
//! mid-word. Chunks never overlap.

/// Compose the text that gets chunked and embedded. Keeping the title in
/// front of the body means every chunk retains document context.
pub fn document_text(title: &str, body: &str) -> String {
    format!("{title}\n\n{body}")
}

/// Split `text` into chunks of at most `max_len` characters.
///
/// Lengths are counted in characters, not bytes, so multi-byte input is
/// never cut inside a code point. Leading whitespace is trimmed off each
/// remainder, so no chunk after the first starts with whitespace.
pub fn chunk(text: &str, max_len: usize) -> Vec<String> {
    debug_assert!(max_len > 0);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        // byte offset just past the max_len-th character, if that many exist
        let window_end = rest
            .char_indices()
            .nth(max_len)
            .map(|(byte_idx, _)| byte_idx);

        let Some(window_end) = window_end else {
            chunks.push(rest.to_string());
            break;
        };

        let window = &rest[..window_end];
        match window.rfind(char::is_whitespace) {
            Some(ws_idx) => {
                // runs of whitespace collapse into the boundary
                let piece = rest[..ws_idx].trim_end();
                if !piece.is_empty() {
                    chunks.push(piece.to_string());
                }
                rest = rest[ws_idx..].trim_start();
            }
            None => {
                // no whitespace in the whole window, forced mid-token cut
                chunks.push(window.to_string());
                rest = rest[window_end..].trim_start();
            }
        }
    }

    chunks
}
