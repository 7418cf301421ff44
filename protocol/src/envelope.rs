//! Session envelope: the leading SSE comment line carrying the session id.
//!
//! Unlike a general-purpose event envelope that stamps every frame with
//! session/node/sequence fields, the bit-exact frame format this runtime
//! targets (runtime spec §6) carries the session id exactly once, as a
//! leading comment, and leaves each event's JSON body untouched.

/// Builds the leading `: session_id=<uuid>\n\n` comment line emitted before
/// any event on a session's SSE stream.
pub fn session_comment_line(session_id: &str) -> String {
    format!(": session_id={session_id}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_comment_line_matches_bit_level_format() {
        assert_eq!(
            session_comment_line("abc-123"),
            ": session_id=abc-123\n\n"
        );
    }
}
