//! Logical process identity: `(upid, round)` encoded as `"<upid>-<round>"`.

pub fn make_id(upid: &str, round: impl std::fmt::Display) -> String {
    format!("{}-{}", upid, round)
}

/// Split an encoded id on its last hyphen. The upid may itself contain
/// hyphens, the round may not. Returns `None` when there is no hyphen.
pub fn unmake_id(id: &str) -> Option<(&str, &str)> {
    id.rsplit_once('-')
}
