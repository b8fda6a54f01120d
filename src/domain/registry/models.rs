//! Domain-internal types shared between the coordinators and the publish
//! pipeline.

/// Kind of a captured entry-store mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A new entry was claimed. Not a republish trigger.
    Insert,
    /// An existing entry changed (a revocation was applied).
    Modify,
    /// An entry was removed (expiry cleanup).
    Remove,
}

/// A single captured mutation of the entry store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub uri: String,
    pub idx: u32,
}

impl ChangeEvent {
    /// Only modifications and removals trigger a republish.
    pub fn triggers_republish(&self) -> bool {
        matches!(self.kind, ChangeKind::Modify | ChangeKind::Remove)
    }
}

/// Result of the store's conditional revocation write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    /// `revokedAt` was set to the given timestamp by this call.
    Applied(i64),
    /// `revokedAt` was already set; the original timestamp is returned and
    /// never overwritten.
    AlreadyRevoked(i64),
}

/// Outcome of a revocation request, as surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevocationResult {
    pub already_revoked: bool,
    pub revoked_at: i64,
}
