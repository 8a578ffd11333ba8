// The raw unit of work leased from the queue.

/// A message leased from the work queue.
///
/// The queue source owns a message from receipt until it is either deleted
/// (after successful handling, or after every parser rejected it) or
/// dropped; a dropped message becomes visible to other receivers again once
/// its lease expires. Cloning is cheap enough that commands keep a copy of
/// their originating message for later deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Queue-assigned unique message id, used in log lines.
    pub id: String,
    /// Opaque payload exactly as received from the queue.
    pub body: String,
    /// Receipt handle identifying this particular lease for deletion.
    pub receipt_handle: String,
}

impl RawMessage {
    pub fn new(
        id: impl Into<String>,
        body: impl Into<String>,
        receipt_handle: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            receipt_handle: receipt_handle.into(),
        }
    }
}
