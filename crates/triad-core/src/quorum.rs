//! Quorum comparator
//!
//! Replies from independent computors are compared on their raw wire bytes.
//! Semantically equal but differently serialized replies are deliberately
//! not coalesced; computors are assumed to serialize identically.

/// Size of the largest group of byte-identical present payloads.
///
/// Absent slots contribute nothing. Ties break unobservably since only the
/// maximum matters.
pub fn quorum_size(slots: &[Option<Vec<u8>>]) -> usize {
    let mut best = 0;
    for (i, slot) in slots.iter().enumerate() {
        let Some(payload) = slot else { continue };
        let count = slots[i..]
            .iter()
            .filter(|s| s.as_deref() == Some(payload.as_slice()))
            .count();
        best = best.max(count);
    }
    best
}

/// The payload of the largest equal group, with its multiplicity.
///
/// Returns `None` when every slot is absent.
pub fn quorum_mode(slots: &[Option<Vec<u8>>]) -> Option<(&[u8], usize)> {
    let mut best: Option<(&[u8], usize)> = None;
    for (i, slot) in slots.iter().enumerate() {
        let Some(payload) = slot else { continue };
        let count = slots[i..]
            .iter()
            .filter(|s| s.as_deref() == Some(payload.as_slice()))
            .count();
        if best.map_or(true, |(_, n)| count > n) {
            best = Some((payload.as_slice(), count));
        }
    }
    best
}
