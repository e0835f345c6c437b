use crate::types::{ChatResponse, Usage};

/// Usage of the current response plus the final usage of the turn that
/// preceded it in the tool loop.
///
/// Call once per resolved response. Chunks of the same stream are never
/// summed with each other; providers report a turn's usage once.
pub fn cumulative_usage(current: Option<&Usage>, previous: Option<&ChatResponse>) -> Usage {
    let mut total = previous.map(|r| r.metadata.usage).unwrap_or_default();
    if let Some(current) = current {
        total.accumulate(current);
    }
    total
}
