use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::transport::wire::ToolCallFragment;
use crate::types::ToolCall;

/// Merges fragmented tool-call deltas of one streamed turn, keyed by index.
///
/// Owned by a single turn's pipeline; never shared and never reused across
/// resubmissions.
#[derive(Debug, Default)]
pub struct ToolCallReconstructor {
    calls: BTreeMap<u32, ToolCall>,
}

impl ToolCallReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first fragment for an index seeds id, type and name. Later ones
    /// only append their argument slice, and only when it is non-empty.
    pub fn merge(&mut self, fragment: &ToolCallFragment) {
        let function = fragment.function.as_ref();
        let slice = function
            .and_then(|f| f.arguments.as_deref())
            .unwrap_or("");

        let index = fragment.index.unwrap_or(0);
        match self.calls.entry(index) {
            Entry::Vacant(entry) => {
                entry.insert(ToolCall {
                    index,
                    id: fragment.id.clone().unwrap_or_default(),
                    call_type: fragment
                        .call_type
                        .clone()
                        .unwrap_or_else(|| "function".to_string()),
                    name: function.and_then(|f| f.name.clone()).unwrap_or_default(),
                    arguments: slice.to_string(),
                });
            }
            Entry::Occupied(mut entry) => {
                if !slice.is_empty() {
                    entry.get_mut().arguments.push_str(slice);
                }
            }
        }
    }

    pub fn merge_all(&mut self, fragments: &[ToolCallFragment]) {
        for fragment in fragments {
            self.merge(fragment);
        }
    }

    /// Current calls in ascending index order.
    pub fn snapshot(&self) -> Vec<ToolCall> {
        self.calls.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }
}
