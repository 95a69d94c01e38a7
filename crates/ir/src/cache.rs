//! Storage reused across the compilations done by one worker.
use cranelift_entity::{PrimaryMap, SecondaryMap};

use crate::{Block, BlockId, Location, Value, ValueId};

/// Arena storage handed from one [`crate::Func`] to the next.
///
/// A worker owns exactly one cache: pass it to [`crate::Func::with_cache`]
/// and get it back from [`crate::Func::into_cache`]. Caches are never shared
/// between threads while in use.
#[derive(Default)]
pub struct Cache {
    pub(crate) blocks: PrimaryMap<BlockId, Block>,
    pub(crate) values: PrimaryMap<ValueId, Value>,
    pub(crate) locations: SecondaryMap<ValueId, Option<Location>>,
    pub(crate) value_lists: Vec<Vec<ValueId>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }
}
