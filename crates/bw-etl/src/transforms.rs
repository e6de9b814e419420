//! Trait forms of the stage functions
//!
//! Every stage method on [`PipelineStep`](crate::PipelineStep) also accepts a
//! plain closure; these traits are for stages that carry state or are picked
//! at run time.

use crate::Consuming;

/// Folds the whole upstream sequence into a single value
pub trait Aggregator<T, U>: Send {
    fn aggregate(&mut self, items: Consuming<'_, T>) -> anyhow::Result<U>;
}

/// Expands one item into zero or more items
pub trait Pivot<T, U>: Send {
    fn pivot(&mut self, item: T) -> anyhow::Result<Vec<U>>;
}

/// Maps one item to exactly one item
pub trait Projector<T, U>: Send {
    fn project(&mut self, item: T) -> anyhow::Result<U>;
}

/// Mutates an item in place
pub trait Transformer<T>: Send {
    fn transform(&mut self, item: &mut T) -> anyhow::Result<()>;
}
