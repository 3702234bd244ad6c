use arc_swap::ArcSwap;
use std::sync::Arc;

/// A type alias for a value shared between tasks and replaced wholesale by atomic swaps.
pub type GlobalShared<T> = Arc<ArcSwap<T>>;
