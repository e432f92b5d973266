//! Read model trait for query-side views.

/// A read model providing query access to denormalized data.
pub trait ReadModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of entries, or 0 while a writer holds the view.
    fn count(&self) -> usize;
}
