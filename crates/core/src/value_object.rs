//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects carry no identity of their own. A document reference
/// (`doctype` + `name`) is one: two references with the same parts point at the
/// same document and are interchangeable.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct DocumentRef {
///     doctype: String,
///     name: String,
/// }
///
/// impl ValueObject for DocumentRef {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
