use serde::de::DeserializeOwned;
use serde::Serialize;

/// An event emitted by an [`crate::Aggregate`].
///
/// The `event_type` is persisted next to the payload, and lets projections skip the events they
/// are not interested in without deserializing them.
pub trait Event: Serialize + DeserializeOwned {
    /// The name stored alongside the payload. Defaults to the type name without its module path.
    ///
    /// Enums with many variants usually override this to return one name per variant.
    fn event_type(&self) -> &'static str {
        short_type_name::<Self>()
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full: &'static str = std::any::type_name::<T>();
    let without_generics: &'static str = full.split('<').next().unwrap_or(full);
    without_generics.rsplit("::").next().unwrap_or(without_generics)
}
