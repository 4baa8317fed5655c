/// Resolves the object types that declare a dependency on a given type.
///
/// The version store consults this before taking its write lock, so
/// implementations may take their own locks freely.
pub trait DependencyResolver: Send + Sync {
    /// Full names of every type whose dependency list names `full_name`.
    fn dependents_of(&self, full_name: &str) -> Vec<String>;
}

/// Resolver for deployments without dependency declarations.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDependencies;

impl DependencyResolver for NoDependencies {
    fn dependents_of(&self, _full_name: &str) -> Vec<String> {
        Vec::new()
    }
}

impl<F> DependencyResolver for F
where
    F: Fn(&str) -> Vec<String> + Send + Sync,
{
    fn dependents_of(&self, full_name: &str) -> Vec<String> {
        self(full_name)
    }
}
