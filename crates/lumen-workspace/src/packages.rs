use std::fmt;

use lumen_project::PackageReference;
use lumen_refs::{LibraryError, LibraryHandle, LibraryLoader};

/// Maps package coordinates to the libraries they provide.
///
/// Fetching packages is outside the workspace; an implementation reports what is already
/// available locally.
pub trait PackageResolver: Send + Sync + fmt::Debug {
    fn resolve(&self, package: &PackageReference) -> Result<Vec<LibraryHandle>, LibraryError>;
}

/// Resolves every package to nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPackageResolver;

impl PackageResolver for NoopPackageResolver {
    fn resolve(&self, _package: &PackageReference) -> Result<Vec<LibraryHandle>, LibraryError> {
        Ok(Vec::new())
    }
}

/// Treats a package as the library of the same name, loaded through `L`.
#[derive(Debug)]
pub struct LibraryPackageResolver<L> {
    loader: L,
}

impl<L: LibraryLoader> LibraryPackageResolver<L> {
    pub fn new(loader: L) -> Self {
        Self { loader }
    }
}

impl<L: LibraryLoader> PackageResolver for LibraryPackageResolver<L> {
    fn resolve(&self, package: &PackageReference) -> Result<Vec<LibraryHandle>, LibraryError> {
        Ok(vec![self.loader.load(&package.name)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_test_utils::StaticLibraryLoader;

    #[test]
    fn library_resolver_loads_the_package_name() {
        let resolver =
            LibraryPackageResolver::new(StaticLibraryLoader::new(&[("Contoso.Math", &[])]));

        let handles = resolver
            .resolve(&"Contoso.Math::1.2.0".parse().unwrap())
            .unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].identity(), "Contoso.Math");

        assert!(matches!(
            resolver.resolve(&PackageReference::new("Missing", None)),
            Err(LibraryError::NotFound { .. })
        ));
        assert!(NoopPackageResolver
            .resolve(&PackageReference::new("Missing", None))
            .unwrap()
            .is_empty());
    }
}
