use std::path::{Path, PathBuf};

use crate::model::PackageReference;
use crate::ProjectError;

/// Extension of project descriptor files.
pub const DESCRIPTOR_EXTENSION: &str = "lmproj";

/// Extension of guest-language source files.
pub const SOURCE_EXTENSION: &str = "lm";

/// Parsed contents of a `.lmproj` descriptor.
///
/// ```xml
/// <Project>
///   <ItemGroup>
///     <ProjectReference Include="../Lib/Lib.lmproj" />
///     <PackageReference Include="Contoso.Math" Version="1.2.0" />
///   </ItemGroup>
/// </Project>
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectDescriptor {
    pub path: PathBuf,
    /// `Include` values of `ProjectReference` items, as written.
    pub project_references: Vec<String>,
    pub package_references: Vec<PackageReference>,
}

impl ProjectDescriptor {
    /// Folder relative references are resolved against.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }
}

pub fn parse_descriptor(path: &Path) -> Result<ProjectDescriptor, ProjectError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ProjectError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_descriptor_str(path, &contents)
}

pub fn parse_descriptor_str(path: &Path, contents: &str) -> Result<ProjectDescriptor, ProjectError> {
    let doc = roxmltree::Document::parse(contents).map_err(|source| ProjectError::Xml {
        path: path.to_path_buf(),
        source,
    })?;

    let project = doc.root_element();
    if !project.has_tag_name("Project") {
        return Err(ProjectError::InvalidDescriptor {
            path: path.to_path_buf(),
            message: format!(
                "expected a <Project> root element, found <{}>",
                project.tag_name().name()
            ),
        });
    }

    let mut descriptor = ProjectDescriptor {
        path: path.to_path_buf(),
        ..ProjectDescriptor::default()
    };

    for item in project.descendants().filter(|n| n.is_element()) {
        let include = item
            .attribute("Include")
            .map(str::trim)
            .filter(|value| !value.is_empty());
        match (item.tag_name().name(), include) {
            ("ProjectReference", Some(include)) => {
                descriptor.project_references.push(include.to_string());
            }
            ("PackageReference", Some(include)) => {
                let version = item
                    .attribute("Version")
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string);
                descriptor
                    .package_references
                    .push(PackageReference::new(include, version));
            }
            _ => {}
        }
    }

    Ok(descriptor)
}
