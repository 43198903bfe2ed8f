//! Logical resource names and the paths they resolve to.

use std::fmt;
use url::form_urlencoded;

/// A remote resource.
///
/// Known resources map to fixed paths; any other name resolves through the
/// generic `/api/api_<name>.php` template, and `Path` addresses an explicit
/// path directly. Every value resolves to some path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
  Categories,
  Sections,
  Dashboard,
  Models,
  Users,
  Softs,
  Formats,
  Colors,
  Materials,
  /// Unmapped name, resolved through the generic template
  Named(String),
  /// Explicit path relative to the API base URL
  Path(String),
}

impl Resource {
  /// Map a caller key to a resource. Never fails.
  pub fn from_key(key: &str) -> Self {
    match key {
      "categories" => Resource::Categories,
      "sections" => Resource::Sections,
      "dashboard" => Resource::Dashboard,
      "models" => Resource::Models,
      "users" => Resource::Users,
      "softs" => Resource::Softs,
      "formats" => Resource::Formats,
      "colors" => Resource::Colors,
      "materials" => Resource::Materials,
      other => Resource::Named(other.to_string()),
    }
  }

  pub fn name(&self) -> &str {
    match self {
      Resource::Categories => "categories",
      Resource::Sections => "sections",
      Resource::Dashboard => "dashboard",
      Resource::Models => "models",
      Resource::Users => "users",
      Resource::Softs => "softs",
      Resource::Formats => "formats",
      Resource::Colors => "colors",
      Resource::Materials => "materials",
      Resource::Named(name) => name,
      Resource::Path(path) => path,
    }
  }

  /// Path relative to the API base URL, always starting with `/`.
  pub fn path(&self) -> String {
    match self {
      Resource::Categories => "/categories.json".to_string(),
      Resource::Sections => "/sections.json".to_string(),
      Resource::Dashboard => "/dashboard.json".to_string(),
      Resource::Models => "/models.json".to_string(),
      Resource::Users => "/users.json".to_string(),
      Resource::Softs | Resource::Formats | Resource::Colors | Resource::Materials => {
        format!("/api_{}.php", self.name())
      }
      Resource::Named(name) => {
        let encoded: String = form_urlencoded::byte_serialize(name.as_bytes()).collect();
        format!("/api/api_{}.php", encoded)
      }
      Resource::Path(path) if path.starts_with('/') => path.clone(),
      Resource::Path(path) => format!("/{}", path),
    }
  }
}

impl From<&str> for Resource {
  fn from(key: &str) -> Self {
    Resource::from_key(key)
  }
}

impl fmt::Display for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_known_resources() {
    let table = [
      ("categories", "/categories.json"),
      ("sections", "/sections.json"),
      ("dashboard", "/dashboard.json"),
      ("models", "/models.json"),
      ("users", "/users.json"),
      ("softs", "/api_softs.php"),
      ("formats", "/api_formats.php"),
      ("colors", "/api_colors.php"),
      ("materials", "/api_materials.php"),
    ];

    for (key, path) in table {
      let resource = Resource::from_key(key);
      assert!(!matches!(resource, Resource::Named(_)), "{} should be known", key);
      assert_eq!(resource.path(), path);
      assert_eq!(resource.name(), key);
    }
  }

  #[test]
  fn test_unmapped_names_use_template() {
    assert_eq!(Resource::from_key("pricing").path(), "/api/api_pricing.php");
    assert_eq!(
      Resource::from_key("pricing").to_string(),
      "pricing"
    );
  }

  #[test]
  fn test_unmapped_names_are_encoded() {
    assert_eq!(
      Resource::from_key("../admin/x y").path(),
      "/api/api_..%2Fadmin%2Fx+y.php"
    );
    assert_eq!(Resource::from_key("").path(), "/api/api_.php");
  }

  #[test]
  fn test_explicit_path() {
    assert_eq!(Resource::Path("/models.json".into()).path(), "/models.json");
    assert_eq!(Resource::Path("api/custom.php".into()).path(), "/api/custom.php");
  }
}
