//! Resource path resolution.
//!
//! A [`ResourceLocator`] is built once per client handle from a resource
//! URL and never mutated afterwards. Two encodings resolve to equivalent
//! locators: the canonical nested form (`/project/:id/form/:id/...`) and
//! the aliased custom-domain form (`https://<project>.domain/<formPath>`).

use crate::error::{Error, Result};
use crate::resource::ResourceKind;

/// Resolved set of resource identifiers and URLs derived from an input
/// path. Ids and direct URLs are empty when the corresponding segment is
/// absent from the path; callers check id emptiness before load/delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLocator {
  pub projects_url: String,
  pub project_url: String,
  pub project_id: String,
  pub forms_url: String,
  pub form_url: String,
  pub form_id: String,
  pub submissions_url: String,
  pub submission_url: String,
  pub submission_id: String,
  pub actions_url: String,
  pub action_url: String,
  pub action_id: String,
  /// Query string including the leading `?`, preserved verbatim and
  /// re-appended to derived URLs at request time.
  pub query: String,
}

impl ResourceLocator {
  /// Locator for a client created without a path. Points at the project
  /// collection so new projects can still be created.
  pub fn root(base_url: &str) -> Self {
    ResourceLocator {
      projects_url: format!("{base_url}/project"),
      project_url: format!("{base_url}/project"),
      ..ResourceLocator::default()
    }
  }

  /// Resolve a resource path into a locator.
  ///
  /// Relative paths are prefixed with `base_url`; scheme-relative paths
  /// get `https:`. The strategy is chosen by the presence of a literal
  /// `project` or `form` path segment.
  pub fn parse(path: &str, base_url: &str) -> Result<Self> {
    let mut raw = path.to_string();
    if !raw.starts_with("http") && !raw.starts_with("//") {
      raw = format!("{base_url}{raw}");
    }
    if raw.starts_with("//") {
      raw = format!("https:{raw}");
    }

    let (host_name, host, full_path) =
      split_url(&raw).ok_or_else(|| Error::InvalidPath(path.to_string()))?;

    let mut locator = ResourceLocator::default();
    let path = match full_path.split_once('?') {
      Some((before, after)) => {
        locator.query = format!("?{after}");
        before.to_string()
      }
      None => full_path,
    };

    if has_segment(&path, "project") || has_segment(&path, "form") {
      locator.resolve_canonical(&path, &host_name);
    } else {
      locator.resolve_aliased(&path, &host_name, &host);
    }

    Ok(locator)
  }

  /// Walk the fixed hierarchy `project -> form -> {submission, action}`.
  /// Each level's collection URL is rooted at its parent's computed base;
  /// submission and action are siblings under the form base.
  fn resolve_canonical(&mut self, path: &str, host_name: &str) {
    let mut base = host_name.to_string();

    self.projects_url = format!("{base}/project");
    if let Some((segment, id)) = extract_segment(path, "project") {
      self.project_url = format!("{base}{segment}");
      self.project_id = id;
      base = self.project_url.clone();
    }

    self.forms_url = format!("{base}/form");
    if let Some((segment, id)) = extract_segment(path, "form") {
      self.form_url = format!("{base}{segment}");
      self.form_id = id;
      base = self.form_url.clone();
    }

    self.submissions_url = format!("{base}/submission");
    if let Some((segment, id)) = extract_segment(path, "submission") {
      self.submission_url = format!("{base}{segment}");
      self.submission_id = id;
    }

    self.actions_url = format!("{base}/action");
    if let Some((segment, id)) = extract_segment(path, "action") {
      self.action_url = format!("{base}{segment}");
      self.action_id = id;
    }
  }

  /// Aliased/custom-domain form: the host carries the project identity
  /// and the path is the form path, optionally followed by a
  /// `/submission/:id` or `/action/:id` suffix.
  fn resolve_aliased(&mut self, path: &str, host_name: &str, host: &str) {
    self.project_url = host_name.to_string();
    self.project_id = host.split('.').next().unwrap_or("").to_string();

    let suffix = find_resource_suffix(path);
    let stripped = match &suffix {
      Some((_, start, _)) => &path[..*start],
      None => path,
    };
    let stripped = stripped.strip_suffix('/').unwrap_or(stripped);

    self.forms_url = format!("{host_name}/form");
    self.form_url = format!("{host_name}{stripped}");
    self.form_id = stripped.trim_matches('/').to_string();
    self.submissions_url = format!("{host_name}{stripped}/submission");
    self.actions_url = format!("{host_name}{stripped}/action");

    if let Some((kind, start, rest)) = suffix {
      let id = rest.trim_matches('/').to_string();
      if !id.is_empty() {
        let url = format!("{host_name}{stripped}{}", &path[start..]);
        match kind {
          ResourceKind::Submission => {
            self.submission_id = id;
            self.submission_url = url;
          }
          ResourceKind::Action => {
            self.action_id = id;
            self.action_url = url;
          }
          _ => {}
        }
      }
    }
  }

  pub fn id(&self, kind: ResourceKind) -> &str {
    match kind {
      ResourceKind::Project => &self.project_id,
      ResourceKind::Form => &self.form_id,
      ResourceKind::Submission => &self.submission_id,
      ResourceKind::Action => &self.action_id,
    }
  }

  pub fn item_url(&self, kind: ResourceKind) -> &str {
    match kind {
      ResourceKind::Project => &self.project_url,
      ResourceKind::Form => &self.form_url,
      ResourceKind::Submission => &self.submission_url,
      ResourceKind::Action => &self.action_url,
    }
  }

  pub fn collection_url(&self, kind: ResourceKind) -> &str {
    match kind {
      ResourceKind::Project => &self.projects_url,
      ResourceKind::Form => &self.forms_url,
      ResourceKind::Submission => &self.submissions_url,
      ResourceKind::Action => &self.actions_url,
    }
  }
}

/// Split an absolute URL into (scheme://host, host, path).
fn split_url(url: &str) -> Option<(String, String, String)> {
  if !url.starts_with("http") {
    return None;
  }
  let scheme_end = url.find("://")?;
  let after = &url[scheme_end + 3..];
  let (host, path) = match after.find('/') {
    Some(i) => (&after[..i], &after[i..]),
    None => (after, ""),
  };
  if host.is_empty() {
    return None;
  }
  Some((
    format!("{}://{host}", &url[..scheme_end]),
    host.to_string(),
    path.to_string(),
  ))
}

fn has_segment(path: &str, name: &str) -> bool {
  path.split('/').any(|segment| segment == name)
}

/// Find the first `/{name}/<id-segment>` occurrence in the path and
/// return the matched `/{name}/<id>` chunk and the id.
fn extract_segment(path: &str, name: &str) -> Option<(String, String)> {
  let needle = format!("/{name}/");
  let start = path.find(&needle)?;
  let id_start = start + needle.len();
  let id_end = path[id_start..]
    .find('/')
    .map(|i| id_start + i)
    .unwrap_or(path.len());
  let id = &path[id_start..id_end];
  if id.is_empty() {
    return None;
  }
  Some((format!("/{name}/{id}"), id.to_string()))
}

/// Find the earliest `/submission` or `/action` segment-boundary suffix.
/// Returns the matched kind, the byte offset of the suffix, and the rest
/// of the path after the keyword.
fn find_resource_suffix(path: &str) -> Option<(ResourceKind, usize, String)> {
  let mut best: Option<(ResourceKind, usize)> = None;
  for kind in [ResourceKind::Submission, ResourceKind::Action] {
    let needle = format!("/{}", kind.name());
    let mut search = 0;
    while let Some(offset) = path[search..].find(&needle) {
      let start = search + offset;
      let end = start + needle.len();
      // Must be a whole segment: followed by a slash or end of path.
      if path[end..].is_empty() || path[end..].starts_with('/') {
        if best.map(|(_, s)| start < s).unwrap_or(true) {
          best = Some((kind, start));
        }
        break;
      }
      search = end;
    }
  }
  best.map(|(kind, start)| {
    let rest = path[start + 1 + kind.name().len()..].to_string();
    (kind, start, rest)
  })
}
