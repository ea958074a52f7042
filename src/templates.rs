//! Startup-built template cache.
//!
//! Every `*.page.tmpl` file in the template directory becomes one template
//! set: the page plus every `*.layout.tmpl` and `*.partial.tmpl` beside it,
//! parsed together into a single [`minijinja::Environment`] keyed by the
//! page's file name (`home.page.tmpl`). The cache is read-only after
//! [`TemplateCache::build`] returns, so request tasks share it without locks.
//!
//! [`TemplateCache::render`] produces the complete page as a `String`; the
//! caller decides what to send only after rendering has fully succeeded.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, FixedOffset, Utc};
use minijinja::{AutoEscape, Environment, Value};
use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::Error;
use crate::forms::Form;
use crate::models::Snippet;

const PAGE: &str = ".page.tmpl";
const LAYOUT: &str = ".layout.tmpl";
const PARTIAL: &str = ".partial.tmpl";

/// Per-render payload. Built fresh by a handler, consumed by one render.
#[derive(Debug, Default, Serialize)]
pub struct TemplateData {
    pub current_year: i32,
    /// One-shot message popped from the session for this render.
    pub flash: String,
    pub is_authenticated: bool,
    pub form: Option<Form>,
    pub snippet: Option<Snippet>,
    pub snippets: Vec<Snippet>,
}

impl TemplateData {
    pub fn with_form(form: Form) -> Self {
        Self { form: Some(form), ..Self::default() }
    }

    pub fn with_snippet(snippet: Snippet) -> Self {
        Self { snippet: Some(snippet), ..Self::default() }
    }

    pub fn with_snippets(snippets: Vec<Snippet>) -> Self {
        Self { snippets, ..Self::default() }
    }
}

/// Immutable map from page name to its compiled template set.
pub struct TemplateCache {
    sets: HashMap<String, Environment<'static>>,
}

impl TemplateCache {
    /// Scans `dir` (not recursively) and compiles one set per page.
    ///
    /// Fails on an unreadable directory or file, or on any fragment that does
    /// not parse. The process should refuse to start on error.
    pub fn build(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref();
        let mut pages = Vec::new();
        let mut shared = Vec::new();

        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(PAGE) {
                pages.push((name, std::fs::read_to_string(entry.path())?));
            } else if name.ends_with(LAYOUT) || name.ends_with(PARTIAL) {
                shared.push((name, std::fs::read_to_string(entry.path())?));
            }
        }

        let mut sets = HashMap::with_capacity(pages.len());
        for (name, source) in pages {
            let mut env = Environment::new();
            env.set_auto_escape_callback(|_| AutoEscape::Html);
            env.add_filter("humanDate", human_date_filter);
            for (fragment, fragment_source) in &shared {
                env.add_template_owned(fragment.clone(), fragment_source.clone())?;
            }
            env.add_template_owned(name.clone(), source)?;
            debug!(page = %name, fragments = shared.len(), "compiled template set");
            sets.insert(name, env);
        }

        info!(dir = %dir.display(), pages = sets.len(), "template cache built");
        Ok(Self { sets })
    }

    /// Renders the page `name` into a string.
    ///
    /// [`Error::TemplateNotFound`] if no such page was found at build time.
    pub fn render(&self, name: &str, data: &TemplateData) -> Result<String, Error> {
        let env = self
            .sets
            .get(name)
            .ok_or_else(|| Error::TemplateNotFound(name.to_owned()))?;
        let template = env.get_template(name)?;
        Ok(template.render(data)?)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sets.contains_key(name)
    }

    /// Page names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Formats a timestamp as `17 Dec 2020 at 10:00`, in UTC. `None` (no time)
/// formats as the empty string.
pub fn human_date(t: Option<DateTime<FixedOffset>>) -> String {
    t.map(|t| t.with_timezone(&Utc).format("%d %b %Y at %H:%M").to_string())
        .unwrap_or_default()
}

// Timestamps arrive in templates as RFC 3339 strings.
fn human_date_filter(value: Value) -> String {
    human_date(value.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) {
        fs::write(dir.path().join(name), body).unwrap();
    }

    fn fixture() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir,
            "base.layout.tmpl",
            "<title>{% block title %}{% endblock %}</title>\
             {% if flash %}<div class=flash>{{ flash }}</div>{% endif %}\
             {% block main %}{% endblock %}{% include \"footer.partial.tmpl\" %}",
        );
        write(&dir, "footer.partial.tmpl", "<footer>{{ current_year }}</footer>");
        write(
            &dir,
            "home.page.tmpl",
            "{% extends \"base.layout.tmpl\" %}{% block title %}Home{% endblock %}\
             {% block main %}{% for s in snippets %}<p>{{ s.title }} {{ s.created | humanDate }}</p>{% endfor %}{% endblock %}",
        );
        write(
            &dir,
            "show.page.tmpl",
            "{% extends \"base.layout.tmpl\" %}{% block main %}{{ snippet.content }}{% endblock %}",
        );
        write(&dir, "notes.txt", "ignored");
        dir
    }

    fn snippet(title: &str, content: &str) -> Snippet {
        let created = Utc.with_ymd_and_hms(2020, 12, 17, 10, 0, 0).unwrap();
        Snippet { id: 1, title: title.into(), content: content.into(), created, expires: created }
    }

    #[test]
    fn one_set_per_page() {
        let dir = fixture();
        let cache = TemplateCache::build(dir.path()).unwrap();
        assert_eq!(cache.names(), ["home.page.tmpl", "show.page.tmpl"]);
        assert!(!cache.contains("base.layout.tmpl"));
    }

    #[test]
    fn build_is_idempotent() {
        let dir = fixture();
        let a = TemplateCache::build(dir.path()).unwrap();
        let b = TemplateCache::build(dir.path()).unwrap();
        assert_eq!(a.names(), b.names());
    }

    #[test]
    fn renders_page_with_layout_partial_and_filter() {
        let dir = fixture();
        let cache = TemplateCache::build(dir.path()).unwrap();
        let data = TemplateData {
            current_year: 2024,
            flash: "Saved".into(),
            ..TemplateData::with_snippets(vec![snippet("First", "body")])
        };

        let html = cache.render("home.page.tmpl", &data).unwrap();
        assert!(html.contains("<title>Home</title>"));
        assert!(html.contains("<div class=flash>Saved</div>"));
        assert!(html.contains("<p>First 17 Dec 2020 at 10:00</p>"));
        assert!(html.contains("<footer>2024</footer>"));
    }

    #[test]
    fn output_is_html_escaped() {
        let dir = fixture();
        let cache = TemplateCache::build(dir.path()).unwrap();
        let data = TemplateData::with_snippet(snippet("x", "<script>alert(1)</script>"));

        let html = cache.render("show.page.tmpl", &data).unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn missing_page_is_an_error_not_a_panic() {
        let dir = fixture();
        let cache = TemplateCache::build(dir.path()).unwrap();
        let err = cache.render("nope.page.tmpl", &TemplateData::default()).unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound(ref n) if n == "nope.page.tmpl"));
        assert_eq!(err.to_string(), "the template nope.page.tmpl does not exist");
    }

    #[test]
    fn parse_error_fails_the_build() {
        let dir = fixture();
        write(&dir, "broken.page.tmpl", "{% if %}");
        assert!(matches!(TemplateCache::build(dir.path()), Err(Error::Template(_))));
    }

    #[test]
    fn broken_partial_fails_the_build() {
        let dir = fixture();
        write(&dir, "nav.partial.tmpl", "{{ unclosed");
        assert!(TemplateCache::build(dir.path()).is_err());
    }

    #[test]
    fn missing_directory_fails_the_build() {
        let dir = fixture();
        assert!(TemplateCache::build(dir.path().join("absent")).is_err());
    }

    #[test]
    fn human_date_cases() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let cet = FixedOffset::east_opt(3600).unwrap();
        let cases = [
            ("UTC", Some(utc.with_ymd_and_hms(2020, 12, 17, 10, 0, 0).unwrap()), "17 Dec 2020 at 10:00"),
            ("Empty", None, ""),
            ("CET", Some(cet.with_ymd_and_hms(2020, 12, 17, 10, 0, 0).unwrap()), "17 Dec 2020 at 09:00"),
        ];
        for (name, tm, want) in cases {
            assert_eq!(human_date(tm), want, "{name}");
        }
    }
}
