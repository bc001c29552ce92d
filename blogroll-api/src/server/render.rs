//! Named HTML templates filled from a serializable context.

use axum::response::Html;
use minijinja::Environment;
use serde::Serialize;
use std::{fmt::Debug, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Template could not be rendered: {0}")]
    Template(#[from] minijinja::Error),
    #[error("Template context could not be serialized: {0}")]
    Context(#[from] serde_json::Error),
}

pub trait Renderer: Debug + Send + Sync {
    fn render(&self, template: &str, context: &serde_json::Value) -> Result<String, RenderError>;
}

/// Cloneable handle to the [`Renderer`] the handlers use.
#[derive(Clone, Debug)]
pub struct Templates(Arc<dyn Renderer>);

impl Templates {
    #[must_use]
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self(renderer)
    }

    pub fn render<C: Serialize>(
        &self,
        template: &str,
        context: &C,
    ) -> Result<Html<String>, RenderError> {
        let context = serde_json::to_value(context)?;
        Ok(Html(self.0.render(template, &context)?))
    }
}

const TEMPLATES: &[(&str, &str)] = &[
    ("base.html", include_str!("../../templates/base.html")),
    ("includes/post.html", include_str!("../../templates/includes/post.html")),
    (
        "includes/paginator.html",
        include_str!("../../templates/includes/paginator.html"),
    ),
    ("index.html", include_str!("../../templates/index.html")),
    ("group.html", include_str!("../../templates/group.html")),
    ("follow.html", include_str!("../../templates/follow.html")),
    ("profile.html", include_str!("../../templates/profile.html")),
    ("post.html", include_str!("../../templates/post.html")),
    ("new_post.html", include_str!("../../templates/new_post.html")),
    ("about/author.html", include_str!("../../templates/about/author.html")),
    ("about/tech.html", include_str!("../../templates/about/tech.html")),
    ("misc/404.html", include_str!("../../templates/misc/404.html")),
    ("misc/500.html", include_str!("../../templates/misc/500.html")),
];

/// Renders the templates compiled into the binary. Auto-escaping is on for
/// all of them.
#[derive(Debug)]
pub struct MiniJinjaRenderer {
    environment: Environment<'static>,
}

impl MiniJinjaRenderer {
    pub fn new() -> Result<Self, RenderError> {
        let mut environment = Environment::new();
        for &(name, source) in TEMPLATES {
            environment.add_template(name, source)?;
        }

        Ok(Self { environment })
    }
}

impl Renderer for MiniJinjaRenderer {
    fn render(&self, template: &str, context: &serde_json::Value) -> Result<String, RenderError> {
        Ok(self.environment.get_template(template)?.render(context)?)
    }
}

/// Renders `{"template": .., "context": ..}` as JSON so tests can assert on
/// what a handler asked for instead of on markup.
#[cfg(test)]
#[derive(Copy, Clone, Debug, Default)]
pub struct RecordingRenderer;

#[cfg(test)]
impl Renderer for RecordingRenderer {
    fn render(&self, template: &str, context: &serde_json::Value) -> Result<String, RenderError> {
        let recorded = serde_json::json!({ "template": template, "context": context });
        Ok(recorded.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{MiniJinjaRenderer, Renderer};
    use serde_json::json;

    fn renderer() -> MiniJinjaRenderer {
        MiniJinjaRenderer::new().expect("templates should compile")
    }

    fn empty_page() -> serde_json::Value {
        json!({
            "items": [],
            "number": 1,
            "num_pages": 1,
            "count": 0,
            "has_next": false,
            "has_previous": false,
            "next_page_number": null,
            "previous_page_number": null,
            "start_index": 0,
        })
    }

    #[test]
    fn error_pages_show_path() {
        let page = renderer()
            .render("misc/404.html", &json!({ "path": "/nobody/" }))
            .unwrap();
        assert!(page.contains("&#x2f;nobody&#x2f;"), "{page}");

        let page = renderer()
            .render("misc/500.html", &json!({ "path": "/" }))
            .unwrap();
        assert!(page.contains("500"));
    }

    #[test]
    fn user_text_is_escaped() {
        let post = json!({
            "id": 1,
            "text": "<script>alert(1)</script>",
            "pub_date": "2025-01-01 12:00",
            "author": { "id": 1, "username": "alice" },
            "group": null,
            "image": null,
        });
        let mut page = empty_page();
        page["items"] = json!([post]);
        page["count"] = json!(1);
        page["start_index"] = json!(1);

        let html = renderer()
            .render("index.html", &json!({ "page": page, "viewer": null }))
            .unwrap();
        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn every_page_renders_with_minimal_context() {
        let author = json!({ "id": 1, "username": "alice" });
        let group = json!({ "id": 1, "title": "Cats", "slug": "cats", "description": "" });
        let post = json!({
            "id": 1,
            "text": "hello",
            "pub_date": "2025-01-01 12:00",
            "author": author,
            "group": group,
            "image": "posts/cat.gif",
        });
        let form = json!({
            "text": "",
            "group": "",
            "image": null,
            "errors": {},
            "groups": [group],
        });
        let comment_form = json!({ "text": "", "errors": {} });
        let cases = [
            ("index.html", json!({ "page": empty_page() })),
            ("group.html", json!({ "page": empty_page(), "group": group })),
            ("follow.html", json!({ "page": empty_page(), "follow": true })),
            (
                "profile.html",
                json!({
                    "page": empty_page(),
                    "author": author,
                    "post_count": 0,
                    "followers_count": 0,
                    "following_count": 0,
                    "following": false,
                }),
            ),
            (
                "post.html",
                json!({
                    "post": post,
                    "author": author,
                    "post_count": 1,
                    "comments": [],
                    "form": comment_form,
                }),
            ),
            ("new_post.html", json!({ "form": form, "is_new": true })),
            (
                "new_post.html",
                json!({ "form": form, "post": post, "author": author, "is_new": false }),
            ),
            ("about/author.html", json!({})),
            ("about/tech.html", json!({})),
        ];

        for (template, context) in cases {
            let result = renderer().render(template, &context);
            assert!(result.is_ok(), "{template}: {result:?}");
        }
    }
}
