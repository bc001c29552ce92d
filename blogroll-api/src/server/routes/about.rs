use crate::server::{Result, ServerError, ServerRouter, auth::AuthenticatedUser, render::Templates};
use axum::{extract::State, response::Html};
use axum_extra::routing::{RouterExt, TypedPath};
use blogroll_common::model::user::User;
use serde::{Deserialize, Serialize};

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(about_author)
        .typed_get(about_tech)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/about/author/", rejection(ServerError))]
pub struct AboutAuthorPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/about/tech/", rejection(ServerError))]
pub struct AboutTechPath();

#[derive(Serialize)]
struct StaticContext<'a> {
    viewer: Option<&'a User>,
}

async fn about_author(
    AboutAuthorPath(): AboutAuthorPath,
    State(templates): State<Templates>,
    viewer: Option<AuthenticatedUser>,
) -> Result<Html<String>> {
    let context = StaticContext {
        viewer: viewer.as_ref().map(AuthenticatedUser::user),
    };

    Ok(templates.render("about/author.html", &context)?)
}

async fn about_tech(
    AboutTechPath(): AboutTechPath,
    State(templates): State<Templates>,
    viewer: Option<AuthenticatedUser>,
) -> Result<Html<String>> {
    let context = StaticContext {
        viewer: viewer.as_ref().map(AuthenticatedUser::user),
    };

    Ok(templates.render("about/tech.html", &context)?)
}
