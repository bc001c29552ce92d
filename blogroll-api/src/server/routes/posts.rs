use crate::server::{
    Result, ServerError, ServerRouter, ServerState,
    auth::AuthenticatedUser,
    cache::cache_anonymous_pages,
    forms::{
        CommentForm, CommentSubmission, PostForm, PostSubmission, Upload, ValidPost, Validated,
    },
    guard::{self, Decision},
    media::MediaStore,
    render::Templates,
    routes::{FEED_PAGE, PageQuery, fetch_authored_post, paginate},
};
use axum::{
    extract::{
        Form, Multipart, Query, State, multipart::MultipartRejection, rejection::FormRejection,
    },
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::{
    extract::WithRejection,
    routing::{RouterExt, TypedPath},
};
use blogroll_common::{
    model::{
        Id,
        comment::{Comment, CreateComment},
        group::Group,
        post::{CreatePost, Post, PostFilter, PostMarker, UpdatePost},
        user::User,
    },
    pagination::Page,
};
use blogroll_db::store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Uploaded post images live below this media directory.
const POST_IMAGE_DIR: &str = "posts";

pub fn routes(state: &ServerState) -> ServerRouter {
    let cached = ServerRouter::new()
        .typed_get(index)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            cache_anonymous_pages,
        ));

    ServerRouter::new()
        .merge(cached)
        .typed_get(group_posts)
        .typed_get(new_post_form)
        .typed_post(create_post)
        .typed_get(post_detail)
        .typed_get(edit_post_form)
        .typed_post(edit_post)
        .typed_post(add_comment)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/", rejection(ServerError))]
pub struct IndexPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/group/{slug}/", rejection(ServerError))]
pub struct GroupPath {
    pub slug: String,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/new/", rejection(ServerError))]
pub struct NewPostPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/{username}/{post_id}/", rejection(ServerError))]
pub struct PostPath {
    pub username: String,
    pub post_id: Id<PostMarker>,
}

impl PostPath {
    #[must_use]
    pub fn of(post: &Post) -> Self {
        Self {
            username: post.author.username.get().to_owned(),
            post_id: post.id,
        }
    }
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/{username}/{post_id}/edit/", rejection(ServerError))]
pub struct EditPostPath {
    pub username: String,
    pub post_id: Id<PostMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/{username}/{post_id}/comment/", rejection(ServerError))]
pub struct CommentPath {
    pub username: String,
    pub post_id: Id<PostMarker>,
}

#[derive(Serialize)]
struct FeedContext<'a> {
    viewer: Option<&'a User>,
    page: Page<Post>,
}

async fn index(
    IndexPath(): IndexPath,
    State(store): State<Arc<dyn Store>>,
    State(templates): State<Templates>,
    viewer: Option<AuthenticatedUser>,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>> {
    let page = paginate(store.as_ref(), PostFilter::All, FEED_PAGE, &query).await?;
    let context = FeedContext {
        viewer: viewer.as_ref().map(AuthenticatedUser::user),
        page,
    };

    Ok(templates.render("index.html", &context)?)
}

#[derive(Serialize)]
struct GroupContext<'a> {
    viewer: Option<&'a User>,
    group: Group,
    page: Page<Post>,
}

async fn group_posts(
    GroupPath { slug }: GroupPath,
    State(store): State<Arc<dyn Store>>,
    State(templates): State<Templates>,
    viewer: Option<AuthenticatedUser>,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>> {
    let group = store
        .fetch_group_by_slug(&slug)
        .await?
        .ok_or(ServerError::GroupBySlugNotFound(slug))?;
    let page = paginate(store.as_ref(), PostFilter::Group(group.id), FEED_PAGE, &query).await?;
    let context = GroupContext {
        viewer: viewer.as_ref().map(AuthenticatedUser::user),
        group,
        page,
    };

    Ok(templates.render("group.html", &context)?)
}

/// Shared by creating and editing; `post` and `author` are only set when
/// editing.
#[derive(Serialize)]
struct PostFormContext<'a> {
    viewer: &'a User,
    form: PostForm,
    is_new: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    post: Option<&'a Post>,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<&'a User>,
}

impl<'a> PostFormContext<'a> {
    fn creating(viewer: &'a User, form: PostForm) -> Self {
        Self {
            viewer,
            form,
            is_new: true,
            post: None,
            author: None,
        }
    }

    fn editing(viewer: &'a User, form: PostForm, post: &'a Post) -> Self {
        Self {
            viewer,
            form,
            is_new: false,
            post: Some(post),
            author: Some(&post.author),
        }
    }
}

async fn save_image(media: &dyn MediaStore, upload: Option<&Upload>) -> Result<Option<String>> {
    let Some(upload) = upload else {
        return Ok(None);
    };
    let path = media
        .save(POST_IMAGE_DIR, &upload.file_name, &upload.content)
        .await?;

    Ok(Some(path))
}

/// Saves the upload, if any, and hands its path to `write`. The file is
/// deleted again when `write` fails.
async fn with_saved_image<T, W, F>(
    media: &dyn MediaStore,
    upload: Option<&Upload>,
    write: W,
) -> Result<T>
where
    W: FnOnce(Option<String>) -> F,
    F: Future<Output = Result<T>>,
{
    let saved = save_image(media, upload).await?;
    let result = write(saved.clone()).await;

    if let Err(e) = &result
        && let Some(path) = &saved
    {
        warn!(error = %e, %path, "Post was not stored, deleting its image");
        if let Err(e) = media.remove(path).await {
            error!(error = %e, %path, "Orphaned image could not be deleted");
        }
    }

    result
}

async fn new_post_form(
    NewPostPath(): NewPostPath,
    State(store): State<Arc<dyn Store>>,
    State(templates): State<Templates>,
    user: AuthenticatedUser,
) -> Result<Html<String>> {
    let form = PostForm::blank(store.fetch_groups().await?);
    let context = PostFormContext::creating(user.user(), form);

    Ok(templates.render("new_post.html", &context)?)
}

async fn create_post(
    NewPostPath(): NewPostPath,
    State(store): State<Arc<dyn Store>>,
    State(templates): State<Templates>,
    State(media): State<Arc<dyn MediaStore>>,
    user: AuthenticatedUser,
    WithRejection(multipart, _): WithRejection<Multipart, ServerError>,
) -> Result<Response> {
    let submission = PostSubmission::from_multipart(multipart).await?;
    let validated = submission.validate(store.as_ref()).await?;

    match validated {
        Validated::Valid(valid) => {
            let ValidPost {
                text,
                group,
                image: upload,
            } = valid;
            let author = user.user_id();
            let store_ref = store.as_ref();
            let post = with_saved_image(media.as_ref(), upload.as_ref(), |image| async move {
                let post = CreatePost {
                    author,
                    text,
                    group,
                    image,
                };
                store_ref.create_post(&post).await.map_err(ServerError::from)
            })
            .await?;
            info!(post_id = %post.id, author = %user.user().username, "Created post");

            Ok(Redirect::to(&IndexPath().to_string()).into_response())
        }
        Validated::Invalid(errors) => {
            debug!(?errors, author = %user.user().username, "Rejected new post");
            let groups = store.fetch_groups().await?;
            let form = PostForm::rejected(submission, errors, None, groups);
            let context = PostFormContext::creating(user.user(), form);

            Ok(templates.render("new_post.html", &context)?.into_response())
        }
    }
}

#[derive(Serialize)]
struct PostContext<'a> {
    viewer: Option<&'a User>,
    post: &'a Post,
    author: &'a User,
    post_count: u64,
    comments: Vec<Comment>,
    form: CommentForm,
}

async fn post_detail(
    PostPath { username, post_id }: PostPath,
    State(store): State<Arc<dyn Store>>,
    State(templates): State<Templates>,
    viewer: Option<AuthenticatedUser>,
) -> Result<Html<String>> {
    let post = fetch_authored_post(store.as_ref(), username, post_id).await?;
    let post_count = store.count_posts(PostFilter::Author(post.author.id)).await?;
    let comments = store.fetch_comments(post.id).await?;
    let context = PostContext {
        viewer: viewer.as_ref().map(AuthenticatedUser::user),
        post: &post,
        author: &post.author,
        post_count,
        comments,
        form: CommentForm::default(),
    };

    Ok(templates.render("post.html", &context)?)
}

async fn edit_post_form(
    EditPostPath { username, post_id }: EditPostPath,
    State(store): State<Arc<dyn Store>>,
    State(templates): State<Templates>,
    user: AuthenticatedUser,
) -> Result<Response> {
    let post = fetch_authored_post(store.as_ref(), username, post_id).await?;
    if let Decision::DeniedRedirect(target) = guard::may_edit(user.user(), &post) {
        debug!(%post_id, requester = %user.user().username, "Not the author, not editing");
        return Ok(Redirect::to(&target).into_response());
    }

    let form = PostForm::for_post(&post, store.fetch_groups().await?);
    let context = PostFormContext::editing(user.user(), form, &post);

    Ok(templates.render("new_post.html", &context)?.into_response())
}

async fn edit_post(
    EditPostPath { username, post_id }: EditPostPath,
    State(store): State<Arc<dyn Store>>,
    State(templates): State<Templates>,
    State(media): State<Arc<dyn MediaStore>>,
    user: AuthenticatedUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response> {
    let post = fetch_authored_post(store.as_ref(), username, post_id).await?;
    if let Decision::DeniedRedirect(target) = guard::may_edit(user.user(), &post) {
        debug!(%post_id, requester = %user.user().username, "Not the author, not editing");
        return Ok(Redirect::to(&target).into_response());
    }

    let submission = PostSubmission::from_multipart(multipart?).await?;
    let validated = submission.validate(store.as_ref()).await?;
    match validated {
        Validated::Valid(valid) => {
            let ValidPost {
                text,
                group,
                image: upload,
            } = valid;
            let current_image = post.image.clone();
            let username = post.author.username.get().to_owned();
            let store_ref = store.as_ref();
            let updated = with_saved_image(media.as_ref(), upload.as_ref(), |saved| async move {
                let update = UpdatePost {
                    text,
                    group,
                    image: saved.or(current_image),
                };
                match store_ref.update_post(post_id, &update).await {
                    Ok(Some(updated)) => Ok(updated),
                    Ok(None) => Err(ServerError::PostNotFound { username, post_id }),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;
            info!(%post_id, author = %user.user().username, "Updated post");

            Ok(Redirect::to(&PostPath::of(&updated).to_string()).into_response())
        }
        Validated::Invalid(errors) => {
            debug!(?errors, %post_id, "Rejected post edit");
            let groups = store.fetch_groups().await?;
            let form = PostForm::rejected(submission, errors, post.image.clone(), groups);
            let context = PostFormContext::editing(user.user(), form, &post);

            Ok(templates.render("new_post.html", &context)?.into_response())
        }
    }
}

/// Comments that fail to parse or are blank are dropped without a message.
async fn add_comment(
    CommentPath { username, post_id }: CommentPath,
    State(store): State<Arc<dyn Store>>,
    user: AuthenticatedUser,
    form: Result<Form<CommentSubmission>, FormRejection>,
) -> Result<Redirect> {
    let post = fetch_authored_post(store.as_ref(), username, post_id).await?;
    let detail = PostPath::of(&post).to_string();

    let submission = match form {
        Ok(Form(submission)) => submission,
        Err(e) => {
            debug!(error = %e, %post_id, "Ignoring unreadable comment form");
            return Ok(Redirect::to(&detail));
        }
    };
    let Some(text) = submission.cleaned_text() else {
        debug!(%post_id, "Ignoring blank comment");
        return Ok(Redirect::to(&detail));
    };

    let comment = store
        .create_comment(&CreateComment {
            post: post.id,
            author: user.user_id(),
            text: text.to_owned(),
        })
        .await?;
    info!(comment_id = %comment.id, %post_id, author = %user.user().username, "Created comment");

    Ok(Redirect::to(&detail))
}
