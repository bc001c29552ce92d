//! Submitted post and comment forms, their validation and the state a form
//! page is re-rendered with.

use axum::{body::Bytes, extract::Multipart, extract::multipart::MultipartError};
use blogroll_common::model::{
    Id,
    group::{Group, GroupMarker},
    post::Post,
};
use blogroll_db::store::{Store, StoreError};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

pub const REQUIRED: &str = "This field is required.";
pub const INVALID_GROUP: &str =
    "Select a valid choice. That choice is not one of the available choices.";
pub const INVALID_IMAGE: &str = "Upload a valid image. The file you uploaded was either not an \
    image or a corrupted image.";
pub const EMPTY_FILE: &str = "The submitted file is empty.";

/// Messages per field name.
pub type FieldErrors = BTreeMap<&'static str, Vec<&'static str>>;

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Upload {
    pub file_name: String,
    pub content: Bytes,
}

/// A post form as it arrived, before validation.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct PostSubmission {
    pub text: String,
    /// Raw group id, empty for "no group".
    pub group: String,
    pub image: Option<Upload>,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ValidPost {
    pub text: String,
    pub group: Option<Id<GroupMarker>>,
    /// `None` keeps the current image when editing.
    pub image: Option<Upload>,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Validated<T> {
    Valid(T),
    Invalid(FieldErrors),
}

impl PostSubmission {
    /// Collects the `text`, `group` and `image` fields. Unknown fields are
    /// skipped and a file input left empty counts as no upload.
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, MultipartError> {
        let mut submission = Self::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("text") => submission.text = field.text().await?,
                Some("group") => submission.group = field.text().await?,
                Some("image") => {
                    let file_name = field.file_name().unwrap_or_default().to_owned();
                    let content = field.bytes().await?;
                    if !file_name.is_empty() || !content.is_empty() {
                        submission.image = Some(Upload { file_name, content });
                    }
                }
                _ => {}
            }
        }

        Ok(submission)
    }

    /// Checks every field and reports all problems at once.
    pub async fn validate(&self, store: &dyn Store) -> Result<Validated<ValidPost>, StoreError> {
        let mut errors = FieldErrors::new();

        let text = self.text.trim();
        if text.is_empty() {
            errors.entry("text").or_default().push(REQUIRED);
        }

        let group = self.resolve_group(store).await?;
        if group == GroupChoice::Unknown {
            errors.entry("group").or_default().push(INVALID_GROUP);
        }

        if let Some(upload) = &self.image {
            if upload.content.is_empty() {
                errors.entry("image").or_default().push(EMPTY_FILE);
            } else if !verify_image(upload.content.clone()).await {
                errors.entry("image").or_default().push(INVALID_IMAGE);
            }
        }

        if !errors.is_empty() {
            return Ok(Validated::Invalid(errors));
        }

        Ok(Validated::Valid(ValidPost {
            text: text.to_owned(),
            group: match group {
                GroupChoice::Existing(group_id) => Some(group_id),
                GroupChoice::Ungrouped | GroupChoice::Unknown => None,
            },
            image: self.image.clone(),
        }))
    }

    async fn resolve_group(&self, store: &dyn Store) -> Result<GroupChoice, StoreError> {
        let raw = self.group.trim();
        if raw.is_empty() {
            return Ok(GroupChoice::Ungrouped);
        }
        let Ok(group_id) = raw.parse::<Id<GroupMarker>>() else {
            return Ok(GroupChoice::Unknown);
        };

        Ok(match store.fetch_group(group_id).await? {
            Some(group) => GroupChoice::Existing(group.id),
            None => GroupChoice::Unknown,
        })
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum GroupChoice {
    Ungrouped,
    Existing(Id<GroupMarker>),
    Unknown,
}

const ACCEPTED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Gif,
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::WebP,
    ImageFormat::Bmp,
];

/// Whether `content` is a complete GIF, PNG, JPEG, WebP or BMP image that
/// decodes without errors.
#[must_use]
pub fn is_image(content: &[u8]) -> bool {
    let Ok(format) = image::guess_format(content) else {
        return false;
    };
    if !ACCEPTED_FORMATS.contains(&format) {
        return false;
    }

    image::load_from_memory_with_format(content, format).is_ok()
}

async fn verify_image(content: Bytes) -> bool {
    match tokio::task::spawn_blocking(move || is_image(&content)).await {
        Ok(valid) => valid,
        Err(e) => {
            warn!(error = %e, "Image verification did not finish");
            false
        }
    }
}

/// What a post form page shows: the values to prefill, the messages for
/// each field and the groups to choose from.
#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
pub struct PostForm {
    pub text: String,
    pub group: String,
    /// Current image of the post being edited.
    pub image: Option<String>,
    pub errors: FieldErrors,
    pub groups: Vec<Group>,
}

impl PostForm {
    #[must_use]
    pub fn blank(groups: Vec<Group>) -> Self {
        Self {
            text: String::new(),
            group: String::new(),
            image: None,
            errors: FieldErrors::new(),
            groups,
        }
    }

    #[must_use]
    pub fn for_post(post: &Post, groups: Vec<Group>) -> Self {
        Self {
            text: post.text.clone(),
            group: post
                .group
                .as_ref()
                .map(|group| group.id.to_string())
                .unwrap_or_default(),
            image: post.image.clone(),
            errors: FieldErrors::new(),
            groups,
        }
    }

    /// Keeps what the user typed so they only fix what was rejected.
    #[must_use]
    pub fn rejected(
        submission: PostSubmission,
        errors: FieldErrors,
        current_image: Option<String>,
        groups: Vec<Group>,
    ) -> Self {
        Self {
            text: submission.text,
            group: submission.group,
            image: current_image,
            errors,
            groups,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Deserialize)]
pub struct CommentSubmission {
    #[serde(default)]
    pub text: String,
}

impl CommentSubmission {
    /// The text to store, if there is any.
    #[must_use]
    pub fn cleaned_text(&self) -> Option<&str> {
        Some(self.text.trim()).filter(|text| !text.is_empty())
    }
}

/// An empty comment form.
#[derive(Clone, Eq, PartialEq, Debug, Default, Serialize)]
pub struct CommentForm {
    pub text: String,
    pub errors: FieldErrors,
}

#[cfg(test)]
mod tests {
    use super::{
        CommentSubmission, EMPTY_FILE, INVALID_GROUP, INVALID_IMAGE, PostSubmission, REQUIRED,
        Upload, Validated, is_image,
    };
    use crate::server::testing::SMALL_GIF;
    use axum::body::Bytes;
    use blogroll_common::model::group::{CreateGroup, Slug};
    use blogroll_db::{memory::MemoryStore, store::Store};

    fn submission(
        text: &str,
        group: &str,
        image: Option<(&str, &'static [u8])>,
    ) -> PostSubmission {
        PostSubmission {
            text: text.to_owned(),
            group: group.to_owned(),
            image: image.map(|(file_name, content)| Upload {
                file_name: file_name.to_owned(),
                content: Bytes::from_static(content),
            }),
        }
    }

    #[test]
    fn only_decodable_images_are_accepted() {
        assert!(is_image(SMALL_GIF));
        assert!(!is_image(b"BMW is a car brand, not a bitmap"));
        assert!(!is_image(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"));
        assert!(!is_image(&SMALL_GIF[..SMALL_GIF.len() / 2]));
        assert!(!is_image(b"RIFF\0\0\0\0WAVE"));
        assert!(!is_image(b"hello, world"));
        assert!(!is_image(b""));
    }

    #[tokio::test]
    async fn text_with_image_prefix_is_rejected() {
        let store = MemoryStore::new();
        let result = submission(
            "hello",
            "",
            Some(("notes.txt", b"BMW is a car brand, not a bitmap")),
        )
        .validate(&store)
        .await
        .unwrap();
        let Validated::Invalid(errors) = result else {
            panic!("expected errors, got {result:?}");
        };
        assert_eq!(errors["image"], [INVALID_IMAGE]);
        assert!(!errors.contains_key("text"));
    }

    #[tokio::test]
    async fn valid_submission_is_trimmed() {
        let store = MemoryStore::new();
        let cats = CreateGroup::new(
            "Cats".to_owned(),
            Slug::new("cats".to_owned()).unwrap(),
            String::new(),
        )
        .unwrap();
        let group = store.create_group(&cats).await.unwrap();

        let result = submission("  hello  ", &group.id.to_string(), Some(("a.gif", SMALL_GIF)))
            .validate(&store)
            .await
            .unwrap();
        let Validated::Valid(post) = result else {
            panic!("expected a valid post, got {result:?}");
        };
        assert_eq!(post.text, "hello");
        assert_eq!(post.group, Some(group.id));
        assert_eq!(post.image.map(|image| image.file_name), Some("a.gif".to_owned()));
    }

    #[tokio::test]
    async fn all_errors_are_reported() {
        let store = MemoryStore::new();
        let result = submission("   ", "42", Some(("a.txt", b"plain text")))
            .validate(&store)
            .await
            .unwrap();
        let Validated::Invalid(errors) = result else {
            panic!("expected errors, got {result:?}");
        };
        assert_eq!(errors["text"], [REQUIRED]);
        assert_eq!(errors["group"], [INVALID_GROUP]);
        assert_eq!(errors["image"], [INVALID_IMAGE]);
    }

    #[tokio::test]
    async fn malformed_group_and_empty_file() {
        let store = MemoryStore::new();
        let result = submission("text", "cats", Some(("a.gif", b"")))
            .validate(&store)
            .await
            .unwrap();
        let Validated::Invalid(errors) = result else {
            panic!("expected errors, got {result:?}");
        };
        assert!(!errors.contains_key("text"));
        assert_eq!(errors["group"], [INVALID_GROUP]);
        assert_eq!(errors["image"], [EMPTY_FILE]);
    }

    #[tokio::test]
    async fn group_and_image_are_optional() {
        let store = MemoryStore::new();
        let result = submission("text", " ", None).validate(&store).await.unwrap();
        let Validated::Valid(post) = result else {
            panic!("expected a valid post, got {result:?}");
        };
        assert_eq!(post.group, None);
        assert_eq!(post.image, None);
    }

    #[test]
    fn comment_text_is_trimmed() {
        let comment = CommentSubmission {
            text: "  nice  ".to_owned(),
        };
        assert_eq!(comment.cleaned_text(), Some("nice"));
        assert_eq!(CommentSubmission::default().cleaned_text(), None);
        let blank = CommentSubmission {
            text: " \n ".to_owned(),
        };
        assert_eq!(blank.cleaned_text(), None);
    }
}
