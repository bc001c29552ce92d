use crate::model::Id;
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub const SLUG_MAX_LEN: usize = 100;
pub const GROUP_TITLE_MAX_LEN: usize = 200;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct GroupMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Group {
    pub id: Id<GroupMarker>,
    pub title: String,
    pub slug: Slug,
    pub description: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct CreateGroup {
    pub title: String,
    pub slug: Slug,
    pub description: String,
}

impl CreateGroup {
    pub fn new(
        title: String,
        slug: Slug,
        description: String,
    ) -> Result<Self, InvalidGroupTitleError> {
        if title.chars().count() > GROUP_TITLE_MAX_LEN {
            return Err(InvalidGroupTitleError(title));
        }

        Ok(Self {
            title,
            slug,
            description,
        })
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The group title is longer than {GROUP_TITLE_MAX_LEN} characters: {0}")]
pub struct InvalidGroupTitleError(String);

/// URL key of a group: ASCII letters, digits, `-` and `_`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct Slug(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The slug is invalid: {0}")]
pub struct InvalidSlugError(String);

impl Slug {
    pub fn new(slug: String) -> Result<Self, InvalidSlugError> {
        let valid = !slug.is_empty()
            && slug.len() <= SLUG_MAX_LEN
            && slug
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

        if valid {
            Ok(Slug(slug))
        } else {
            Err(InvalidSlugError(slug))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for Slug {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Slug {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        Slug::new(inner).map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"Slug"))
    }
}

#[cfg(test)]
mod tests {
    use super::{CreateGroup, GROUP_TITLE_MAX_LEN, Slug};

    #[test]
    fn slug_charset() {
        assert!(Slug::new("test-slug_2".to_owned()).is_ok());
        assert!(Slug::new(String::new()).is_err());
        assert!(Slug::new("with space".to_owned()).is_err());
        assert!(Slug::new("кириллица".to_owned()).is_err());
    }

    #[test]
    fn group_title_is_bounded() {
        let slug = Slug::new("first".to_owned()).unwrap();
        let fits = "x".repeat(GROUP_TITLE_MAX_LEN);
        let too_long = "x".repeat(GROUP_TITLE_MAX_LEN + 1);
        assert!(CreateGroup::new(fits, slug.clone(), String::new()).is_ok());
        assert!(CreateGroup::new(too_long, slug, String::new()).is_err());
    }
}
