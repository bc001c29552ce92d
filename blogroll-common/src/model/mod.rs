pub mod auth;
pub mod comment;
pub mod follow;
pub mod group;
pub mod post;
pub mod user;

use crate::model::{
    auth::{InvalidAuthTokenHashError, NonPositiveLifetimeError},
    group::{InvalidGroupTitleError, InvalidSlugError},
    user::InvalidUsernameError,
};
use derive_where::derive_where;
use serde::{Deserialize, Serialize, Serializer, ser::Error as _};
use std::{fmt::Display, marker::PhantomData, num::ParseIntError, str::FromStr};
use thiserror::Error;
use time::{UtcDateTime, format_description::BorrowedFormatItem, macros::format_description};

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]");

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    Username(#[from] InvalidUsernameError),
    #[error(transparent)]
    Slug(#[from] InvalidSlugError),
    #[error(transparent)]
    GroupTitle(#[from] InvalidGroupTitleError),
    #[error(transparent)]
    Lifetime(#[from] NonPositiveLifetimeError),
    #[error(transparent)]
    TokenHash(#[from] InvalidAuthTokenHashError),
}

/// Surrogate key of a stored entity, tagged with the entity it belongs to.
#[derive_where(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<Marker>(i64, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(raw: i64) -> Self {
        Self(raw, PhantomData)
    }

    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> FromStr for Id<Marker> {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        i64::from_str(s).map(Self::new)
    }
}

impl<Marker> From<i64> for Id<Marker> {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<Id<Marker>> for i64 {
    fn from(value: Id<Marker>) -> Self {
        value.0
    }
}

pub(crate) fn serialize_timestamp<S>(value: &UtcDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let formatted = value.format(TIMESTAMP_FORMAT).map_err(S::Error::custom)?;
    serializer.serialize_str(&formatted)
}

#[cfg(test)]
mod tests {
    use super::Id;
    use crate::model::post::PostMarker;

    #[test]
    fn id_parses_and_displays_as_integer() {
        let id: Id<PostMarker> = "42".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
        assert!("forty-two".parse::<Id<PostMarker>>().is_err());
    }

    #[test]
    fn id_serializes_transparently() {
        let id = Id::<PostMarker>::new(7);
        assert_eq!(serde_json::to_string(&id).unwrap(), "7");
        let back: Id<PostMarker> = serde_json::from_str("7").unwrap();
        assert_eq!(back, id);
    }
}
