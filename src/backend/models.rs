// Row types shared by every backend collaborator
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Fresh time-ordered identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Authentication identity, distinct from the profile that backs it.
    UserId
);
string_id!(ProfileId);
string_id!(PodId);
string_id!(MemberId);
string_id!(MessageId);

/// Error returned when a stored enum column holds an unknown value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant: {}", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant(other.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(Gender {
    Woman => "woman",
    Man => "man",
    NonBinary => "non_binary",
    Genderqueer => "genderqueer",
    Other => "other",
});

text_enum!(Orientation {
    Straight => "straight",
    Gay => "gay",
    Lesbian => "lesbian",
    Bisexual => "bisexual",
    Pansexual => "pansexual",
    Asexual => "asexual",
    Other => "other",
});

text_enum!(RelationshipStatus {
    Single => "single",
    Dating => "dating",
    Married => "married",
    ItsComplicated => "its_complicated",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub user_id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub gender: Option<Gender>,
    pub orientation: Option<Orientation>,
    pub relationship_status: Option<RelationshipStatus>,
    pub birth_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Name shown next to messages: display name when set, username otherwise.
    pub fn shown_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// Mutable profile attributes, used for both creation and update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileFields {
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub gender: Option<Gender>,
    pub orientation: Option<Orientation>,
    pub relationship_status: Option<RelationshipStatus>,
    pub birth_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub avatar_url: Option<String>,
}

impl ProfileFields {
    /// Trim text fields and drop the ones left empty.
    pub fn normalized(self) -> Self {
        Self {
            username: self.username.trim().to_string(),
            display_name: non_empty(self.display_name),
            bio: non_empty(self.bio),
            location: non_empty(self.location),
            avatar_url: non_empty(self.avatar_url),
            ..self
        }
    }
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub id: PodId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPod {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodMember {
    pub id: MemberId,
    pub pod_id: PodId,
    pub profile_id: ProfileId,
    pub joined_at: DateTime<Utc>,
}

/// A pod with its members' profiles resolved through `pod_members`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodWithMembers {
    #[serde(flatten)]
    pub pod: Pod,
    pub members: Vec<Profile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub pod_id: PodId,
    pub sender_id: ProfileId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub pod_id: PodId,
    pub sender_id: ProfileId,
    pub content: String,
}

/// A message denormalized with its sender's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageWithSender {
    #[serde(flatten)]
    pub message: Message,
    pub sender: Profile,
}

/// Stored credentials for an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}
