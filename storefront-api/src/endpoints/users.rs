use super::{AccountStatus, Role, UserId};
use crate::macros::setter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tower_api_client::{Method, Request, RequestData};

// Common

/// Application-level profile of the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppUser {
    pub id: UserId,
    /// Identity-provider reference; absent from some profile responses
    #[serde(default)]
    pub uid: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub role: Role,
    pub status: AccountStatus,
}

impl AppUser {
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.status == AccountStatus::Blocked
    }
}

// Requests

#[derive(Default, Debug, Clone, Serialize)]
pub struct GetCurrentUser;

impl GetCurrentUser {
    pub fn new() -> Self {
        Self
    }
}

impl Request for GetCurrentUser {
    type Data = Self;
    type Response = AppUser;

    fn endpoint(&self) -> Cow<'_, str> {
        "/users/me".into()
    }

    fn data(&self) -> RequestData<&Self> {
        RequestData::Empty
    }
}

#[derive(Default, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCurrentUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preferred_language: Option<String>,
}

impl UpdateCurrentUser {
    pub fn new() -> Self {
        Self::default()
    }

    setter!(opt first_name: String);
    setter!(opt last_name: String);
    setter!(opt phone_number: String);
    setter!(opt address: String);
    setter!(opt preferred_language: String);
}

impl Request for UpdateCurrentUser {
    type Data = Self;
    type Response = AppUser;
    const METHOD: Method = Method::PUT;

    fn endpoint(&self) -> Cow<'_, str> {
        "/users/me".into()
    }

    fn data(&self) -> RequestData<&Self::Data> {
        RequestData::Json(self)
    }
}
