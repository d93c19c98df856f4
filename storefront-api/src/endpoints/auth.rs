use super::users::AppUser;
use crate::macros::setter;
use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use tower_api_client::{Method, Request, RequestData};

pub const MIN_PASSWORD_LEN: usize = 6;

// Requests

/// Links a freshly created identity to a backend profile
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUser {
    uid: String,
    email: String,
    #[serde(serialize_with = "expose")]
    password: SecretString,
    first_name: String,
    last_name: String,
}

impl RegisterUser {
    pub fn new(uid: impl Into<String>, email: impl Into<String>, password: SecretString) -> Self {
        Self {
            uid: uid.into(),
            email: email.into(),
            password,
            first_name: String::new(),
            last_name: String::new(),
        }
    }

    setter!(first_name: String);
    setter!(last_name: String);

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn full_name(&self) -> (&str, &str) {
        (&self.first_name, &self.last_name)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.email.trim().is_empty() {
            return Err("email is required".to_string());
        }
        if self.password.expose_secret().chars().count() < MIN_PASSWORD_LEN {
            return Err(format!(
                "password must be at least {} characters long",
                MIN_PASSWORD_LEN
            ));
        }
        Ok(())
    }
}

fn expose<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

impl Request for RegisterUser {
    type Data = Self;
    type Response = AppUser;
    const METHOD: Method = Method::POST;

    fn endpoint(&self) -> Cow<'_, str> {
        "/auth/register".into()
    }

    fn data(&self) -> RequestData<&Self::Data> {
        RequestData::Json(self)
    }
}
