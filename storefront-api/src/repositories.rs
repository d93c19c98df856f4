use crate::endpoints::{
    auth::RegisterUser,
    users::{GetCurrentUser, UpdateCurrentUser},
};
use secrecy::SecretString;

pub struct AuthRepository;

impl AuthRepository {
    pub fn new() -> Self {
        Self {}
    }

    pub fn register(
        &self,
        uid: impl Into<String>,
        email: impl Into<String>,
        password: SecretString,
    ) -> RegisterUser {
        RegisterUser::new(uid, email, password)
    }
}

pub struct UserRepository;

impl UserRepository {
    pub fn new() -> Self {
        Self {}
    }

    pub fn me(&self) -> GetCurrentUser {
        GetCurrentUser::new()
    }

    pub fn update_me(&self) -> UpdateCurrentUser {
        UpdateCurrentUser::new()
    }
}
