use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    #[default]
    #[serde(alias = "user")]
    Customer,
}

/// Backends disagree on whether the role comes as `role` or `isAdmin`, so
/// both are read and `role` wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "UserWire", into = "UserWire")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub is_subscribed: bool,
    pub delivery_enabled: bool,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserWire {
    #[serde(alias = "_id")]
    id: String,
    #[serde(default, alias = "username")]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<UserRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_admin: Option<bool>,
    #[serde(default)]
    is_subscribed: bool,
    #[serde(default, alias = "robotDelivery")]
    delivery_enabled: bool,
}

impl From<UserWire> for User {
    fn from(wire: UserWire) -> Self {
        let role = wire.role.unwrap_or(match wire.is_admin {
            Some(true) => UserRole::Admin,
            _ => UserRole::Customer,
        });

        Self {
            id: wire.id,
            name: wire.name,
            email: wire.email,
            role,
            is_subscribed: wire.is_subscribed,
            delivery_enabled: wire.delivery_enabled,
        }
    }
}

impl From<User> for UserWire {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: Some(user.role),
            is_admin: Some(user.role == UserRole::Admin),
            is_subscribed: user.is_subscribed,
            delivery_enabled: user.delivery_enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    #[serde(alias = "accessToken")]
    pub token: String,
    pub user: User,
}
