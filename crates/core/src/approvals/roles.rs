use serde::{Deserialize, Serialize};

use crate::domain::approval::UserId;
use crate::ports::{CollaboratorError, UserDirectory};

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_EMPLOYEE: &str = "employee";
pub const ROLE_MANAGER: &str = "manager";
pub const ROLE_FINANCE: &str = "finance";
pub const ROLE_DIRECTOR: &str = "director";

const KNOWN_ROLES: [&str; 5] = [ROLE_EMPLOYEE, ROLE_MANAGER, ROLE_FINANCE, ROLE_DIRECTOR, ROLE_ADMIN];

/// Role hierarchy: admin clears every step, director also clears finance
/// steps, every other role only clears its own. Unknown roles never match.
pub fn role_permits(user_role: &str, required_role: &str) -> bool {
    let user_role = normalize_role(user_role);
    let required_role = normalize_role(required_role);

    match user_role.as_str() {
        ROLE_ADMIN => true,
        ROLE_DIRECTOR => required_role == ROLE_DIRECTOR || required_role == ROLE_FINANCE,
        ROLE_EMPLOYEE | ROLE_MANAGER | ROLE_FINANCE => required_role == user_role,
        _ => false,
    }
}

pub fn normalize_role(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// The user acting on a request, with the role the directory reported for
/// them. A missing role means the user was not found.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Option<String>,
}

impl Actor {
    pub fn new(user_id: UserId, role: Option<String>) -> Self {
        Self { user_id, role }
    }

    pub fn with_role(user_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self { user_id: UserId(user_id.into()), role: Some(role.into()) }
    }

    pub fn can_approve(&self, required_role: &str) -> bool {
        self.role.as_deref().is_some_and(|role| role_permits(role, required_role))
    }

    /// Step roles whose open requests this actor may browse besides their
    /// own, or `None` when every request is visible (admins and directors).
    pub fn visible_step_roles(&self) -> Option<Vec<&'static str>> {
        match self.role.as_deref().map(normalize_role).as_deref() {
            Some(ROLE_ADMIN) | Some(ROLE_DIRECTOR) => None,
            Some(role) => Some(
                KNOWN_ROLES.into_iter().filter(|required| role_permits(role, required)).collect(),
            ),
            None => Some(Vec::new()),
        }
    }
}

pub struct RoleResolver<'a, D: ?Sized> {
    directory: &'a D,
}

impl<'a, D> RoleResolver<'a, D>
where
    D: UserDirectory + ?Sized,
{
    pub fn new(directory: &'a D) -> Self {
        Self { directory }
    }

    pub async fn actor(&self, user_id: &UserId) -> Result<Actor, CollaboratorError> {
        let role = self.directory.get_user_role(user_id).await?;
        Ok(Actor::new(user_id.clone(), role))
    }

    pub async fn can_approve(
        &self,
        user_id: &UserId,
        required_role: &str,
    ) -> Result<bool, CollaboratorError> {
        Ok(self.actor(user_id).await?.can_approve(required_role))
    }
}
