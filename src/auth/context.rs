// src/auth/context.rs
// Session state for admin front-ends: loading flag, user, sign-in/out redirects.

use super::AuthUser;

pub const LOGIN_PATH: &str = "/admin/login";
pub const ADMIN_HOME: &str = "/admin";

#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub user: AuthUser,
}

#[derive(Debug, Clone)]
pub enum AuthEvent {
    /// Initial session fetch finished.
    SessionLoaded(Option<Session>),
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
}

/// Starts in `loading`; settles once the first session result arrives.
#[derive(Debug, Clone)]
pub struct AuthContext {
    loading: bool,
    session: Option<Session>,
}

impl Default for AuthContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthContext {
    pub fn new() -> Self {
        Self {
            loading: true,
            session: None,
        }
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn user(&self) -> Option<&AuthUser> {
        self.session.as_ref().map(|s| &s.user)
    }

    pub fn is_admin(&self) -> bool {
        super::is_admin(self.user())
    }

    pub fn is_moderator(&self) -> bool {
        super::is_moderator(self.user())
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        super::has_permission(self.user(), permission)
    }

    /// Applies an auth event and returns where the client should navigate,
    /// if anywhere.
    pub fn apply(&mut self, event: AuthEvent, current_path: &str) -> Option<&'static str> {
        match event {
            AuthEvent::SessionLoaded(session) => {
                self.session = session;
                self.loading = false;
                None
            }
            AuthEvent::SignedIn(session) => {
                self.session = Some(session);
                self.loading = false;
                (current_path == LOGIN_PATH).then_some(ADMIN_HOME)
            }
            AuthEvent::TokenRefreshed(session) => {
                self.session = Some(session);
                None
            }
            AuthEvent::SignedOut => {
                self.session = None;
                self.loading = false;
                Some(LOGIN_PATH)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserMetadata;
    use crate::config::AdminPolicy;

    fn session(role: Option<&str>) -> Session {
        Session {
            access_token: "token".to_string(),
            user: AuthUser::new(
                "user-1",
                Some("someone@example.org"),
                UserMetadata {
                    role: role.map(str::to_string),
                    permissions: vec![],
                },
                &AdminPolicy::default(),
            ),
        }
    }

    #[test]
    fn starts_loading_and_settles() {
        let mut ctx = AuthContext::new();
        assert!(ctx.loading());
        assert!(!ctx.is_admin());

        assert_eq!(ctx.apply(AuthEvent::SessionLoaded(None), "/"), None);
        assert!(!ctx.loading());
        assert!(ctx.user().is_none());
    }

    #[test]
    fn sign_in_on_login_page_redirects_to_admin() {
        let mut ctx = AuthContext::new();
        let redirect = ctx.apply(AuthEvent::SignedIn(session(Some("admin"))), LOGIN_PATH);
        assert_eq!(redirect, Some(ADMIN_HOME));
        assert!(ctx.is_admin());

        let mut ctx = AuthContext::new();
        assert_eq!(ctx.apply(AuthEvent::SignedIn(session(None)), "/admin/news"), None);
        assert!(!ctx.is_moderator());
    }

    #[test]
    fn sign_out_clears_session_and_redirects_to_login() {
        let mut ctx = AuthContext::new();
        ctx.apply(AuthEvent::SessionLoaded(Some(session(Some("moderator")))), "/admin");
        assert!(ctx.is_moderator());

        assert_eq!(ctx.apply(AuthEvent::SignedOut, "/admin"), Some(LOGIN_PATH));
        assert!(ctx.session().is_none());
        assert!(!ctx.is_moderator());
    }
}
