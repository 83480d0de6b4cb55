//! Navigation surfaces the session layer redirects between.

/// Well-known portal locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routes {
    /// The login surface; unauthenticated users are sent here.
    pub login: String,
    /// Where an authenticated user lands after restoration.
    pub landing: String,
    /// Entry surfaces a restored session is moved away from.
    pub entry: Vec<String>,
}

impl Default for Routes {
    fn default() -> Self {
        Self {
            login: "/login".into(),
            landing: "/home".into(),
            entry: vec!["/".into(), "/login".into()],
        }
    }
}

impl Routes {
    pub fn new(login: impl Into<String>, landing: impl Into<String>) -> Self {
        let login = login.into();
        Self {
            entry: vec!["/".into(), login.clone()],
            login,
            landing: landing.into(),
        }
    }

    /// Whether `path` is one of the entry surfaces. Query strings,
    /// fragments and trailing slashes are ignored.
    pub fn is_entry(&self, path: &str) -> bool {
        let path = normalize(path);
        self.entry.iter().any(|entry| normalize(entry) == path)
    }
}

fn normalize(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// A navigation the caller must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub to: String,
    /// Location to return to once the user has signed in.
    pub return_to: Option<String>,
}

impl Redirect {
    pub fn to(path: impl Into<String>) -> Self {
        Self {
            to: path.into(),
            return_to: None,
        }
    }

    /// The full location, e.g. `/login?redirect=%2Fconsultation%2F42`.
    pub fn location(&self) -> String {
        match &self.return_to {
            Some(back) => format!("{}?redirect={}", self.to, urlencoding::encode(back)),
            None => self.to.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_entry_surfaces() {
        let routes = Routes::default();
        assert!(routes.is_entry("/"));
        assert!(routes.is_entry("/login"));
        assert!(routes.is_entry("/login/"));
        assert!(routes.is_entry("/login?expired=1"));
        assert!(!routes.is_entry("/home"));
        assert!(!routes.is_entry("/login-help"));
    }

    #[test]
    fn custom_login_is_an_entry() {
        let routes = Routes::new("/entrar", "/inicio");
        assert!(routes.is_entry("/entrar"));
        assert!(routes.is_entry(""));
        assert_eq!(routes.landing, "/inicio");
    }

    #[test]
    fn redirect_location_encodes_return_path() {
        let redirect = Redirect {
            to: "/login".into(),
            return_to: Some("/consultation/42?tab=chat".into()),
        };
        assert_eq!(
            redirect.location(),
            "/login?redirect=%2Fconsultation%2F42%3Ftab%3Dchat"
        );
    }

    #[test]
    fn plain_redirect_location() {
        assert_eq!(Redirect::to("/home").location(), "/home");
    }
}
