//! Route access decisions for UIs that have a notion of pages.

/// Routes reachable without a session.
pub const PUBLIC_ROUTES: &[&str] = &["/login", "/register", "/logout"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    RedirectToLogin,
}

pub fn guard(route: &str, authenticated: bool) -> RouteDecision {
    if authenticated || is_public(route) {
        RouteDecision::Allow
    } else {
        RouteDecision::RedirectToLogin
    }
}

fn is_public(route: &str) -> bool {
    let path = route
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    PUBLIC_ROUTES.contains(&path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_routes_always_allowed() {
        assert_eq!(guard("/login", false), RouteDecision::Allow);
        assert_eq!(guard("/register/", false), RouteDecision::Allow);
        assert_eq!(guard("/logout?next=/chat", false), RouteDecision::Allow);
    }

    #[test]
    fn test_private_routes_need_session() {
        assert_eq!(guard("/chat", false), RouteDecision::RedirectToLogin);
        assert_eq!(guard("/", false), RouteDecision::RedirectToLogin);
        assert_eq!(guard("/login-help", false), RouteDecision::RedirectToLogin);
        assert_eq!(guard("/chat", true), RouteDecision::Allow);
    }
}
