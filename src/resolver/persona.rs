//! Fixed assistant persona and the navigation route table.
//!
//! [`Persona`] owns the system instruction sent with every resolver call and
//! the set of routes the site actually has.  The resolver uses
//! [`Persona::is_known_route`] to drop navigation intents that point nowhere.

// ---------------------------------------------------------------------------
// Persona text
// ---------------------------------------------------------------------------

const IDENTITY: &str = "\
You are the \"Neural Interface\" for a cyberpunk-styled security and automation portfolio.
Your persona is JARVIS-like: intelligent, efficient, slightly robotic but helpful.";

const CORE_DATA: &str = "\
CORE DATA:
1. WordPress Security: costs $150 (emergency). Includes malware removal, blacklist fix, 6G firewall.
2. GoHighLevel (GHL): CRM automation, AI bots, snapshots.
3. Contact: WhatsApp is priority. Calendly for calls.";

const TASK: &str = "\
TASK:
Analyze the voice transcript and answer with JSON only:
{\"response\": \"short spoken reply, at most 12 words\", \"route\": \"/path\" or null}
Use null for route when the user is just chatting.";

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// A navigable page and the topics that should lead to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub path: &'static str,
    pub description: &'static str,
}

/// Pages the resolver may navigate to.
pub const ROUTES: &[Route] = &[
    Route { path: "/", description: "Home" },
    Route { path: "/security-services", description: "Security / hacked site" },
    Route { path: "/services", description: "GHL / ads / SEO" },
    Route { path: "/contact", description: "Book a call" },
    Route { path: "/tools", description: "Lab / gadgets" },
    Route { path: "/blog", description: "Intel / logs" },
];

// ---------------------------------------------------------------------------
// Persona
// ---------------------------------------------------------------------------

/// System persona plus route table.
///
/// ```rust
/// use voice_commander::resolver::Persona;
///
/// let persona = Persona::default();
/// assert!(persona.system_prompt().contains("/security-services"));
/// assert!(persona.is_known_route("/contact"));
/// assert!(!persona.is_known_route("/admin"));
/// ```
#[derive(Debug, Clone)]
pub struct Persona {
    routes: &'static [Route],
}

impl Persona {
    /// Persona with a custom route table.
    pub fn with_routes(routes: &'static [Route]) -> Self {
        Self { routes }
    }

    /// Full system instruction: identity, core data, task and route list.
    pub fn system_prompt(&self) -> String {
        let mut prompt = String::with_capacity(1024);
        prompt.push_str(IDENTITY);
        prompt.push_str("\n\n");
        prompt.push_str(CORE_DATA);
        prompt.push_str("\n\n");
        prompt.push_str(TASK);
        prompt.push_str("\n\nROUTES:\n");
        for route in self.routes {
            prompt.push_str(&format!("- {} ({})\n", route.path, route.description));
        }
        prompt
    }

    /// Whether `path` is one of the configured routes.
    ///
    /// A single trailing slash is tolerated (`/blog/` matches `/blog`).
    pub fn is_known_route(&self, path: &str) -> bool {
        let path = path.trim();
        let normalized = if path.len() > 1 {
            path.strip_suffix('/').unwrap_or(path)
        } else {
            path
        };
        self.routes.iter().any(|r| r.path == normalized)
    }

    pub fn routes(&self) -> &'static [Route] {
        self.routes
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self::with_routes(ROUTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_every_route() {
        let prompt = Persona::default().system_prompt();
        for route in ROUTES {
            assert!(prompt.contains(route.path), "missing {}", route.path);
        }
    }

    #[test]
    fn prompt_asks_for_json() {
        assert!(Persona::default().system_prompt().contains("\"route\""));
    }

    #[test]
    fn root_route_is_known() {
        assert!(Persona::default().is_known_route("/"));
    }

    #[test]
    fn trailing_slash_is_tolerated() {
        assert!(Persona::default().is_known_route("/blog/"));
    }

    #[test]
    fn unknown_route_is_rejected() {
        let persona = Persona::default();
        assert!(!persona.is_known_route("/wp-admin"));
        assert!(!persona.is_known_route(""));
    }

    #[test]
    fn custom_table_replaces_default() {
        const ONLY: &[Route] = &[Route { path: "/x", description: "x" }];
        let persona = Persona::with_routes(ONLY);
        assert!(persona.is_known_route("/x"));
        assert!(!persona.is_known_route("/contact"));
    }
}
