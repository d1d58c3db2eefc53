//! Rate-limit subjects and how requests map onto them.
//!
//! A subject is the identity a quota is tracked against: the authenticated
//! user when there is one, else the client IP, else a shared anonymous bucket.

use std::fmt;
use std::net::IpAddr;

/// Identifier used for requests with neither a user nor a client address.
pub const ANONYMOUS: &str = "anonymous";

/// The identity a quota is tracked against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    /// Authenticated user id.
    User(String),
    /// Client address for unauthenticated requests.
    Ip(IpAddr),
    /// Neither identity could be resolved.
    Anonymous,
}

impl Subject {
    /// Pick the strongest identity available: user id, then IP, then anonymous.
    ///
    /// Blank user ids are ignored.
    pub fn from_parts(user_id: Option<&str>, client_ip: Option<IpAddr>) -> Self {
        match (user_id.map(str::trim).filter(|id| !id.is_empty()), client_ip) {
            (Some(id), _) => Subject::User(id.to_string()),
            (None, Some(ip)) => Subject::Ip(ip),
            (None, None) => Subject::Anonymous,
        }
    }

    /// Stable identifier used as the first half of the composite key.
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::User(id) => f.write_str(id),
            Subject::Ip(ip) => write!(f, "{ip}"),
            Subject::Anonymous => f.write_str(ANONYMOUS),
        }
    }
}

/// Composite key: the unit of quota tracking.
pub fn composite_key(subject_id: &str, route: &str) -> String {
    let mut key = String::with_capacity(subject_id.len() + route.len() + 1);
    key.push_str(subject_id);
    key.push(':');
    key.push_str(route);
    key
}

/// Derives the subject for an incoming request.
pub trait SubjectResolver<Req>: Send + Sync {
    fn resolve(&self, req: &Req) -> Subject;
}

impl<Req, F> SubjectResolver<Req> for F
where
    F: Fn(&Req) -> Subject + Send + Sync,
{
    fn resolve(&self, req: &Req) -> Subject {
        self(req)
    }
}
