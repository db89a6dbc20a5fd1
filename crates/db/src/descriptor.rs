use std::fmt;

use url::Url;

use crate::error::{DbError, Result};

/// Port used when the descriptor does not name one.
pub const DEFAULT_PORT: u16 = 27017;

/// Parsed form of `scheme://[user:pass@]host[:port]/dbname`.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub dbtype: String,
    pub dbname: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectionDescriptor {
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).map_err(|err| {
            DbError::InvalidDescriptor(format!("{}: {}", redact_raw(raw), err))
        })?;
        let path = url.path();
        // Only the first slash separates the authority; `sqlite:////var/db`
        // keeps its absolute path.
        let dbname = path.strip_prefix('/').unwrap_or(path).to_string();
        if dbname.is_empty() {
            return Err(DbError::InvalidDescriptor(format!(
                "{}: missing database name",
                redact_raw(raw)
            )));
        }
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => "localhost".to_string(),
        };
        let (username, password) = if url.username().is_empty() {
            (None, None)
        } else {
            (
                Some(url.username().to_string()),
                Some(url.password().unwrap_or_default().to_string()),
            )
        };
        Ok(Self {
            dbtype: url.scheme().to_string(),
            dbname,
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            username,
            password,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some()
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.dbtype)?;
        if let Some(username) = &self.username {
            write!(f, "{}:***@", username)?;
        }
        write!(f, "{}:{}/{}", self.host, self.port, self.dbname)
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("dbtype", &self.dbtype)
            .field("dbname", &self.dbname)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

fn redact_raw(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "[invalid descriptor]".to_string(),
    }
}
