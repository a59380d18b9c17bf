//! LDAP support.
//!
//! [`Connector`] and [`Session`] are the only directory operations the
//! verification flow needs. [`Ldap3Connector`] backs them with `ldap3`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{
    Ldap as Ldap3, LdapConnAsync, LdapConnSettings, LdapError, Scope,
    SearchEntry,
};
use url::Url;

use crate::config;

const LDAP_SCHEMES: [&str; 3] = ["ldap", "ldaps", "ldapi"];

/// Opens directory sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection to `address`, a normalized LDAP URL.
    async fn connect(
        &self,
        address: &str,
    ) -> Result<Box<dyn Session>, LdapError>;
}

/// One open connection to a directory server.
#[async_trait]
pub trait Session: Send {
    /// Authenticate the connection as `dn`.
    async fn bind(&mut self, dn: &str, password: &str)
    -> Result<(), LdapError>;

    /// Subtree search below `base_dn`. Referrals are never chased.
    async fn search(
        &mut self,
        base_dn: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<DirectoryEntry>, LdapError>;

    /// Release the connection.
    async fn close(&mut self) -> Result<(), LdapError>;
}

/// A search result: DN and attribute values.
///
/// Attribute names are kept lower-cased, lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    attributes: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// Create a new [`DirectoryEntry`].
    pub fn new<K, V>(
        dn: impl Into<String>,
        attributes: impl IntoIterator<Item = (K, Vec<V>)>,
    ) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut entry = Self {
            dn: dn.into(),
            attributes: HashMap::new(),
        };

        for (name, values) in attributes {
            entry.push(name.as_ref(), values.into_iter().map(Into::into));
        }

        entry
    }

    fn push(&mut self, name: &str, values: impl IntoIterator<Item = String>) {
        self.attributes
            .entry(name.to_lowercase())
            .or_default()
            .extend(values);
    }

    /// Values of `name`, in server order.
    pub fn values(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .get(&name.to_lowercase())
            .map(Vec::as_slice)
    }
}

impl From<SearchEntry> for DirectoryEntry {
    fn from(entry: SearchEntry) -> Self {
        let mut this = Self::new(entry.dn, entry.attrs);

        for (name, values) in entry.bin_attrs {
            this.push(
                &name,
                values
                    .iter()
                    .map(|value| String::from_utf8_lossy(value).into_owned()),
            );
        }

        this
    }
}

/// Reasons a server address cannot be dialed.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error("unsupported scheme `{0}`")]
    Scheme(String),
    #[error("missing host")]
    MissingHost,
}

/// Turn user input into an LDAP URL.
///
/// A bare `host[:port]` means plain `ldap://`.
pub fn normalize_address(server: &str) -> Result<String, AddressError> {
    let address = if server.contains("://") {
        server.to_owned()
    } else {
        format!("ldap://{server}")
    };

    let url = Url::parse(&address)?;
    if !LDAP_SCHEMES.contains(&url.scheme()) {
        return Err(AddressError::Scheme(url.scheme().to_owned()));
    }
    if url.scheme() != "ldapi" && url.host_str().is_none_or(str::is_empty) {
        return Err(AddressError::MissingHost);
    }

    Ok(address)
}

/// `(uid=<username>)` with RFC 4515 escaping.
pub fn uid_filter(username: &str) -> String {
    format!("(uid={})", ldap3::ldap_escape(username))
}

/// [`Connector`] using `ldap3`.
#[derive(Debug, Clone)]
pub struct Ldap3Connector {
    config: config::Ldap,
}

impl Ldap3Connector {
    pub fn new(config: config::Ldap) -> Self {
        Self { config }
    }

    fn settings(&self) -> LdapConnSettings {
        LdapConnSettings::new()
            .set_conn_timeout(self.config.connect_timeout())
            .set_starttls(self.config.starttls)
            .set_no_tls_verify(!self.config.tls_verify)
    }
}

#[async_trait]
impl Connector for Ldap3Connector {
    async fn connect(
        &self,
        address: &str,
    ) -> Result<Box<dyn Session>, LdapError> {
        let (handle, conn) =
            LdapConnAsync::with_settings(self.settings(), address).await?;

        let server = address.to_owned();
        tokio::spawn(async move {
            if let Err(err) = handle.drive().await {
                tracing::warn!(
                    %server,
                    error = %err,
                    "ldap connection driver stopped"
                );
            }
        });

        Ok(Box::new(Ldap3Session {
            conn,
            timeout: self.config.operation_timeout(),
        }))
    }
}

struct Ldap3Session {
    conn: Ldap3,
    timeout: Duration,
}

#[async_trait]
impl Session for Ldap3Session {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), LdapError> {
        self.conn
            .with_timeout(self.timeout)
            .simple_bind(dn, password)
            .await?
            .success()?;
        Ok(())
    }

    async fn search(
        &mut self,
        base_dn: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<DirectoryEntry>, LdapError> {
        let (results, _) = self
            .conn
            .with_timeout(self.timeout)
            .search(base_dn, Scope::Subtree, filter, attributes.to_vec())
            .await?
            .success()?;

        Ok(results
            .into_iter()
            .filter(|result| !result.is_ref() && !result.is_intermediate())
            .map(|result| SearchEntry::construct(result).into())
            .collect())
    }

    async fn close(&mut self) -> Result<(), LdapError> {
        self.conn.with_timeout(self.timeout).unbind().await
    }
}

/// In-memory directory recording every call it receives.
#[cfg(test)]
pub mod mock {
    use std::sync::{Arc, Mutex};

    use ldap3::LdapResult;

    use super::*;

    const RC_NO_SUCH_OBJECT: u32 = 32;
    const RC_INVALID_CREDENTIALS: u32 = 49;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Connect(String),
        Bind(String),
        Search { base_dn: String, filter: String },
        Close,
    }

    #[derive(Debug, Clone)]
    pub struct MockDirectory {
        reachable: bool,
        base_dn: String,
        passwords: HashMap<String, String>,
        entries: Vec<DirectoryEntry>,
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl MockDirectory {
        pub fn new(base_dn: &str) -> Self {
            Self {
                reachable: true,
                base_dn: base_dn.to_owned(),
                passwords: HashMap::new(),
                entries: Vec::new(),
                calls: Arc::default(),
            }
        }

        pub fn with_account(mut self, dn: &str, password: &str) -> Self {
            self.passwords.insert(dn.to_owned(), password.to_owned());
            self
        }

        pub fn with_entry(
            mut self,
            entry: DirectoryEntry,
            password: &str,
        ) -> Self {
            self.passwords.insert(entry.dn.clone(), password.to_owned());
            self.entries.push(entry);
            self
        }

        pub fn unreachable(mut self) -> Self {
            self.reachable = false;
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn matches(&self, entry: &DirectoryEntry, filter: &str) -> bool {
            let uids = entry.values("uid").unwrap_or_default();
            match filter {
                "(uid=*)" => !uids.is_empty(),
                filter => uids.iter().any(|uid| uid_filter(uid) == filter),
            }
        }
    }

    pub fn rejection(rc: u32, text: &str) -> LdapError {
        LdapError::LdapResult {
            result: LdapResult {
                rc,
                matched: String::new(),
                text: text.to_owned(),
                refs: vec![],
                ctrls: vec![],
            },
        }
    }

    #[async_trait]
    impl Connector for MockDirectory {
        async fn connect(
            &self,
            address: &str,
        ) -> Result<Box<dyn Session>, LdapError> {
            self.record(Call::Connect(address.to_owned()));

            if !self.reachable {
                return Err(std::io::Error::from(
                    std::io::ErrorKind::ConnectionRefused,
                )
                .into());
            }

            Ok(Box::new(self.clone()))
        }
    }

    #[async_trait]
    impl Session for MockDirectory {
        async fn bind(
            &mut self,
            dn: &str,
            password: &str,
        ) -> Result<(), LdapError> {
            self.record(Call::Bind(dn.to_owned()));

            match self.passwords.get(dn) {
                Some(expected) if expected == password => Ok(()),
                _ => Err(rejection(
                    RC_INVALID_CREDENTIALS,
                    "Invalid credentials",
                )),
            }
        }

        async fn search(
            &mut self,
            base_dn: &str,
            filter: &str,
            _attributes: &[&str],
        ) -> Result<Vec<DirectoryEntry>, LdapError> {
            self.record(Call::Search {
                base_dn: base_dn.to_owned(),
                filter: filter.to_owned(),
            });

            if !base_dn.eq_ignore_ascii_case(&self.base_dn) {
                return Err(rejection(RC_NO_SUCH_OBJECT, "No such object"));
            }

            Ok(self
                .entries
                .iter()
                .filter(|entry| self.matches(entry, filter))
                .cloned()
                .collect())
        }

        async fn close(&mut self) -> Result<(), LdapError> {
            self.record(Call::Close);
            Ok(())
        }
    }
}
