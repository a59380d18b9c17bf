//! Credential verification against a directory server.
//!
//! Connect, bind as the administrator, look the user up, then bind as the
//! user. The first failing step ends the run and the session is closed in
//! every case.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use validator::Validate;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::attributes::UserAttributes;
use crate::error::{Result, ServerError};
use crate::ldap::{self, Connector, Session};
use crate::telemetry;

/// Tracing target for every verification event.
pub const LOG_TARGET: &str = "ldap_test";

/// User and operational attributes.
const SEARCH_ATTRIBUTES: [&str; 2] = ["*", "+"];

/// Form sent to the verification endpoint.
///
/// Missing fields deserialize to empty strings and fail validation.
#[derive(Default, Deserialize, Validate, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub ldap_server: String,
    #[serde(default, rename = "baseDN")]
    #[validate(length(min = 1))]
    pub base_dn: String,
    #[serde(default, rename = "adminDN")]
    #[validate(length(min = 1))]
    pub admin_dn: String,
    #[serde(default)]
    #[validate(length(min = 1))]
    pub admin_password: String,
    #[serde(default)]
    #[validate(length(min = 1))]
    pub test_username: String,
    #[serde(default)]
    #[validate(length(min = 1))]
    pub test_password: String,
}

impl fmt::Debug for VerificationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationRequest")
            .field("ldap_server", &self.ldap_server)
            .field("base_dn", &self.base_dn)
            .field("admin_dn", &self.admin_dn)
            .field("admin_password", &"[redacted]")
            .field("test_username", &self.test_username)
            .field("test_password", &"[redacted]")
            .finish()
    }
}

/// A user whose password was accepted by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedUser {
    pub username: String,
    pub dn: String,
    pub attributes: UserAttributes,
}

/// Run the whole verification for `request`.
pub async fn verify(
    connector: &dyn Connector,
    request: &VerificationRequest,
) -> Result<VerifiedUser> {
    tracing::info!(
        target: LOG_TARGET,
        server = %request.ldap_server,
        admin_dn = %request.admin_dn,
        username = %request.test_username,
        "Starting LDAP test"
    );

    let start = Instant::now();
    let result = connect_and_verify(connector, request).await;
    let elapsed = start.elapsed();

    match &result {
        Ok(user) => {
            tracing::info!(
                target: LOG_TARGET,
                username = %user.username,
                ?elapsed,
                "LDAP test completed successfully for user"
            );
            telemetry::record_verification("success", elapsed);
        },
        Err(err) => {
            tracing::error!(
                target: LOG_TARGET,
                kind = err.kind(),
                ?elapsed,
                "{err}"
            );
            telemetry::record_verification(err.kind(), elapsed);
        },
    }

    result
}

async fn connect_and_verify(
    connector: &dyn Connector,
    request: &VerificationRequest,
) -> Result<VerifiedUser> {
    let connect_failure = |source: Box<dyn std::error::Error + Send + Sync>| {
        ServerError::Connect {
            server: request.ldap_server.clone(),
            source: Some(source),
        }
    };

    let address = ldap::normalize_address(&request.ldap_server)
        .map_err(|err| connect_failure(err.into()))?;
    let mut session = connector
        .connect(&address)
        .await
        .map_err(|err| connect_failure(err.into()))?;

    tracing::info!(
        target: LOG_TARGET,
        server = %address,
        "Connected to LDAP server"
    );

    let result = authenticate(session.as_mut(), request).await;

    if let Err(err) = session.close().await {
        tracing::warn!(
            target: LOG_TARGET,
            server = %address,
            error = %err,
            "LDAP connection did not close cleanly"
        );
    }

    result
}

async fn authenticate(
    session: &mut dyn Session,
    request: &VerificationRequest,
) -> Result<VerifiedUser> {
    session
        .bind(&request.admin_dn, &request.admin_password)
        .await
        .map_err(|source| ServerError::AdminBind {
            dn: request.admin_dn.clone(),
            source,
        })?;

    tracing::info!(
        target: LOG_TARGET,
        dn = %request.admin_dn,
        "Admin bind successful"
    );

    let filter = ldap::uid_filter(&request.test_username);
    let entries = session
        .search(&request.base_dn, &filter, &SEARCH_ATTRIBUTES)
        .await
        .map_err(|source| ServerError::Search {
            username: request.test_username.clone(),
            source,
        })?;

    tracing::info!(
        target: LOG_TARGET,
        username = %request.test_username,
        base_dn = %request.base_dn,
        %filter,
        results = entries.len(),
        "Search executed for user"
    );

    let Some(entry) = entries.into_iter().next() else {
        return Err(ServerError::UserNotFound {
            username: request.test_username.clone(),
        });
    };

    tracing::info!(
        target: LOG_TARGET,
        username = %request.test_username,
        dn = %entry.dn,
        "User found"
    );

    session
        .bind(&entry.dn, &request.test_password)
        .await
        .map_err(|source| ServerError::Authentication {
            dn: entry.dn.clone(),
            source,
        })?;

    tracing::info!(
        target: LOG_TARGET,
        username = %request.test_username,
        dn = %entry.dn,
        "User authentication successful"
    );

    Ok(VerifiedUser {
        username: request.test_username.clone(),
        attributes: UserAttributes::from_entry(&entry),
        dn: entry.dn,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::attributes::AttributeValue;
    use crate::ldap::DirectoryEntry;
    use crate::ldap::mock::{Call, MockDirectory};

    pub const BASE_DN: &str = "dc=example,dc=org";
    pub const ADMIN_DN: &str = "cn=admin,dc=example,dc=org";
    pub const USER_DN: &str = "uid=jdoe,ou=people,dc=example,dc=org";

    pub fn directory() -> MockDirectory {
        let jdoe = DirectoryEntry::new(
            USER_DN,
            [
                ("uid", vec!["jdoe"]),
                ("mail", vec!["jdoe@example.org"]),
                ("cn", vec!["John Doe"]),
                ("objectClass", vec!["inetOrgPerson", "top"]),
            ],
        );

        MockDirectory::new(BASE_DN)
            .with_account(ADMIN_DN, "adminpw")
            .with_entry(jdoe, "userpw")
    }

    pub fn request(username: &str, password: &str) -> VerificationRequest {
        VerificationRequest {
            ldap_server: "ldap://example.org".into(),
            base_dn: BASE_DN.into(),
            admin_dn: ADMIN_DN.into(),
            admin_password: "adminpw".into(),
            test_username: username.into(),
            test_password: password.into(),
        }
    }

    fn search(filter: &str) -> Call {
        Call::Search {
            base_dn: BASE_DN.into(),
            filter: filter.into(),
        }
    }

    #[tokio::test]
    async fn test_verify_success() {
        let directory = directory();

        let user = verify(&directory, &request("jdoe", "userpw"))
            .await
            .unwrap();

        assert_eq!(user.username, "jdoe");
        assert_eq!(user.dn, USER_DN);
        assert_eq!(
            user.attributes.mail,
            AttributeValue::Scalar("jdoe@example.org".into())
        );
        assert_eq!(user.attributes.ou, AttributeValue::Absent);
        assert_eq!(user.attributes.object_class, vec!["inetOrgPerson", "top"]);

        assert_eq!(
            directory.calls(),
            vec![
                Call::Connect("ldap://example.org".into()),
                Call::Bind(ADMIN_DN.into()),
                search("(uid=jdoe)"),
                Call::Bind(USER_DN.into()),
                Call::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_wrong_user_password() {
        let directory = directory();

        let err = verify(&directory, &request("jdoe", "wrong"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::Authentication { .. }));
        let message = err.to_string();
        assert!(message.starts_with("User authentication failed"));
        assert!(message.contains(USER_DN));
        assert_eq!(directory.calls().last(), Some(&Call::Close));
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let directory = directory();

        let err = verify(&directory, &request("nobody", "userpw"))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "User not found: nobody");
        assert_eq!(
            directory.calls(),
            vec![
                Call::Connect("ldap://example.org".into()),
                Call::Bind(ADMIN_DN.into()),
                search("(uid=nobody)"),
                Call::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_wrong_admin_password() {
        let directory = directory();
        let mut request = request("jdoe", "userpw");
        request.admin_password = "wrong".into();

        let err = verify(&directory, &request).await.unwrap_err();

        assert!(
            err.to_string()
                .starts_with(&format!("Admin bind failed. DN: {ADMIN_DN}. Error: "))
        );
        assert_eq!(
            directory.calls(),
            vec![
                Call::Connect("ldap://example.org".into()),
                Call::Bind(ADMIN_DN.into()),
                Call::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_search_failure() {
        let directory = directory();
        let mut request = request("jdoe", "userpw");
        request.base_dn = "dc=elsewhere".into();

        let err = verify(&directory, &request).await.unwrap_err();

        assert!(
            err.to_string()
                .starts_with("Search failed for user: jdoe. Error: ")
        );
        assert_eq!(directory.calls().last(), Some(&Call::Close));
        assert_eq!(
            directory
                .calls()
                .iter()
                .filter(|call| matches!(call, Call::Bind(_)))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let directory = directory().unreachable();

        let err = verify(&directory, &request("jdoe", "userpw"))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Failed to connect to LDAP server: ldap://example.org"
        );
        assert_eq!(
            directory.calls(),
            vec![Call::Connect("ldap://example.org".into())]
        );
    }

    #[tokio::test]
    async fn test_closed_port_fails_before_bind() {
        let connector = ldap::Ldap3Connector::new(crate::config::Ldap {
            connect_timeout: 1,
            ..Default::default()
        });
        let mut request = request("jdoe", "userpw");
        request.ldap_server = "ldap://127.0.0.1:1".into();

        let err = verify(&connector, &request).await.unwrap_err();

        assert!(matches!(err, ServerError::Connect { .. }));
        assert_eq!(err.kind(), "connect_failure");
        assert_eq!(
            err.to_string(),
            "Failed to connect to LDAP server: ldap://127.0.0.1:1"
        );
    }

    #[tokio::test]
    async fn test_invalid_address_never_dials() {
        let directory = directory();
        let mut request = request("jdoe", "userpw");
        request.ldap_server = "https://example.org".into();

        let err = verify(&directory, &request).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "Failed to connect to LDAP server: https://example.org"
        );
        assert!(directory.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bare_host_is_dialed_as_ldap() {
        let directory = directory();
        let mut request = request("jdoe", "userpw");
        request.ldap_server = "example.org:389".into();

        verify(&directory, &request).await.unwrap();

        assert_eq!(
            directory.calls().first(),
            Some(&Call::Connect("ldap://example.org:389".into()))
        );
    }

    #[tokio::test]
    async fn test_wildcard_username_is_escaped() {
        let directory = directory();

        let err = verify(&directory, &request("*", "userpw"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::UserNotFound { .. }));
        assert!(directory.calls().contains(&search(r"(uid=\2a)")));
        assert!(!directory.calls().contains(&Call::Bind(USER_DN.into())));
    }

    #[test]
    fn test_debug_hides_passwords() {
        let output = format!("{:?}", request("jdoe", "userpw"));

        assert!(output.contains("jdoe"));
        assert!(!output.contains("userpw"));
        assert!(!output.contains("adminpw"));
    }

    #[test]
    fn test_absent_form_field_is_empty() {
        let request: VerificationRequest = serde_json::from_value(
            serde_json::json!({
                "ldapServer": "ldap://example.org",
                "baseDN": BASE_DN,
                "adminDN": ADMIN_DN,
                "adminPassword": "adminpw",
                "testUsername": "jdoe",
            }),
        )
        .unwrap();

        assert_eq!(request.base_dn, BASE_DN);
        assert_eq!(request.test_password, "");
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_missing_field_fails_validation() {
        let mut request = request("jdoe", "userpw");
        assert!(request.validate().is_ok());

        request.test_password = String::new();
        assert!(request.validate().is_err());
    }
}
